use anyhow::Result;
use clap::Parser;
use serde::Serialize;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use swiftbot::{SwiftBot, SwiftbotConfig, DISTANCE_UNKNOWN, NUM_BUTTONS};

#[derive(Parser, Debug)]
#[command(name = "swiftbot")]
#[command(about = "Hardware check for the SwiftBot robot")]
#[command(version)]
#[command(long_about = "Opens the robot's hardware session and checks each component: \
motors, ultrasonic sensor, buttons, button LEDs, underlighting and camera. \
Also prints or validates the configuration.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "swiftbot.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Exercise every component once and print a report
    #[arg(long, help = "Open the hardware and check each component once")]
    self_test: bool,

    /// Keep the stream up for this many seconds during the self test
    #[arg(long, value_name = "SECONDS", default_value_t = 0)]
    stream_seconds: u64,

    /// Print the self-test report as JSON
    #[arg(long)]
    json: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,
}

/// Outcome of one self-test step
#[derive(Debug, Serialize)]
struct CheckResult {
    component: &'static str,
    passed: bool,
    detail: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    init_logging(&args)?;

    info!("SwiftBot hardware check v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match SwiftbotConfig::load_from_file(&args.config) {
        Ok(config) => {
            info!("Configuration loaded successfully from: {}", args.config);
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                info!("Configuration validation successful");
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                error!("Configuration validation failed: {}", e);
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    if !args.self_test {
        println!("Nothing to do; pass --self-test, --validate-config or --print-config");
        return Ok(());
    }

    let robot = SwiftBot::open(config).map_err(|e| {
        error!("Failed to open hardware session: {}", e);
        e
    })?;

    let results = run_self_test(&robot, Duration::from_secs(args.stream_seconds));
    if let Err(e) = robot.close() {
        warn!("Hardware session closed with errors: {}", e);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        for result in &results {
            let mark = if result.passed { "✓" } else { "✗" };
            println!("{} {:<12} {}", mark, result.component, result.detail);
        }
    }

    if results.iter().all(|result| result.passed) {
        Ok(())
    } else {
        std::process::exit(1);
    }
}

fn run_self_test(robot: &SwiftBot, stream_for: Duration) -> Vec<CheckResult> {
    let mut results = Vec::new();
    let mut check = |component: &'static str, outcome: swiftbot::Result<String>| {
        let (passed, detail) = match outcome {
            Ok(detail) => (true, detail),
            Err(e) => (false, e.to_string()),
        };
        results.push(CheckResult {
            component,
            passed,
            detail,
        });
    };

    check(
        "motors",
        (|| -> swiftbot::Result<String> {
            robot.forward(0.3)?;
            thread::sleep(Duration::from_millis(300));
            robot.turn_left(0.3)?;
            thread::sleep(Duration::from_millis(300));
            robot.stop()?;
            Ok("forward, turn and stop".to_string())
        })(),
    );

    check(
        "ultrasonic",
        robot.read_distance().map(|distance| {
            if distance == DISTANCE_UNKNOWN {
                "no echo (nothing in range)".to_string()
            } else {
                format!("{:.1} cm", distance)
            }
        }),
    );

    check(
        "buttons",
        (0..NUM_BUTTONS as i32)
            .map(|id| robot.is_button_pressed(id))
            .collect::<swiftbot::Result<Vec<bool>>>()
            .map(|pressed| format!("pressed {:?}", pressed)),
    );

    check(
        "button LEDs",
        (|| -> swiftbot::Result<String> {
            for id in 0..NUM_BUTTONS as i32 {
                robot.set_button_led(id, 1.0)?;
                thread::sleep(Duration::from_millis(150));
                robot.set_button_led(id, 0.0)?;
            }
            Ok("each LED lit once".to_string())
        })(),
    );

    check(
        "underlight",
        (|| -> swiftbot::Result<String> {
            for (r, g, b) in [(255, 0, 0), (0, 255, 0), (0, 0, 255)] {
                robot.fill_underlighting(r, g, b)?;
                thread::sleep(Duration::from_millis(200));
            }
            robot.clear_underlighting()?;
            Ok("red, green, blue".to_string())
        })(),
    );

    check(
        "camera",
        robot.capture_image().map(|image| {
            if image.is_empty() {
                "no frame within timeout".to_string()
            } else {
                format!("captured {} byte JPEG", image.len())
            }
        }),
    );

    if !stream_for.is_zero() {
        check(
            "stream",
            (|| -> swiftbot::Result<String> {
                let started = Instant::now();
                robot.start_streaming()?;
                let url = robot.stream_url().unwrap_or_default();
                println!("Streaming at {} for {:?}", url, stream_for);
                thread::sleep(stream_for);
                robot.stop_streaming()?;
                Ok(format!("served {} for {:?}", url, started.elapsed()))
            })(),
        );
    }

    results
}

fn init_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("swiftbot={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_names(true)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_names(true)
                .boxed()
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();

    Ok(())
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# SwiftBot configuration file");
    println!("# Every key is optional; SWIFTBOT_<SECTION>__<KEY> environment variables override it");
    println!();
    println!("{}", SwiftbotConfig::default().to_toml()?);
    Ok(())
}
