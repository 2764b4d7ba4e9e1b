use crate::bus::{BusDevice, BusGateway, SimulatedBus};
use crate::buttons::ButtonEventMonitor;
use crate::camera::{factory_for, CameraService, FrameSourceFactory};
use crate::config::{BusBackend, SwiftbotConfig};
use crate::error::{Result, SwiftbotError};
use crate::lighting::LightingController;
use crate::motion::MotionController;
use crate::sensors::SensorHub;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Set while a session owns the real GPIO/I2C hardware
static HARDWARE_CLAIMED: AtomicBool = AtomicBool::new(false);

/// Owns the bus and every controller built on it.
///
/// Opening a session configures all lines, resets the underlight driver and
/// leaves the motors disabled. Closing it (explicitly or on drop) stops the
/// background loops and puts the hardware back into a safe state; handles
/// kept past that point fail with `DeviceUnavailable`.
pub struct HardwareSession {
    config: SwiftbotConfig,
    bus: Arc<BusGateway>,
    motion: Arc<MotionController>,
    sensors: Arc<SensorHub>,
    lighting: Arc<LightingController>,
    buttons: Arc<ButtonEventMonitor>,
    camera: Arc<CameraService>,
    claims_hardware: bool,
    closed: AtomicBool,
}

impl HardwareSession {
    /// Open a session on the backends selected in `config`
    pub fn open(config: SwiftbotConfig) -> Result<Self> {
        config.validate()?;
        let camera_factory = factory_for(&config.camera);

        match config.system.backend {
            BusBackend::Simulated => {
                let sim = SimulatedBus::new();
                sim.attach_ultrasonic(config.pins.ultrasonic_trigger, config.pins.ultrasonic_echo);
                Self::open_with(config, Box::new(sim), camera_factory)
            }
            BusBackend::Rpi => {
                if HARDWARE_CLAIMED
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
                {
                    return Err(SwiftbotError::invalid_state(
                        "open_session",
                        "hardware is owned by another session",
                    ));
                }

                let opened = open_rpi_bus()
                    .and_then(|device| Self::assemble(config, device, camera_factory, true));
                if opened.is_err() {
                    HARDWARE_CLAIMED.store(false, Ordering::SeqCst);
                }
                opened
            }
        }
    }

    /// Open a session on an explicit bus device and camera source
    pub fn open_with(
        config: SwiftbotConfig,
        device: Box<dyn BusDevice>,
        camera_factory: Arc<dyn FrameSourceFactory>,
    ) -> Result<Self> {
        config.validate()?;
        Self::assemble(config, device, camera_factory, false)
    }

    fn assemble(
        config: SwiftbotConfig,
        device: Box<dyn BusDevice>,
        camera_factory: Arc<dyn FrameSourceFactory>,
        claims_hardware: bool,
    ) -> Result<Self> {
        let bus = Arc::new(BusGateway::new(device));

        let motion = Arc::new(MotionController::new(
            Arc::clone(&bus),
            &config.pins,
            &config.motors,
        ));
        let sensors = Arc::new(SensorHub::new(
            Arc::clone(&bus),
            &config.pins,
            &config.sensors,
        ));
        let lighting = Arc::new(LightingController::new(
            Arc::clone(&bus),
            &config.pins,
            &config.lighting,
        ));

        let initialized = motion
            .initialize()
            .and_then(|_| sensors.initialize())
            .and_then(|_| lighting.initialize());
        if let Err(e) = initialized {
            error!("Hardware initialization failed: {}", e);
            bus.mark_unavailable();
            return Err(e);
        }

        let buttons = Arc::new(ButtonEventMonitor::new(
            Arc::clone(&sensors),
            &config.buttons,
        ));
        let camera = Arc::new(CameraService::new(
            &config.camera,
            &config.stream,
            camera_factory,
        ));

        info!("Hardware session opened on {}", bus.name());
        Ok(Self {
            config,
            bus,
            motion,
            sensors,
            lighting,
            buttons,
            camera,
            claims_hardware,
            closed: AtomicBool::new(false),
        })
    }

    /// Stop everything and release the hardware; later calls are no-ops.
    ///
    /// Every teardown step runs even if an earlier one failed; the first
    /// failure is returned.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Closing hardware session on {}", self.bus.name());

        self.buttons.unregister_listener();

        let steps = [
            ("stop streaming", self.camera.stop_streaming()),
            ("stop motors", self.motion.stop()),
            ("disable motors", self.motion.disable_motors()),
            ("switch off lights", self.lighting.shutdown()),
        ];

        let mut first_error = None;
        for (step, result) in steps {
            if let Err(e) = result {
                warn!("Failed to {} during close: {}", step, e);
                first_error.get_or_insert(e);
            }
        }

        self.bus.mark_unavailable();
        if self.claims_hardware {
            HARDWARE_CLAIMED.store(false, Ordering::SeqCst);
        }
        info!("Hardware session closed");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &SwiftbotConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<BusGateway> {
        &self.bus
    }

    pub fn motion(&self) -> &Arc<MotionController> {
        &self.motion
    }

    pub fn sensors(&self) -> &Arc<SensorHub> {
        &self.sensors
    }

    pub fn lighting(&self) -> &Arc<LightingController> {
        &self.lighting
    }

    pub fn buttons(&self) -> &Arc<ButtonEventMonitor> {
        &self.buttons
    }

    pub fn camera(&self) -> &Arc<CameraService> {
        &self.camera
    }
}

impl Drop for HardwareSession {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Hardware session closed with errors: {}", e);
        }
    }
}

#[cfg(all(feature = "rpi", target_os = "linux"))]
fn open_rpi_bus() -> Result<Box<dyn BusDevice>> {
    Ok(Box::new(crate::bus::RppalBus::open()?))
}

#[cfg(not(all(feature = "rpi", target_os = "linux")))]
fn open_rpi_bus() -> Result<Box<dyn BusDevice>> {
    Err(SwiftbotError::device_unavailable(
        "rpi",
        "built without the rpi feature",
    ))
}
