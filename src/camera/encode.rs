use super::source::Frame;
use crate::error::CameraError;
use image::codecs::jpeg::JpegEncoder;
use image::ColorType;

/// Compress a frame to JPEG; frames the device already encoded pass through
pub fn encode_jpeg(frame: Frame, quality: u8) -> Result<Vec<u8>, CameraError> {
    match frame {
        Frame::Jpeg(data) => Ok(data),
        Frame::Rgb24 {
            width,
            height,
            data,
        } => {
            let expected = width as usize * height as usize * 3;
            if data.len() != expected {
                return Err(CameraError::Encode {
                    details: format!(
                        "RGB frame is {} bytes, expected {} for {}x{}",
                        data.len(),
                        expected,
                        width,
                        height
                    ),
                });
            }

            let mut jpeg = Vec::with_capacity(expected / 8);
            JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100))
                .encode(&data, width, height, ColorType::Rgb8)
                .map_err(|e| CameraError::Encode {
                    details: e.to_string(),
                })?;
            Ok(jpeg)
        }
    }
}
