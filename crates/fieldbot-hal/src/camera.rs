//! Generic `Camera` trait and the JPEG frames it produces.

use fieldbot_types::FieldError;

/// A compressed still returned by a camera driver.
///
/// Frames are always JPEG so they can be uploaded to the vision API as-is.
/// Build them with [`CameraFrame::jpeg`], which rejects truncated buffers.
#[derive(Debug, Clone)]
pub struct CameraFrame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    pub data: Vec<u8>,
}

impl CameraFrame {
    pub const MIME_TYPE: &'static str = "image/jpeg";

    /// Wrap `data` after checking it starts with SOI and ends with EOI.
    ///
    /// Trailing zero padding after EOI is trimmed; some UVC cameras pad
    /// MJPEG buffers to a fixed size.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::HardwareFault`] for `camera` when the buffer is
    /// not a complete JPEG image.
    pub fn jpeg(camera: &str, width: u32, height: u32, mut data: Vec<u8>) -> Result<Self, FieldError> {
        while data.last() == Some(&0) {
            data.pop();
        }
        if !data.starts_with(&[0xFF, 0xD8]) || !data.ends_with(&[0xFF, 0xD9]) {
            return Err(FieldError::hardware(
                camera,
                format!("incomplete JPEG frame ({} bytes)", data.len()),
            ));
        }
        Ok(Self { width, height, data })
    }
}

/// A camera or image-capture device.
pub trait Camera: Send {
    /// Stable identifier for this camera, e.g. `"front"`.
    fn id(&self) -> &str;

    /// Capture and return the next available frame.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::HardwareFault`] if the frame cannot be captured
    /// (e.g. the device is disconnected or the buffer is unavailable).
    fn capture(&mut self) -> Result<CameraFrame, FieldError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_jpeg_is_accepted() {
        let frame = CameraFrame::jpeg("front", 640, 480, vec![0xFF, 0xD8, 0x00, 0x11, 0xFF, 0xD9]).unwrap();
        assert_eq!((frame.width, frame.height), (640, 480));
        assert_eq!(frame.data.len(), 6);
    }

    #[test]
    fn zero_padding_after_eoi_is_trimmed() {
        let frame = CameraFrame::jpeg("front", 1, 1, vec![0xFF, 0xD8, 0xFF, 0xD9, 0, 0, 0]).unwrap();
        assert_eq!(frame.data, vec![0xFF, 0xD8, 0xFF, 0xD9]);
    }

    #[test]
    fn truncated_or_raw_buffers_are_rejected() {
        let truncated = CameraFrame::jpeg("front", 1, 1, vec![0xFF, 0xD8, 0x12, 0x34]);
        assert!(matches!(
            truncated,
            Err(FieldError::HardwareFault { ref component, .. }) if component == "front"
        ));
        assert!(CameraFrame::jpeg("front", 2, 2, vec![0u8; 12]).is_err());
        assert!(CameraFrame::jpeg("front", 0, 0, Vec::new()).is_err());
    }
}
