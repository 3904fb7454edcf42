//! USB and CSI cameras through Video4Linux2.
//!
//! Only compiled with the `v4l2-backend` feature. The device is asked for
//! MJPEG so frames come out of the driver already compressed.

use fieldbot_types::FieldError;
use tracing::{debug, info};
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::camera::{Camera, CameraFrame};

const BUFFER_COUNT: u32 = 2;

/// A V4L2 capture device streaming MJPEG through mmap buffers.
pub struct V4lCamera {
    id: String,
    width: u32,
    height: u32,
    stream: Stream<'static>,
    _device: Device,
}

impl V4lCamera {
    /// Open `/dev/video{index}` at the requested resolution.
    ///
    /// The driver may pick a nearby resolution; the one it settles on is
    /// reported in each frame.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::HardwareFault`] if the device is missing, cannot
    /// produce MJPEG, or refuses to allocate capture buffers.
    pub fn open(index: usize, width: u32, height: u32) -> Result<Self, FieldError> {
        let id = format!("video{index}");
        let fault = |e: std::io::Error| FieldError::hardware(id.as_str(), e.to_string());

        let device = Device::new(index).map_err(fault)?;
        let mut format = device.format().map_err(fault)?;
        format.width = width;
        format.height = height;
        format.fourcc = FourCC::new(b"MJPG");
        let format = device.set_format(&format).map_err(fault)?;
        if format.fourcc != FourCC::new(b"MJPG") {
            return Err(FieldError::hardware(
                id.as_str(),
                format!("MJPEG not supported (driver offered {})", format.fourcc),
            ));
        }

        let stream = Stream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT).map_err(fault)?;
        info!(camera = %id, width = format.width, height = format.height, "camera streaming");
        Ok(Self {
            id,
            width: format.width,
            height: format.height,
            stream,
            _device: device,
        })
    }
}

impl Camera for V4lCamera {
    fn id(&self) -> &str {
        &self.id
    }

    fn capture(&mut self) -> Result<CameraFrame, FieldError> {
        // Buffers queued since the last capture hold old frames.
        for _ in 1..BUFFER_COUNT {
            self.stream
                .next()
                .map_err(|e| FieldError::hardware(self.id.as_str(), e.to_string()))?;
        }
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| FieldError::hardware(self.id.as_str(), e.to_string()))?;
        let used = match meta.bytesused as usize {
            0 => buf.len(),
            n => n.min(buf.len()),
        };
        let data = buf[..used].to_vec();
        debug!(camera = %self.id, bytes = used, sequence = meta.sequence, "frame captured");
        CameraFrame::jpeg(&self.id, self.width, self.height, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_device_is_a_hardware_fault() {
        let err = V4lCamera::open(250, 640, 480).err().expect("no /dev/video250");
        assert!(matches!(err, FieldError::HardwareFault { ref component, .. } if component == "video250"));
    }
}
