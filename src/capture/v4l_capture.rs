use super::CaptureSource;
use anyhow::{Context, Result};
use image::RgbImage;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;

pub struct WebcamCapture {
    camera: Camera,
    width: u32,
    height: u32,
}

impl WebcamCapture {
    /// Open a camera, asking for the format closest to the requested size
    ///
    /// The camera may settle on a different resolution; `resolution()`
    /// reports what was actually negotiated.
    pub fn new(device_index: u32, width: u32, height: u32, fps: u32) -> Result<Self> {
        tracing::info!(
            "Initializing webcam {} at {}x{}",
            device_index,
            width,
            height
        );

        let index = CameraIndex::Index(device_index);
        let wanted = CameraFormat::new_from(width, height, FrameFormat::MJPEG, fps);
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(wanted));

        let mut camera = Camera::new(index, requested)
            .context("Failed to open camera")?;

        camera.open_stream()
            .context("Failed to open camera stream")?;

        let negotiated = camera.resolution();
        let (width, height) = (negotiated.width(), negotiated.height());

        tracing::info!("Webcam initialized at {}x{}", width, height);

        Ok(Self {
            camera,
            width,
            height,
        })
    }
}

impl CaptureSource for WebcamCapture {
    fn capture_frame(&mut self) -> Result<RgbImage> {
        let frame = self
            .camera
            .frame()
            .context("Failed to capture frame")?;

        let decoded = frame.decode_image::<RgbFormat>()
            .context("Failed to decode frame")?;

        let (width, height) = decoded.dimensions();
        if (width, height) != (self.width, self.height) {
            tracing::info!(
                "Camera resolution changed {}x{} -> {}x{}",
                self.width,
                self.height,
                width,
                height
            );
            self.width = width;
            self.height = height;
        }

        Ok(decoded)
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn close(&mut self) -> Result<()> {
        tracing::info!("Stopping webcam stream");
        self.camera
            .stop_stream()
            .context("Failed to stop camera stream")
    }
}
