use super::OutputSink;
use anyhow::{ensure, Context, Result};
use image::{RgbImage, RgbaImage};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use v4l::video::Output;
use v4l::{Device, Format, FourCC};

pub struct V4L2Output {
    file: File,
    width: u32,
    height: u32,
}

impl V4L2Output {
    pub fn new<P: AsRef<Path>>(device_path: P, width: u32, height: u32) -> Result<Self> {
        let path = device_path.as_ref();
        tracing::info!(
            "Opening v4l2loopback device at {} ({}x{})",
            path.display(),
            width,
            height
        );

        // Announce the frame format so readers of the loopback device see YUYV
        let device = Device::with_path(path)
            .with_context(|| format!("Failed to open v4l2loopback device at {}", path.display()))?;
        let format = device
            .set_format(&Format::new(width, height, FourCC::new(b"YUYV")))
            .context("Failed to set v4l2loopback output format")?;
        ensure!(
            (format.width, format.height) == (width, height),
            "v4l2loopback device accepted {}x{}, requested {}x{}",
            format.width,
            format.height,
            width,
            height
        );

        // v4l2loopback accepts raw frame data written to the device file
        let file = File::options()
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open v4l2loopback device at {}", path.display()))?;

        tracing::info!("v4l2loopback device opened successfully");

        Ok(Self {
            file,
            width,
            height,
        })
    }

    /// Convert RGB frame to YUV422 (YUYV) format
    /// v4l2loopback typically expects YUYV format
    fn rgb_to_yuyv(rgb_image: &RgbImage) -> Vec<u8> {
        let (width, height) = rgb_image.dimensions();
        let mut yuyv = Vec::with_capacity((width * height * 2) as usize);

        for y in 0..height {
            for x in (0..width).step_by(2) {
                let pixel1 = rgb_image.get_pixel(x, y);
                let pixel2 = if x + 1 < width {
                    rgb_image.get_pixel(x + 1, y)
                } else {
                    pixel1
                };

                let (y1, u1, v1) = rgb_to_yuv(pixel1[0], pixel1[1], pixel1[2]);
                let (y2, u2, v2) = rgb_to_yuv(pixel2[0], pixel2[1], pixel2[2]);

                // Average U and V for the pair of pixels
                let u = ((u1 as u16 + u2 as u16) / 2) as u8;
                let v = ((v1 as u16 + v2 as u16) / 2) as u8;

                // YUYV format: Y0 U Y1 V
                yuyv.extend_from_slice(&[y1, u, y2, v]);
            }
        }

        yuyv
    }
}

/// Drop alpha by compositing over opaque black
pub fn flatten_over_black(frame: &RgbaImage) -> RgbImage {
    RgbImage::from_fn(frame.width(), frame.height(), |x, y| {
        let [r, g, b, a] = frame.get_pixel(x, y).0;
        let scale = |c: u8| ((c as u32 * a as u32 + 127) / 255) as u8;
        image::Rgb([scale(r), scale(g), scale(b)])
    })
}

/// Convert RGB to YUV color space
fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let r = r as f32;
    let g = g as f32;
    let b = b as f32;

    let y = (0.299 * r + 0.587 * g + 0.114 * b).clamp(0.0, 255.0) as u8;
    let u = ((-0.147 * r - 0.289 * g + 0.436 * b) + 128.0).clamp(0.0, 255.0) as u8;
    let v = ((0.615 * r - 0.515 * g - 0.100 * b) + 128.0).clamp(0.0, 255.0) as u8;

    (y, u, v)
}

impl OutputSink for V4L2Output {
    fn write_frame(&mut self, frame: &RgbaImage) -> Result<()> {
        let _span = tracing::debug_span!("write_frame").entered();

        let mut rgb = flatten_over_black(frame);
        if rgb.dimensions() != (self.width, self.height) {
            rgb = image::imageops::resize(
                &rgb,
                self.width,
                self.height,
                image::imageops::FilterType::Triangle,
            );
        }

        let yuyv_data = Self::rgb_to_yuyv(&rgb);

        self.file
            .write_all(&yuyv_data)
            .context("Failed to write frame to v4l2loopback device")?;

        Ok(())
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
