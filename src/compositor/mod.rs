mod blend;
mod mask;
mod surface;

pub use blend::BlendBuffer;
pub use mask::to_mask;
pub use surface::{CompositeOp, CompositeScope, Surface};

use image::Rgba;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Pixel dimensions shared by every buffer in a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    /// Create a frame size, rejecting zero-area dimensions
    pub fn new(width: u32, height: u32) -> Result<Self, FrameError> {
        let size = Self { width, height };
        if width == 0 || height == 0 {
            return Err(FrameError::EmptyFrame(size));
        }
        Ok(size)
    }

    pub fn of<I: image::GenericImageView>(image: &I) -> Self {
        let (width, height) = image.dimensions();
        Self { width, height }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl fmt::Display for FrameSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// RGBA colour used to tint one segmentation class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorKey {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl ColorKey {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn to_rgba(self) -> Rgba<u8> {
        Rgba([self.r, self.g, self.b, self.a])
    }
}

impl fmt::Display for ColorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.r, self.g, self.b, self.a)
    }
}

#[derive(Debug, Error)]
#[error("invalid color key {0:?}: expected four comma-separated values in 0-255")]
pub struct ParseColorKeyError(String);

/// Parses `r,g,b,a`
impl FromStr for ColorKey {
    type Err = ParseColorKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseColorKeyError(s.to_string());
        let channels = s
            .split(',')
            .map(|part| part.trim().parse::<u8>())
            .collect::<Result<Vec<u8>, _>>()
            .map_err(|_| invalid())?;

        match channels.as_slice() {
            &[r, g, b, a] => Ok(Self::new(r, g, b, a)),
            _ => Err(invalid()),
        }
    }
}

/// Size contract violations between the collaborators of one frame
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame size must be non-zero, got {0}")]
    EmptyFrame(FrameSize),

    #[error("segmentation is {actual} but the session frame size is {expected}")]
    SegmentationSize { expected: FrameSize, actual: FrameSize },

    #[error("{actual} labels cannot describe a {size} frame")]
    LabelCount { size: FrameSize, actual: usize },

    #[error("{what} is {actual} but the blend buffer is {expected}")]
    BufferSize {
        what: &'static str,
        expected: FrameSize,
        actual: FrameSize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_color_keys() {
        let key: ColorKey = "255, 0, 0,255".parse().unwrap();
        assert_eq!(key, ColorKey::new(255, 0, 0, 255));
        assert_eq!(key.to_string(), "255,0,0,255");
    }

    #[test]
    fn rejects_malformed_color_keys() {
        assert!("255,0,0".parse::<ColorKey>().is_err());
        assert!("256,0,0,0".parse::<ColorKey>().is_err());
        assert!("red".parse::<ColorKey>().is_err());
        assert!("1,2,3,4,5".parse::<ColorKey>().is_err());
    }

    #[test]
    fn zero_sized_frames_are_rejected() {
        assert!(matches!(
            FrameSize::new(0, 480),
            Err(FrameError::EmptyFrame(_))
        ));
        assert_eq!(FrameSize::new(640, 480).unwrap().pixel_count(), 640 * 480);
    }
}
