use crate::compositor::{FrameError, FrameSize};
use anyhow::Result;
use image::RgbImage;

/// Alpha matte: grayscale values where 0.0 = background, 1.0 = foreground
/// Dimensions match the input frame dimensions
pub type Matte = Vec<f32>;

/// Accuracy/speed tradeoff for the model's internal working resolution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum InternalResolution {
    Low,
    #[default]
    Medium,
    High,
    Full,
}

impl InternalResolution {
    /// Fraction of the frame resolution the model works at
    pub fn scale(self) -> f32 {
        match self {
            InternalResolution::Low => 0.25,
            InternalResolution::Medium => 0.5,
            InternalResolution::High => 0.75,
            InternalResolution::Full => 1.0,
        }
    }
}

/// Per-call segmentation options
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentOptions {
    /// Mirror the input before segmenting
    pub flip_horizontal: bool,
    pub internal_resolution: InternalResolution,
    /// Probability a pixel must exceed to count as person
    pub segmentation_threshold: f32,
}

impl Default for SegmentOptions {
    fn default() -> Self {
        Self {
            flip_horizontal: false,
            internal_resolution: InternalResolution::Medium,
            segmentation_threshold: 0.7,
        }
    }
}

/// Binary person/background labels for one frame, row-major
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentationResult {
    size: FrameSize,
    person: Vec<bool>,
}

impl SegmentationResult {
    pub fn new(width: u32, height: u32, person: Vec<bool>) -> Result<Self, FrameError> {
        let size = FrameSize { width, height };
        if person.len() != size.pixel_count() {
            return Err(FrameError::LabelCount {
                size,
                actual: person.len(),
            });
        }
        Ok(Self { size, person })
    }

    pub fn from_fn(width: u32, height: u32, mut is_person: impl FnMut(u32, u32) -> bool) -> Self {
        let person = (0..height)
            .flat_map(|y| (0..width).map(move |x| (x, y)))
            .map(|(x, y)| is_person(x, y))
            .collect();
        Self {
            size: FrameSize { width, height },
            person,
        }
    }

    /// Threshold a probability matte; a pixel is person when its value is
    /// strictly greater than `threshold`
    pub fn from_matte(matte: &[f32], width: u32, height: u32, threshold: f32) -> Result<Self, FrameError> {
        let person = matte.iter().map(|&p| p > threshold).collect();
        Self::new(width, height, person)
    }

    pub fn size(&self) -> FrameSize {
        self.size
    }

    pub fn is_person(&self, x: u32, y: u32) -> bool {
        self.person[(y * self.size.width + x) as usize]
    }

    pub fn person_count(&self) -> usize {
        self.person.iter().filter(|&&p| p).count()
    }
}

/// Trait for segmentation models
/// Allows swapping between different backends (RVM, MODNet, MediaPipe, etc.)
pub trait SegmentationModel {
    /// Classify every pixel of `frame` as person or background
    ///
    /// The result must match the frame's dimensions.
    fn segment(&mut self, frame: &RgbImage, options: &SegmentOptions) -> Result<SegmentationResult>;

    /// Reset internal state (for models with temporal/recurrent components)
    ///
    /// Call this when:
    /// - Switching cameras
    /// - The capture resolution changes
    /// - Starting a new video session
    fn reset_state(&mut self) {
        // Default implementation: no-op for stateless models
    }

    /// Short name for logs
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::ValueEnum;

    #[test]
    fn internal_resolution_maps_to_downsample_ratio() {
        assert_eq!(InternalResolution::Low.scale(), 0.25);
        assert_eq!(InternalResolution::Medium.scale(), 0.5);
        assert_eq!(InternalResolution::High.scale(), 0.75);
        assert_eq!(InternalResolution::Full.scale(), 1.0);
        assert_eq!(InternalResolution::default(), InternalResolution::Medium);
    }

    #[test]
    fn internal_resolution_parses_from_cli_names() {
        let parsed = InternalResolution::from_str("high", true).unwrap();
        assert_eq!(parsed, InternalResolution::High);
        assert!(InternalResolution::from_str("ultra", true).is_err());
    }

    #[test]
    fn threshold_is_strict() {
        let matte = [0.69, 0.7, 0.71, 1.0];
        let result = SegmentationResult::from_matte(&matte, 2, 2, 0.7).unwrap();

        assert!(!result.is_person(0, 0));
        assert!(!result.is_person(1, 0));
        assert!(result.is_person(0, 1));
        assert!(result.is_person(1, 1));
        assert_eq!(result.person_count(), 2);
    }

    #[test]
    fn label_count_must_match_dimensions() {
        let err = SegmentationResult::new(3, 3, vec![true; 8]).unwrap_err();
        assert!(matches!(err, FrameError::LabelCount { actual: 8, .. }));
    }

    #[test]
    fn from_fn_is_row_major() {
        let result = SegmentationResult::from_fn(3, 2, |x, y| x == 2 && y == 0);
        assert!(result.is_person(2, 0));
        assert!(!result.is_person(2, 1));
        assert_eq!(result.size(), FrameSize { width: 3, height: 2 });
    }
}
