use super::types::{SegmentOptions, SegmentationModel, SegmentationResult};
use anyhow::Result;
use image::RgbImage;

/// Labels every pixel as person, so the output is the live video unchanged
///
/// Used when no model file is configured.
pub struct PassthroughModel;

impl SegmentationModel for PassthroughModel {
    fn segment(&mut self, frame: &RgbImage, _options: &SegmentOptions) -> Result<SegmentationResult> {
        let (width, height) = frame.dimensions();
        Ok(SegmentationResult::from_fn(width, height, |_, _| true))
    }

    fn name(&self) -> &str {
        "passthrough"
    }
}
