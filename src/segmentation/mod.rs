mod passthrough;
mod preprocess;
mod rvm;
pub mod types;

pub use passthrough::PassthroughModel;
pub use rvm::RobustVideoMatting;
pub use types::{InternalResolution, Matte, SegmentOptions, SegmentationModel, SegmentationResult};

use anyhow::Result;

/// Create a default segmentation model (RVM)
pub fn create_default_model(model_path: &str) -> Result<Box<dyn SegmentationModel>> {
    let model = RobustVideoMatting::new(model_path)?;
    Ok(Box::new(model))
}
