use super::preprocess::{frame_to_tensor, resize_matte};
use super::types::{Matte, SegmentOptions, SegmentationModel, SegmentationResult};
use anyhow::{ensure, Context, Result};
use image::RgbImage;
use ndarray::{Array1, ArrayD, IxDyn};
use ort::execution_providers::{CUDAExecutionProvider, TensorRTExecutionProvider};
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

/// RobustVideoMatting segmentation model
///
/// This model uses recurrent connections to maintain temporal consistency.
/// Hidden states (r1-r4) are carried between frames for smooth results.
/// The model accepts any frame size; the internal resolution option maps to
/// its `downsample_ratio` input.
pub struct RobustVideoMatting {
    session: Session,
    recurrent: RecurrentState,
}

/// Frame size and downsample ratio a set of hidden states belongs to
#[derive(Debug, Clone, Copy, PartialEq)]
struct StateKey {
    dimensions: (u32, u32),
    ratio: f32,
}

/// Hidden states r1-r4, replaced after every inference
///
/// States computed for one frame size or downsample ratio are meaningless
/// for another, so a key change starts over from zeros.
#[derive(Default)]
struct RecurrentState {
    states: Option<[ArrayD<f32>; 4]>,
    key: Option<StateKey>,
}

impl RecurrentState {
    /// Zero states; RVM broadcasts [1, 1, 1, 1] to whatever shape it needs
    fn initial() -> [ArrayD<f32>; 4] {
        std::array::from_fn(|_| ArrayD::zeros(IxDyn(&[1, 1, 1, 1])))
    }

    /// States to feed the next inference for `key`
    fn prepare(&mut self, key: StateKey) -> &mut [ArrayD<f32>; 4] {
        if self.states.is_some() && self.key != Some(key) {
            tracing::debug!("Frame size or internal resolution changed, resetting hidden states");
            self.states = None;
        }
        self.key = Some(key);
        self.states.get_or_insert_with(Self::initial)
    }

    fn reset(&mut self) {
        self.states = None;
    }
}

impl RobustVideoMatting {
    /// Create a new RVM model from an ONNX file
    ///
    /// # Arguments
    /// * `model_path` - Path to the ONNX model file
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let path = model_path.as_ref();

        tracing::info!("Loading RVM model from {}", path.display());

        let session = Self::session_builder()?
            .commit_from_file(path)
            .with_context(|| format!("Failed to load model from {}", path.display()))?;

        tracing::info!("RVM model loaded successfully");

        Ok(Self {
            session,
            recurrent: RecurrentState::default(),
        })
    }

    fn session_builder() -> Result<SessionBuilder> {
        // TensorRT first, then CUDA; providers that fail to register leave
        // the CPU provider in charge
        let builder = Session::builder()?
            .with_execution_providers([
                TensorRTExecutionProvider::default().build(),
                CUDAExecutionProvider::default().build(),
            ])?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?;
        Ok(builder)
    }

    fn infer(&mut self, frame: &RgbImage, options: &SegmentOptions) -> Result<Matte> {
        let ratio = options.internal_resolution.scale();
        let states = self.recurrent.prepare(StateKey {
            dimensions: frame.dimensions(),
            ratio,
        });
        let src = frame_to_tensor(frame, options.flip_horizontal);
        let downsample_ratio = Array1::from_elem(1, ratio);

        let _infer_span = tracing::debug_span!("inference").entered();
        let outputs = self
            .session
            .run(ort::inputs![
                "src" => TensorRef::from_array_view(src.view())?,
                "r1i" => TensorRef::from_array_view(states[0].view())?,
                "r2i" => TensorRef::from_array_view(states[1].view())?,
                "r3i" => TensorRef::from_array_view(states[2].view())?,
                "r4i" => TensorRef::from_array_view(states[3].view())?,
                "downsample_ratio" => TensorRef::from_array_view(downsample_ratio.view())?,
            ])
            .context("Failed to run inference")?;
        drop(_infer_span);

        // Outputs: fgr (foreground), pha (alpha), r1o..r4o
        // Only the matte and the updated hidden states are needed
        let pha = outputs["pha"].try_extract_array::<f32>()?;
        let next_states = [
            outputs["r1o"].try_extract_array::<f32>()?.to_owned(),
            outputs["r2o"].try_extract_array::<f32>()?.to_owned(),
            outputs["r3o"].try_extract_array::<f32>()?.to_owned(),
            outputs["r4o"].try_extract_array::<f32>()?.to_owned(),
        ];

        // Matte shape: [1, 1, H, W]
        let shape = pha.shape();
        ensure!(shape.len() == 4, "unexpected matte shape {:?}", shape);
        let (matte_height, matte_width) = (shape[2] as u32, shape[3] as u32);
        let matte_flat: Vec<f32> = pha.iter().copied().collect();

        *states = next_states;

        let (frame_width, frame_height) = frame.dimensions();
        resize_matte(&matte_flat, matte_width, matte_height, frame_width, frame_height)
    }
}

impl SegmentationModel for RobustVideoMatting {
    fn segment(&mut self, frame: &RgbImage, options: &SegmentOptions) -> Result<SegmentationResult> {
        let _span = tracing::debug_span!("rvm_segment").entered();

        let matte = self.infer(frame, options)?;
        let (width, height) = frame.dimensions();
        let result =
            SegmentationResult::from_matte(&matte, width, height, options.segmentation_threshold)?;

        Ok(result)
    }

    fn reset_state(&mut self) {
        tracing::info!("Resetting RVM hidden states");
        self.recurrent.reset();
    }

    fn name(&self) -> &str {
        "rvm"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(width: u32, height: u32, ratio: f32) -> StateKey {
        StateKey {
            dimensions: (width, height),
            ratio,
        }
    }

    /// Stand-in for the r1o..r4o outputs of a previous run
    fn carry(states: &mut [ArrayD<f32>; 4]) {
        *states = std::array::from_fn(|_| ArrayD::from_elem(IxDyn(&[1, 2, 3, 3]), 0.5));
    }

    fn is_initial(states: &[ArrayD<f32>; 4]) -> bool {
        states
            .iter()
            .all(|s| s.shape() == [1, 1, 1, 1] && s.iter().all(|&v| v == 0.0))
    }

    #[test]
    fn first_use_starts_from_zeros() {
        let mut recurrent = RecurrentState::default();
        assert!(is_initial(recurrent.prepare(key(640, 480, 0.5))));
    }

    #[test]
    fn same_key_carries_states_forward() {
        let mut recurrent = RecurrentState::default();
        carry(recurrent.prepare(key(640, 480, 0.5)));

        let states = recurrent.prepare(key(640, 480, 0.5));
        assert_eq!(states[0].shape(), [1, 2, 3, 3]);
    }

    #[test]
    fn size_change_resets_states() {
        let mut recurrent = RecurrentState::default();
        carry(recurrent.prepare(key(640, 480, 0.5)));

        assert!(is_initial(recurrent.prepare(key(320, 240, 0.5))));
    }

    #[test]
    fn ratio_change_resets_states() {
        let mut recurrent = RecurrentState::default();
        carry(recurrent.prepare(key(640, 480, 0.5)));

        assert!(is_initial(recurrent.prepare(key(640, 480, 0.25))));
    }

    #[test]
    fn gpu_providers_register_without_a_gpu() {
        assert!(RobustVideoMatting::session_builder().is_ok());
    }

    #[test]
    fn missing_model_file_names_the_path() {
        let err = RobustVideoMatting::new("no-such-model.onnx").err().unwrap();
        assert!(format!("{err:#}").contains("no-such-model.onnx"));
    }

    #[test]
    fn explicit_reset_starts_over() {
        let mut recurrent = RecurrentState::default();
        carry(recurrent.prepare(key(640, 480, 0.5)));
        recurrent.reset();

        assert!(is_initial(recurrent.prepare(key(640, 480, 0.5))));
    }
}
