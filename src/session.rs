use crate::background::BackgroundManager;
use crate::capture::CaptureSource;
use crate::compositor::{BlendBuffer, ColorKey, FrameSize, Surface};
use crate::output::OutputSink;
use crate::segmentation::{SegmentOptions, SegmentationModel};
use anyhow::{Context, Result};
use std::sync::Arc;

/// Settings fixed for the lifetime of a session
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionOptions {
    /// Mask colour for person pixels
    pub foreground: ColorKey,
    /// Mask colour for background pixels
    pub background: ColorKey,
    pub segment: SegmentOptions,
    /// Write the tinted mask instead of the composite
    pub show_mask: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            foreground: ColorKey::new(0, 0, 0, 255),
            background: ColorKey::new(0, 0, 0, 0),
            segment: SegmentOptions::default(),
            show_mask: false,
        }
    }
}

/// Everything one camera session owns
///
/// Built once after setup succeeds and handed to the render loop; the blend
/// buffer and the visible surface are only ever touched from there.
pub struct Session<C, O> {
    pub(crate) capture: C,
    pub(crate) output: O,
    pub(crate) model: Box<dyn SegmentationModel>,
    pub(crate) backgrounds: Arc<BackgroundManager>,
    pub(crate) options: SessionOptions,
    pub(crate) blend: BlendBuffer,
    pub(crate) canvas: Surface,
    frame_size: FrameSize,
}

impl<C, O> Session<C, O>
where
    C: CaptureSource,
    O: OutputSink,
{
    /// Size both surfaces to the capture's negotiated resolution
    pub fn new(
        capture: C,
        output: O,
        model: Box<dyn SegmentationModel>,
        backgrounds: Arc<BackgroundManager>,
        options: SessionOptions,
    ) -> Result<Self> {
        let (width, height) = capture.resolution();
        let frame_size =
            FrameSize::new(width, height).context("Camera negotiated an unusable resolution")?;

        tracing::info!(
            "Session ready: frame {}, model {}, foreground {}, background {}",
            frame_size,
            model.name(),
            options.foreground,
            options.background
        );

        Ok(Self {
            capture,
            output,
            model,
            backgrounds,
            options,
            blend: BlendBuffer::new(frame_size),
            canvas: Surface::new(frame_size),
            frame_size,
        })
    }

    pub fn frame_size(&self) -> FrameSize {
        self.frame_size
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// The visible surface as of the last rendered frame
    pub fn canvas(&self) -> &Surface {
        &self.canvas
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn backgrounds(&self) -> &Arc<BackgroundManager> {
        &self.backgrounds
    }

    /// Resize both surfaces together and drop recurrent model state
    pub fn resize(&mut self, size: FrameSize) {
        tracing::info!("Frame size changed {} -> {}", self.frame_size, size);
        self.blend.resize(size);
        self.canvas.resize(size);
        self.frame_size = size;
        self.model.reset_state();
    }

    /// Close the capture stream
    pub fn teardown(mut self) -> Result<()> {
        tracing::info!("Tearing down session");
        self.capture.close()
    }
}
