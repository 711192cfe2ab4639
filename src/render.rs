//! The per-frame compositing loop.
//!
//! Each iteration captures a frame, segments it, cuts the subject out through
//! the blend buffer, and draws background then subject onto the visible
//! surface. Iterations never overlap: the next capture starts only after the
//! previous composite has been written out.

use crate::capture::CaptureSource;
use crate::compositor::{to_mask, CompositeOp, FrameSize};
use crate::output::OutputSink;
use crate::session::Session;
use anyhow::{ensure, Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Frames between timing reports
const STATS_INTERVAL: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Uninitialized,
    Rendering,
    /// Terminal: a stopped loop cannot be restarted
    Stopped,
}

/// Shared flag that ends the render loop after the current iteration
#[derive(Debug, Clone, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Running totals for the periodic timing report
#[derive(Debug, Default, Clone)]
pub struct FrameStats {
    pub frames: u64,
    pub dropped: u64,
    capture: Duration,
    segment: Duration,
    composite: Duration,
    output: Duration,
}

impl FrameStats {
    fn avg_ms(&self, total: Duration) -> f64 {
        total.as_secs_f64() * 1000.0 / self.frames.max(1) as f64
    }

    fn log(&self) {
        let capture = self.avg_ms(self.capture);
        let segment = self.avg_ms(self.segment);
        let composite = self.avg_ms(self.composite);
        let output = self.avg_ms(self.output);
        let total = capture + segment + composite + output;

        tracing::info!(
            "Frame {}: capture={:.1}ms, segment={:.1}ms, composite={:.1}ms, output={:.1}ms, total={:.1}ms, fps={:.1}, dropped={}",
            self.frames,
            capture,
            segment,
            composite,
            output,
            total,
            1000.0 / total.max(f64::EPSILON),
            self.dropped
        );
    }
}

pub struct RenderLoop<C, O> {
    session: Session<C, O>,
    state: LoopState,
    stop: StopToken,
    frame_interval: Option<Duration>,
    stats: FrameStats,
}

impl<C, O> RenderLoop<C, O>
where
    C: CaptureSource,
    O: OutputSink,
{
    /// `target_fps` of `None` or zero renders as fast as segmentation allows
    pub fn new(session: Session<C, O>, stop: StopToken, target_fps: Option<u32>) -> Self {
        let frame_interval = target_fps
            .filter(|&fps| fps > 0)
            .map(|fps| Duration::from_secs_f64(1.0 / fps as f64));

        Self {
            session,
            state: LoopState::Uninitialized,
            stop,
            frame_interval,
            stats: FrameStats::default(),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    pub fn session(&self) -> &Session<C, O> {
        &self.session
    }

    pub fn into_session(self) -> Session<C, O> {
        self.session
    }

    /// Render until the stop token fires
    ///
    /// Frame failures are logged and the loop moves on to the next tick;
    /// only misuse of a stopped loop returns an error.
    pub fn run(&mut self) -> Result<()> {
        ensure!(self.state != LoopState::Stopped, "render loop already stopped");

        self.state = LoopState::Rendering;
        tracing::info!("Starting render loop");

        while !self.stop.is_stopped() {
            let tick = Instant::now();

            if let Err(err) = self.render_frame() {
                self.stats.dropped += 1;
                tracing::warn!("Frame dropped: {:#}", err);
            }

            if let Some(interval) = self.frame_interval {
                let elapsed = tick.elapsed();
                if elapsed < interval {
                    std::thread::sleep(interval - elapsed);
                }
            }
        }

        self.state = LoopState::Stopped;
        tracing::info!(
            "Render loop stopped after {} frames ({} dropped)",
            self.stats.frames,
            self.stats.dropped
        );
        Ok(())
    }

    /// One iteration: segment, mask, background, cutout, composite, output
    pub fn render_frame(&mut self) -> Result<()> {
        let _span = tracing::debug_span!("render_frame", frame = self.stats.frames).entered();
        let session = &mut self.session;

        let capture_start = Instant::now();
        let frame = session
            .capture
            .capture_frame()
            .context("Failed to capture frame")?;
        self.stats.capture += capture_start.elapsed();

        let (width, height) = frame.dimensions();
        let size = FrameSize::new(width, height).context("Captured an empty frame")?;
        if size != session.frame_size() {
            session.resize(size);
        }

        let segment_start = Instant::now();
        let segmentation = session
            .model
            .segment(&frame, &session.options.segment)
            .context("Failed to segment frame")?;
        let mask = to_mask(
            &segmentation,
            session.options.foreground,
            session.options.background,
            size,
        )?;
        self.stats.segment += segment_start.elapsed();

        let composite_start = Instant::now();
        match session.backgrounds.current().and_then(|bg| bg.frame_for(size)) {
            Some(background) => session
                .canvas
                .with_composite_op(CompositeOp::Copy)
                .draw_image_scaled(&background, 0, 0, size.width, size.height),
            None => session.canvas.clear(),
        }

        let cutout = session.blend.cutout(&mask, &frame)?;
        session.canvas.draw_image(cutout, 0, 0);
        self.stats.composite += composite_start.elapsed();

        let output_start = Instant::now();
        let shown = if session.options.show_mask {
            &mask
        } else {
            session.canvas.pixels()
        };
        session
            .output
            .write_frame(shown)
            .context("Failed to write frame")?;
        self.stats.output += output_start.elapsed();

        self.stats.frames += 1;
        if self.stats.frames % STATS_INTERVAL == 0 {
            self.stats.log();
        }

        Ok(())
    }
}
