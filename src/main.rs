use anyhow::{Context, Result};
use backdrop::background::BackgroundManager;
use backdrop::capture::WebcamCapture;
use backdrop::compositor::ColorKey;
use backdrop::output::V4L2Output;
use backdrop::render::{RenderLoop, StopToken};
use backdrop::segmentation::{self, InternalResolution, PassthroughModel, SegmentOptions, SegmentationModel};
use backdrop::session::{Session, SessionOptions};
use clap::Parser;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input webcam device index
    #[arg(short, long, default_value_t = 0)]
    input_device: u32,

    /// Output v4l2loopback device path
    #[arg(short, long, default_value = "/dev/video10")]
    output_device: String,

    /// Requested capture width (the camera may negotiate another)
    #[arg(long, default_value_t = 1280)]
    capture_width: u32,

    /// Requested capture height (the camera may negotiate another)
    #[arg(long, default_value_t = 720)]
    capture_height: u32,

    /// Output resolution width
    #[arg(long, default_value_t = 1280)]
    output_width: u32,

    /// Output resolution height
    #[arg(long, default_value_t = 720)]
    output_height: u32,

    /// Target frames per second (0 renders as fast as segmentation allows)
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Path to segmentation model (ONNX file)
    /// If not provided, runs in passthrough mode without segmentation
    #[arg(long)]
    model: Option<String>,

    /// Initial background: image, animated GIF, or video (video-ffmpeg feature)
    ///
    /// Further paths can be sent one per line on stdin; an empty line
    /// clears the background.
    #[arg(short, long)]
    background: Option<PathBuf>,

    /// Mask colour for person pixels, as r,g,b,a
    #[arg(long, default_value = "0,0,0,255")]
    foreground_color: ColorKey,

    /// Mask colour for background pixels, as r,g,b,a
    #[arg(long, default_value = "0,0,0,0")]
    background_color: ColorKey,

    /// Mirror the input before segmenting
    #[arg(long)]
    flip_horizontal: bool,

    /// Model working resolution relative to the frame
    #[arg(long, value_enum, default_value_t = InternalResolution::Medium)]
    internal_resolution: InternalResolution,

    /// Probability above which a pixel counts as person
    #[arg(long, default_value_t = 0.7, value_parser = parse_threshold)]
    segmentation_threshold: f32,

    /// Show the tinted segmentation mask instead of the composite
    #[arg(long)]
    show_mask: bool,
}

fn parse_threshold(s: &str) -> Result<f32, String> {
    let value: f32 = s.parse().map_err(|_| format!("{s:?} is not a number"))?;
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("threshold must be within [0, 1], got {value}"))
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    tracing::info!("Backdrop starting");
    tracing::info!("Capture: {}x{} requested", args.capture_width, args.capture_height);
    tracing::info!("Output: {}x{}", args.output_width, args.output_height);
    tracing::info!("Target FPS: {}", args.fps);

    // Load the model first; nothing renders until it is ready
    let model: Box<dyn SegmentationModel> = if let Some(model_path) = &args.model {
        tracing::info!("Waiting for segmentation model {}...", model_path);
        let model = segmentation::create_default_model(model_path)
            .context("Failed to load segmentation model")?;
        tracing::info!("Segmentation model ready");
        model
    } else {
        tracing::info!("Running in passthrough mode (no segmentation)");
        Box::new(PassthroughModel)
    };

    let capture = WebcamCapture::new(
        args.input_device,
        args.capture_width,
        args.capture_height,
        args.fps.max(1),
    )
    .context("Failed to initialize webcam capture")?;

    let output = V4L2Output::new(&args.output_device, args.output_width, args.output_height)
        .context("Failed to initialize v4l2loopback output")?;

    let backgrounds = Arc::new(BackgroundManager::new());
    if let Some(path) = &args.background {
        if let Err(err) = backgrounds.replace_from_path(path) {
            tracing::warn!("Starting without a background: {:#}", err);
        }
    }
    spawn_background_reader(Arc::clone(&backgrounds))?;

    let options = SessionOptions {
        foreground: args.foreground_color,
        background: args.background_color,
        segment: SegmentOptions {
            flip_horizontal: args.flip_horizontal,
            internal_resolution: args.internal_resolution,
            segmentation_threshold: args.segmentation_threshold,
        },
        show_mask: args.show_mask,
    };
    let session = Session::new(capture, output, model, backgrounds, options)?;

    let stop = StopToken::new();
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        tracing::info!("Stop requested");
        handler_stop.stop();
    })
    .context("Failed to install Ctrl+C handler")?;

    tracing::info!("Press Ctrl+C to stop");
    let mut render_loop = RenderLoop::new(session, stop, Some(args.fps));
    render_loop.run()?;

    render_loop.into_session().teardown()
}

/// Read replacement background paths from stdin, one per line
fn spawn_background_reader(backgrounds: Arc<BackgroundManager>) -> Result<()> {
    std::thread::Builder::new()
        .name("background-input".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(err) => {
                        tracing::warn!("Stopped reading backgrounds from stdin: {}", err);
                        return;
                    }
                };

                let path = line.trim();
                if path.is_empty() {
                    backgrounds.clear();
                } else if let Err(err) = backgrounds.replace_from_path(Path::new(path)) {
                    tracing::warn!("Background cleared, could not load {}: {:#}", path, err);
                }
            }
        })
        .context("Failed to start background input thread")?;

    Ok(())
}
