//! Replacement background assets.
//!
//! The manager holds at most one loaded asset behind an `Arc`. Swapping in a
//! new asset replaces the reference under a short write lock; the old asset is
//! never touched in place, so a frame that already holds the previous `Arc`
//! finishes drawing it unharmed.

#[cfg(feature = "video-ffmpeg")]
mod ffmpeg;
mod video;

pub use video::{FrameSender, VideoStream};

use crate::compositor::FrameSize;
use anyhow::{Context, Result};
use image::codecs::gif::GifDecoder;
use image::imageops::{self, FilterType};
use image::{AnimationDecoder, ImageFormat, ImageReader, RgbaImage};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

/// Browsers clamp zero-delay animation frames to roughly this
const DEFAULT_FRAME_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundMode {
    Image,
    Video,
}

/// Looping sequence of frames with their display durations
///
/// Only [`BackgroundMedia::from_frames`] builds one, so it always holds at
/// least two frames.
pub struct Animation {
    frames: Vec<(Arc<RgbaImage>, Duration)>,
    period: Duration,
}

impl Animation {
    fn frame_at(&self, elapsed: Duration) -> Option<Arc<RgbaImage>> {
        let mut offset = Duration::from_nanos((elapsed.as_nanos() % self.period.as_nanos().max(1)) as u64);
        for (image, delay) in &self.frames {
            if offset < *delay {
                return Some(Arc::clone(image));
            }
            offset -= *delay;
        }
        self.frames.last().map(|(image, _)| Arc::clone(image))
    }
}

/// Decoded background asset
pub enum BackgroundMedia {
    Still(Arc<RgbaImage>),
    Animation(Animation),
    /// Decoded continuously on its own thread, rewinding at the end
    Video(VideoStream),
}

impl BackgroundMedia {
    pub fn still(image: RgbaImage) -> Self {
        BackgroundMedia::Still(Arc::new(image))
    }

    /// Decode a background file
    ///
    /// The format comes from the file's contents, not its extension.
    /// Animated GIFs become looping animations, other images become stills,
    /// and anything `image` does not recognise is opened as a video.
    pub fn open(path: &Path) -> Result<Self> {
        let reader = ImageReader::open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?
            .with_guessed_format()
            .with_context(|| format!("Failed to read {}", path.display()))?;

        match reader.format() {
            Some(ImageFormat::Gif) => Self::open_gif(path),
            Some(_) => {
                let image = reader
                    .decode()
                    .with_context(|| format!("Failed to decode image {}", path.display()))?;
                Ok(Self::still(image.to_rgba8()))
            }
            None => Self::open_video(path),
        }
    }

    fn open_gif(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let decoder = GifDecoder::new(BufReader::new(file))
            .with_context(|| format!("Failed to read GIF {}", path.display()))?;
        let frames = decoder
            .into_frames()
            .collect_frames()
            .with_context(|| format!("Failed to decode GIF {}", path.display()))?;

        let frames: Vec<(RgbaImage, Duration)> = frames
            .into_iter()
            .map(|frame| {
                let delay = Duration::from(frame.delay());
                let delay = if delay.is_zero() { DEFAULT_FRAME_DELAY } else { delay };
                (frame.into_buffer(), delay)
            })
            .collect();

        Self::from_frames(frames).with_context(|| format!("GIF {} has no frames", path.display()))
    }

    #[cfg(feature = "video-ffmpeg")]
    fn open_video(path: &Path) -> Result<Self> {
        Ok(BackgroundMedia::Video(ffmpeg::open(path)?))
    }

    #[cfg(not(feature = "video-ffmpeg"))]
    fn open_video(path: &Path) -> Result<Self> {
        anyhow::bail!(
            "{} is not a recognised image; video backgrounds need the video-ffmpeg feature",
            path.display()
        )
    }

    /// Build an animation, collapsing single-frame input to a still
    pub fn from_frames(mut frames: Vec<(RgbaImage, Duration)>) -> Option<Self> {
        match frames.len() {
            0 => None,
            1 => frames.pop().map(|(image, _)| Self::still(image)),
            _ => {
                let period = frames.iter().map(|(_, delay)| *delay).sum();
                let frames = frames
                    .into_iter()
                    .map(|(image, delay)| (Arc::new(image), delay))
                    .collect();
                Some(BackgroundMedia::Animation(Animation { frames, period }))
            }
        }
    }

    pub fn mode(&self) -> BackgroundMode {
        match self {
            BackgroundMedia::Still(_) => BackgroundMode::Image,
            BackgroundMedia::Animation(_) | BackgroundMedia::Video(_) => BackgroundMode::Video,
        }
    }

    /// Frame to show `elapsed` after the asset was adopted
    pub fn frame_at(&self, elapsed: Duration) -> Option<Arc<RgbaImage>> {
        match self {
            BackgroundMedia::Still(image) => Some(Arc::clone(image)),
            BackgroundMedia::Animation(animation) => animation.frame_at(elapsed),
            BackgroundMedia::Video(stream) => Some(stream.current()),
        }
    }
}

/// Last resampled frame, reused while neither the source frame nor the
/// target size changes
struct ScaledFrame {
    size: FrameSize,
    source: Arc<RgbaImage>,
    scaled: Arc<RgbaImage>,
}

/// A background adopted by the manager
pub struct LoadedBackground {
    media: BackgroundMedia,
    source: Option<PathBuf>,
    adopted_at: Instant,
    scaled: Mutex<Option<ScaledFrame>>,
}

impl LoadedBackground {
    fn new(media: BackgroundMedia, source: Option<PathBuf>) -> Self {
        Self {
            media,
            source,
            adopted_at: Instant::now(),
            scaled: Mutex::new(None),
        }
    }

    pub fn media(&self) -> &BackgroundMedia {
        &self.media
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// The frame to draw right now, at its own size
    pub fn current_frame(&self) -> Option<Arc<RgbaImage>> {
        self.media.frame_at(self.adopted_at.elapsed())
    }

    /// The frame to draw right now, resampled to `size`
    ///
    /// A still is resampled once per output size, not once per render.
    pub fn frame_for(&self, size: FrameSize) -> Option<Arc<RgbaImage>> {
        let frame = self.current_frame()?;
        if FrameSize::of(&*frame) == size {
            return Some(frame);
        }

        let mut cache = self.scaled.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(hit) = cache
            .as_ref()
            .filter(|hit| hit.size == size && Arc::ptr_eq(&hit.source, &frame))
        {
            return Some(Arc::clone(&hit.scaled));
        }

        tracing::debug!("Resampling background {} -> {}", FrameSize::of(&*frame), size);
        let scaled = Arc::new(imageops::resize(
            &*frame,
            size.width,
            size.height,
            FilterType::Triangle,
        ));
        *cache = Some(ScaledFrame {
            size,
            source: frame,
            scaled: Arc::clone(&scaled),
        });
        Some(scaled)
    }
}

/// Holds the current background and swaps it on request
#[derive(Default)]
pub struct BackgroundManager {
    current: RwLock<Option<Arc<LoadedBackground>>>,
}

impl BackgroundManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// The background to draw this frame, if any
    pub fn current(&self) -> Option<Arc<LoadedBackground>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn mode(&self) -> Option<BackgroundMode> {
        self.current().map(|bg| bg.media.mode())
    }

    /// Adopt already-decoded media
    pub fn replace(&self, media: BackgroundMedia) {
        self.swap(Some(Arc::new(LoadedBackground::new(media, None))));
    }

    /// Decode `path` and adopt it
    ///
    /// On failure the background becomes absent and the error is returned
    /// for the caller to report.
    pub fn replace_from_path(&self, path: &Path) -> Result<BackgroundMode> {
        match BackgroundMedia::open(path) {
            Ok(media) => {
                let mode = media.mode();
                tracing::info!("Background set to {} ({:?})", path.display(), mode);
                self.swap(Some(Arc::new(LoadedBackground::new(media, Some(path.to_path_buf())))));
                Ok(mode)
            }
            Err(err) => {
                self.clear();
                Err(err)
            }
        }
    }

    pub fn clear(&self) {
        if self.swap(None) {
            tracing::info!("Background cleared");
        }
    }

    /// Returns whether a previous background was released
    fn swap(&self, next: Option<Arc<LoadedBackground>>) -> bool {
        let previous = {
            let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *current, next)
        };

        match previous {
            Some(old) => {
                if let Some(source) = old.source() {
                    tracing::debug!("Releasing background {}", source.display());
                }
                true
            }
            None => false,
        }
    }
}
