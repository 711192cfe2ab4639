//! Looping video backgrounds decoded with FFmpeg.

use super::video::{FrameSender, VideoStream};
use anyhow::{anyhow, bail, Context, Result};
use ffmpeg_next as ffmpeg;
use image::RgbaImage;
use std::path::Path;
use std::time::{Duration, Instant};

/// Used when the container reports no frame rate
const FALLBACK_FRAME_INTERVAL: Duration = Duration::from_nanos(1_000_000_000 / 30);

/// Open `path` and start decoding it in a loop
pub fn open(path: &Path) -> Result<VideoStream> {
    let path = path.to_path_buf();
    VideoStream::spawn("background-video", move |frames| decode_looping(&path, frames))
}

fn decode_looping(path: &Path, frames: &FrameSender) -> Result<()> {
    ffmpeg::init().context("Failed to initialize ffmpeg")?;

    let mut input = ffmpeg::format::input(path)
        .with_context(|| format!("Failed to open video {}", path.display()))?;

    let (stream_index, interval, parameters) = {
        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("{} has no video stream", path.display()))?;
        (stream.index(), frame_interval(stream.avg_frame_rate()), stream.parameters())
    };

    let context = ffmpeg::codec::context::Context::from_parameters(parameters)?;
    let decoder = context.decoder().video().context("Failed to open video decoder")?;
    let mut pump = FramePump::new(decoder, interval)?;

    tracing::debug!(
        "Video background {} at {}x{}, {:.1}ms per frame",
        path.display(),
        pump.width,
        pump.height,
        interval.as_secs_f64() * 1000.0
    );

    loop {
        let sent_before = pump.sent;

        for (stream, packet) in input.packets() {
            if stream.index() != stream_index {
                continue;
            }
            pump.decoder.send_packet(&packet).context("Failed to decode video packet")?;
            if !pump.drain(frames)? {
                return Ok(());
            }
        }

        pump.decoder.send_eof().context("Failed to flush video decoder")?;
        if !pump.drain(frames)? {
            return Ok(());
        }

        if pump.sent == sent_before {
            bail!("{} has no decodable frames", path.display());
        }

        // Rewind for the next pass
        input.seek(0, ..).context("Failed to rewind video")?;
        pump.decoder.flush();
    }
}

fn frame_interval(rate: ffmpeg::Rational) -> Duration {
    let fps = f64::from(rate);
    if fps.is_finite() && fps > 0.0 {
        Duration::from_secs_f64(1.0 / fps)
    } else {
        FALLBACK_FRAME_INTERVAL
    }
}

/// Decoder plus RGBA conversion, paced to the clip's frame rate
struct FramePump {
    decoder: ffmpeg::decoder::Video,
    scaler: ffmpeg::software::scaling::context::Context,
    decoded: ffmpeg::frame::Video,
    rgba: ffmpeg::frame::Video,
    width: u32,
    height: u32,
    interval: Duration,
    next_due: Instant,
    sent: u64,
}

impl FramePump {
    fn new(decoder: ffmpeg::decoder::Video, interval: Duration) -> Result<Self> {
        let (width, height) = (decoder.width(), decoder.height());
        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            width,
            height,
            ffmpeg::format::Pixel::RGBA,
            width,
            height,
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("Failed to create RGBA converter")?;

        Ok(Self {
            decoder,
            scaler,
            decoded: ffmpeg::frame::Video::empty(),
            rgba: ffmpeg::frame::Video::empty(),
            width,
            height,
            interval,
            next_due: Instant::now(),
            sent: 0,
        })
    }

    /// Send every frame the decoder has ready; `false` once nobody listens
    fn drain(&mut self, frames: &FrameSender) -> Result<bool> {
        while self.decoder.receive_frame(&mut self.decoded).is_ok() {
            self.scaler
                .run(&self.decoded, &mut self.rgba)
                .context("Failed to convert video frame")?;
            let image = to_image(&self.rgba, self.width, self.height)?;

            let now = Instant::now();
            if self.next_due > now {
                std::thread::sleep(self.next_due - now);
            }
            self.next_due = self.next_due.max(now) + self.interval;

            if !frames.send(image) {
                return Ok(false);
            }
            self.sent += 1;
        }
        Ok(true)
    }
}

/// Copy a packed RGBA frame row by row, dropping stride padding
fn to_image(frame: &ffmpeg::frame::Video, width: u32, height: u32) -> Result<RgbaImage> {
    let stride = frame.stride(0);
    let data = frame.data(0);
    let row_bytes = width as usize * 4;

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let line = data
            .get(start..start + row_bytes)
            .ok_or_else(|| anyhow!("video frame shorter than {}x{}", width, height))?;
        pixels.extend_from_slice(line);
    }

    RgbaImage::from_raw(width, height, pixels)
        .ok_or_else(|| anyhow!("video frame does not fill {}x{}", width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_interval_follows_the_stream_rate() {
        assert_eq!(frame_interval(ffmpeg::Rational::new(4, 1)), Duration::from_millis(250));
        assert_eq!(frame_interval(ffmpeg::Rational::new(0, 1)), FALLBACK_FRAME_INTERVAL);
        assert_eq!(frame_interval(ffmpeg::Rational::new(30, 0)), FALLBACK_FRAME_INTERVAL);
    }

    #[test]
    fn missing_file_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        assert!(open(&dir.path().join("missing.mp4")).is_err());
    }
}
