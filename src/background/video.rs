//! Frames produced by a decoder thread.
//!
//! The decoder owns everything it needs on its own thread and hands frames
//! over a one-slot channel. The render thread takes whatever has arrived and
//! keeps showing the last frame until a newer one lands. Dropping the stream
//! drops the receiver, which ends the decoder at its next send.

use anyhow::{bail, Context, Result};
use image::RgbaImage;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

/// Decoder side of a [`VideoStream`]
pub struct FrameSender(SyncSender<Result<RgbaImage>>);

impl FrameSender {
    /// Hand over the next frame, blocking while the previous one is unread
    ///
    /// Returns `false` once the stream has been dropped; the decoder should
    /// return then.
    pub fn send(&self, frame: RgbaImage) -> bool {
        self.0.send(Ok(frame)).is_ok()
    }
}

struct Playback {
    frames: Option<Receiver<Result<RgbaImage>>>,
    latest: Arc<RgbaImage>,
}

/// A background whose frames come from a decoder thread
pub struct VideoStream {
    playback: Mutex<Playback>,
    worker: Option<JoinHandle<()>>,
}

impl VideoStream {
    /// Start `decode` on its own thread and wait for its first frame
    ///
    /// An error returned before the first frame is returned here. Later
    /// errors are logged and the last good frame stays on screen.
    pub fn spawn<F>(name: &str, decode: F) -> Result<Self>
    where
        F: FnOnce(&FrameSender) -> Result<()> + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(1);
        let worker = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let sender = FrameSender(tx);
                if let Err(err) = decode(&sender) {
                    // Receiver may already be gone
                    let _ = sender.0.send(Err(err));
                }
            })
            .context("Failed to start video decoder thread")?;

        let first = match rx.recv() {
            Ok(Ok(frame)) => frame,
            Ok(Err(err)) => {
                let _ = worker.join();
                return Err(err);
            }
            Err(_) => {
                let _ = worker.join();
                bail!("video produced no frames");
            }
        };

        Ok(Self {
            playback: Mutex::new(Playback {
                frames: Some(rx),
                latest: Arc::new(first),
            }),
            worker: Some(worker),
        })
    }

    /// Newest decoded frame
    pub fn current(&self) -> Arc<RgbaImage> {
        let mut playback = self.playback.lock().unwrap_or_else(PoisonError::into_inner);
        let Playback { frames, latest } = &mut *playback;

        if let Some(rx) = frames {
            while let Ok(message) = rx.try_recv() {
                match message {
                    Ok(frame) => *latest = Arc::new(frame),
                    Err(err) => tracing::warn!("Video background stalled: {:#}", err),
                }
            }
        }

        Arc::clone(latest)
    }
}

impl Drop for VideoStream {
    fn drop(&mut self) {
        // Closing the channel first unblocks a decoder waiting in `send`
        self.playback
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .frames
            .take();

        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!("Video decoder thread panicked");
            }
        }
    }
}
