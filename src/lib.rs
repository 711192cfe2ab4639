//! Real-time webcam background replacement.
//!
//! Frames flow from a [`capture::CaptureSource`] through a
//! [`segmentation::SegmentationModel`], are cut out and composited over the
//! current background by [`render::RenderLoop`], and leave through an
//! [`output::OutputSink`].

pub mod background;
pub mod capture;
pub mod compositor;
pub mod output;
pub mod render;
pub mod segmentation;
pub mod session;
