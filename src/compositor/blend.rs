use super::{CompositeOp, FrameError, FrameSize, Surface};
use image::{RgbImage, RgbaImage};

/// Off-screen surface that turns a mask and a video frame into a cutout
///
/// The buffer is allocated once per frame size and reused; every call to
/// [`BlendBuffer::cutout`] starts from a cleared surface so nothing carries
/// over between frames.
pub struct BlendBuffer {
    surface: Surface,
}

impl BlendBuffer {
    pub fn new(size: FrameSize) -> Self {
        Self {
            surface: Surface::new(size),
        }
    }

    pub fn size(&self) -> FrameSize {
        self.surface.size()
    }

    pub fn resize(&mut self, size: FrameSize) {
        self.surface.resize(size);
    }

    pub fn composite_op(&self) -> CompositeOp {
        self.surface.composite_op()
    }

    /// Keep the video's pixels where the mask is opaque
    ///
    /// Returns the buffer contents: live subject pixels, fully transparent
    /// everywhere the mask was transparent.
    pub fn cutout(&mut self, mask: &RgbaImage, video: &RgbImage) -> Result<&RgbaImage, FrameError> {
        let _span = tracing::debug_span!("cutout").entered();

        let expected = self.size();
        for (what, actual) in [("mask", FrameSize::of(mask)), ("video frame", FrameSize::of(video))] {
            if actual != expected {
                return Err(FrameError::BufferSize {
                    what,
                    expected,
                    actual,
                });
            }
        }

        self.surface.clear();
        self.surface.put_image(mask, 0, 0);
        self.surface
            .with_composite_op(CompositeOp::SourceIn)
            .draw_image(video, 0, 0);

        Ok(self.surface.pixels())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, Rgba};

    fn gradient_video(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| Rgb([x as u8 * 10, y as u8 * 10, 99]))
    }

    fn left_half_mask(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, _| {
            if x < width / 2 {
                Rgba([0, 0, 0, 255])
            } else {
                Rgba([0, 0, 0, 0])
            }
        })
    }

    #[test]
    fn cutout_keeps_video_under_opaque_mask_only() {
        let mut buffer = BlendBuffer::new(FrameSize::new(8, 4).unwrap());
        let video = gradient_video(8, 4);
        let cutout = buffer.cutout(&left_half_mask(8, 4), &video).unwrap();

        for (x, y, pixel) in cutout.enumerate_pixels() {
            if x < 4 {
                let v = video.get_pixel(x, y);
                assert_eq!(*pixel, Rgba([v[0], v[1], v[2], 255]));
            } else {
                assert_eq!(*pixel, Rgba([0, 0, 0, 0]));
            }
        }
    }

    #[test]
    fn repeated_cutouts_are_identical() {
        let mut buffer = BlendBuffer::new(FrameSize::new(8, 4).unwrap());
        let video = gradient_video(8, 4);
        let mask = left_half_mask(8, 4);

        let first = buffer.cutout(&mask, &video).unwrap().clone();
        assert_eq!(buffer.composite_op(), CompositeOp::SourceOver);
        let second = buffer.cutout(&mask, &video).unwrap().clone();

        assert_eq!(first, second);
        assert_eq!(buffer.composite_op(), CompositeOp::SourceOver);
    }

    #[test]
    fn previous_frame_does_not_ghost() {
        let mut buffer = BlendBuffer::new(FrameSize::new(4, 4).unwrap());
        let video = gradient_video(4, 4);

        buffer
            .cutout(&RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 255])), &video)
            .unwrap();
        let cutout = buffer
            .cutout(&RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 0])), &video)
            .unwrap();

        assert!(cutout.pixels().all(|p| *p == Rgba([0, 0, 0, 0])));
    }

    #[test]
    fn rejects_inputs_of_the_wrong_size() {
        let mut buffer = BlendBuffer::new(FrameSize::new(4, 4).unwrap());
        let err = buffer
            .cutout(&left_half_mask(4, 4), &gradient_video(4, 2))
            .unwrap_err();

        assert!(matches!(err, FrameError::BufferSize { what: "video frame", .. }));
    }
}
