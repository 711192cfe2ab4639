use super::FrameSize;
use image::{imageops, GenericImageView, Pixel, Rgba, RgbaImage};
use std::ops::{Deref, DerefMut};

const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// How newly drawn pixels combine with what the surface already holds
///
/// Alpha is straight (not premultiplied), matching what `RgbaImage` stores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CompositeOp {
    /// Draw over existing pixels, blending by source alpha
    #[default]
    SourceOver,
    /// Keep source colour only where the destination is opaque; the result
    /// alpha is the product of both alphas and uncovered pixels are cleared
    SourceIn,
    /// Replace destination pixels; uncovered pixels are cleared
    Copy,
}

impl CompositeOp {
    fn apply(self, src: Rgba<u8>, dst: Rgba<u8>) -> Rgba<u8> {
        match self {
            CompositeOp::Copy => src,
            CompositeOp::SourceIn => source_in(src, dst),
            CompositeOp::SourceOver => source_over(src, dst),
        }
    }

    /// Result for destination pixels the drawn image does not cover
    fn uncovered(self, dst: Rgba<u8>) -> Rgba<u8> {
        match self {
            CompositeOp::SourceOver => dst,
            CompositeOp::SourceIn | CompositeOp::Copy => TRANSPARENT,
        }
    }
}

fn source_in(src: Rgba<u8>, dst: Rgba<u8>) -> Rgba<u8> {
    let alpha = (src[3] as u32 * dst[3] as u32 + 127) / 255;
    if alpha == 0 {
        return TRANSPARENT;
    }
    Rgba([src[0], src[1], src[2], alpha as u8])
}

fn source_over(src: Rgba<u8>, dst: Rgba<u8>) -> Rgba<u8> {
    let sa = src[3] as u32;
    match sa {
        255 => return src,
        0 => return dst,
        _ => {}
    }

    let da = dst[3] as u32;
    // Output alpha scaled by 255
    let out_a = sa * 255 + da * (255 - sa);
    if out_a == 0 {
        return TRANSPARENT;
    }

    let mut out = [0u8; 4];
    for c in 0..3 {
        let num = src[c] as u32 * sa * 255 + dst[c] as u32 * da * (255 - sa);
        out[c] = ((num + out_a / 2) / out_a) as u8;
    }
    out[3] = ((out_a + 127) / 255) as u8;
    Rgba(out)
}

/// An RGBA drawing target with a settable compositing rule
pub struct Surface {
    pixels: RgbaImage,
    op: CompositeOp,
}

impl Surface {
    /// Create a fully transparent surface
    pub fn new(size: FrameSize) -> Self {
        Self {
            pixels: RgbaImage::new(size.width, size.height),
            op: CompositeOp::default(),
        }
    }

    pub fn size(&self) -> FrameSize {
        FrameSize::of(&self.pixels)
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn composite_op(&self) -> CompositeOp {
        self.op
    }

    pub fn set_composite_op(&mut self, op: CompositeOp) {
        self.op = op;
    }

    /// Use `op` until the returned scope is dropped, then restore the
    /// previous rule
    ///
    /// Restoration happens in `Drop`, so it also runs when a draw inside the
    /// scope returns early or panics.
    pub fn with_composite_op(&mut self, op: CompositeOp) -> CompositeScope<'_> {
        let previous = std::mem::replace(&mut self.op, op);
        CompositeScope {
            surface: self,
            previous,
        }
    }

    /// Make every pixel fully transparent
    pub fn clear(&mut self) {
        self.pixels.fill(0);
    }

    /// Reallocate to `size` if it differs; the surface is cleared either way
    pub fn resize(&mut self, size: FrameSize) {
        if self.size() != size {
            tracing::debug!("Resizing surface {} -> {}", self.size(), size);
            self.pixels = RgbaImage::new(size.width, size.height);
        } else {
            self.clear();
        }
    }

    /// Copy raw pixels at (x, y), ignoring the compositing rule
    pub fn put_image(&mut self, image: &RgbaImage, x: u32, y: u32) {
        imageops::replace(&mut self.pixels, image, x as i64, y as i64);
    }

    /// Draw `image` with its top-left corner at (x, y) using the current rule
    pub fn draw_image<I, P>(&mut self, image: &I, x: i64, y: i64)
    where
        I: GenericImageView<Pixel = P>,
        P: Pixel<Subpixel = u8>,
    {
        let (src_width, src_height) = image.dimensions();
        let op = self.op;

        for (dx, dy, dst) in self.pixels.enumerate_pixels_mut() {
            let sx = dx as i64 - x;
            let sy = dy as i64 - y;
            let covered =
                sx >= 0 && sy >= 0 && sx < src_width as i64 && sy < src_height as i64;

            *dst = if covered {
                let src = image.get_pixel(sx as u32, sy as u32).to_rgba();
                op.apply(src, *dst)
            } else {
                op.uncovered(*dst)
            };
        }
    }

    /// Draw `image` stretched to `width` x `height` at (x, y)
    pub fn draw_image_scaled(&mut self, image: &RgbaImage, x: i64, y: i64, width: u32, height: u32) {
        if image.dimensions() == (width, height) {
            self.draw_image(image, x, y);
            return;
        }

        let resized = imageops::resize(image, width, height, imageops::FilterType::Triangle);
        self.draw_image(&resized, x, y);
    }
}

/// Scoped compositing rule on a [`Surface`]
pub struct CompositeScope<'a> {
    surface: &'a mut Surface,
    previous: CompositeOp,
}

impl Deref for CompositeScope<'_> {
    type Target = Surface;

    fn deref(&self) -> &Surface {
        self.surface
    }
}

impl DerefMut for CompositeScope<'_> {
    fn deref_mut(&mut self) -> &mut Surface {
        self.surface
    }
}

impl Drop for CompositeScope<'_> {
    fn drop(&mut self) {
        self.surface.op = self.previous;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    fn size(width: u32, height: u32) -> FrameSize {
        FrameSize::new(width, height).unwrap()
    }

    #[test]
    fn source_in_keeps_colour_only_under_opaque_pixels() {
        let mut surface = Surface::new(size(2, 1));
        let mut mask = RgbaImage::new(2, 1);
        mask.put_pixel(0, 0, Rgba([0, 0, 0, 255]));
        mask.put_pixel(1, 0, Rgba([0, 255, 0, 0]));
        surface.put_image(&mask, 0, 0);

        let video = RgbImage::from_pixel(2, 1, image::Rgb([10, 20, 30]));
        surface.with_composite_op(CompositeOp::SourceIn).draw_image(&video, 0, 0);

        assert_eq!(*surface.pixels().get_pixel(0, 0), Rgba([10, 20, 30, 255]));
        assert_eq!(*surface.pixels().get_pixel(1, 0), TRANSPARENT);
    }

    #[test]
    fn source_in_clears_pixels_outside_the_drawn_image() {
        let mut surface = Surface::new(size(2, 2));
        surface.put_image(&RgbaImage::from_pixel(2, 2, Rgba([1, 2, 3, 255])), 0, 0);

        let small = RgbaImage::from_pixel(1, 1, Rgba([9, 9, 9, 255]));
        surface.with_composite_op(CompositeOp::SourceIn).draw_image(&small, 0, 0);

        assert_eq!(*surface.pixels().get_pixel(0, 0), Rgba([9, 9, 9, 255]));
        assert_eq!(*surface.pixels().get_pixel(1, 1), TRANSPARENT);
    }

    #[test]
    fn source_over_blends_by_source_alpha() {
        let over = |src, dst| CompositeOp::SourceOver.apply(Rgba(src), Rgba(dst));

        assert_eq!(over([200, 0, 0, 255], [0, 0, 200, 255]), Rgba([200, 0, 0, 255]));
        assert_eq!(over([200, 0, 0, 0], [0, 0, 200, 255]), Rgba([0, 0, 200, 255]));
        assert_eq!(over([255, 0, 0, 128], [0, 0, 255, 255]), Rgba([128, 0, 127, 255]));
        assert_eq!(over([255, 0, 0, 128], [0, 0, 0, 0]), Rgba([255, 0, 0, 128]));
    }

    #[test]
    fn source_over_leaves_uncovered_pixels_alone() {
        let mut surface = Surface::new(size(2, 1));
        surface.put_image(&RgbaImage::from_pixel(2, 1, Rgba([5, 5, 5, 255])), 0, 0);
        surface.draw_image(&RgbaImage::from_pixel(1, 1, Rgba([7, 7, 7, 255])), 1, 0);

        assert_eq!(*surface.pixels().get_pixel(0, 0), Rgba([5, 5, 5, 255]));
        assert_eq!(*surface.pixels().get_pixel(1, 0), Rgba([7, 7, 7, 255]));
    }

    #[test]
    fn scope_restores_previous_rule() {
        let mut surface = Surface::new(size(1, 1));
        surface.set_composite_op(CompositeOp::Copy);
        {
            let scoped = surface.with_composite_op(CompositeOp::SourceIn);
            assert_eq!(scoped.composite_op(), CompositeOp::SourceIn);
        }
        assert_eq!(surface.composite_op(), CompositeOp::Copy);
    }

    #[test]
    fn scope_restores_rule_when_draw_panics() {
        let mut surface = Surface::new(size(1, 1));
        let result = catch_unwind(AssertUnwindSafe(|| {
            let _scoped = surface.with_composite_op(CompositeOp::SourceIn);
            panic!("draw failed");
        }));

        assert!(result.is_err());
        assert_eq!(surface.composite_op(), CompositeOp::SourceOver);
    }

    #[test]
    fn scaled_draw_fills_the_target_rectangle() {
        let mut surface = Surface::new(size(4, 4));
        let tile = RgbaImage::from_pixel(2, 2, Rgba([40, 50, 60, 255]));
        surface
            .with_composite_op(CompositeOp::Copy)
            .draw_image_scaled(&tile, 0, 0, 4, 4);

        assert!(surface
            .pixels()
            .pixels()
            .all(|p| p.0.iter().zip([40, 50, 60, 255]).all(|(a, b)| a.abs_diff(b) <= 1)));
    }

    #[test]
    fn resize_reallocates_and_clears() {
        let mut surface = Surface::new(size(2, 2));
        surface.put_image(&RgbaImage::from_pixel(2, 2, Rgba([1, 1, 1, 255])), 0, 0);

        surface.resize(size(3, 1));
        assert_eq!(surface.size(), size(3, 1));
        assert!(surface.pixels().pixels().all(|p| *p == TRANSPARENT));
    }
}
