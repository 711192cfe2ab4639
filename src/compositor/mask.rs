use super::{ColorKey, FrameError, FrameSize};
use crate::segmentation::SegmentationResult;
use image::RgbaImage;

/// Tint a segmentation into a drawable mask
///
/// Person pixels take `foreground`, every other pixel takes `background`.
/// Edges are hard: there is no feathering between the two classes.
///
/// A result that does not match `expected` is an upstream contract
/// violation and is reported rather than resized.
pub fn to_mask(
    segmentation: &SegmentationResult,
    foreground: ColorKey,
    background: ColorKey,
    expected: FrameSize,
) -> Result<RgbaImage, FrameError> {
    let _span = tracing::debug_span!("to_mask").entered();

    let actual = segmentation.size();
    if actual != expected {
        return Err(FrameError::SegmentationSize { expected, actual });
    }

    let fg = foreground.to_rgba();
    let bg = background.to_rgba();

    Ok(RgbaImage::from_fn(actual.width, actual.height, |x, y| {
        if segmentation.is_person(x, y) {
            fg
        } else {
            bg
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    const RED: ColorKey = ColorKey::new(255, 0, 0, 255);
    const CLEAR_GREEN: ColorKey = ColorKey::new(0, 255, 0, 0);

    fn checkerboard(width: u32, height: u32) -> SegmentationResult {
        SegmentationResult::from_fn(width, height, |x, y| (x + y) % 2 == 0)
    }

    #[test]
    fn mask_matches_segmentation_dimensions() {
        for (width, height) in [(1, 1), (7, 3), (64, 48)] {
            let size = FrameSize::new(width, height).unwrap();
            let mask = to_mask(&checkerboard(width, height), RED, CLEAR_GREEN, size).unwrap();
            assert_eq!(mask.dimensions(), (width, height));
        }
    }

    #[test]
    fn every_pixel_takes_one_of_the_two_keys() {
        let size = FrameSize::new(9, 5).unwrap();
        let segmentation = checkerboard(9, 5);
        let mask = to_mask(&segmentation, RED, CLEAR_GREEN, size).unwrap();

        for (x, y, pixel) in mask.enumerate_pixels() {
            let expected = if segmentation.is_person(x, y) {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([0, 255, 0, 0])
            };
            assert_eq!(*pixel, expected, "pixel ({x}, {y})");
        }
    }

    #[test]
    fn mismatched_segmentation_fails_loudly() {
        let expected = FrameSize::new(10, 10).unwrap();
        let err = to_mask(&checkerboard(10, 8), RED, CLEAR_GREEN, expected).unwrap_err();

        assert_eq!(
            err,
            FrameError::SegmentationSize {
                expected,
                actual: FrameSize { width: 10, height: 8 },
            }
        );
    }
}
