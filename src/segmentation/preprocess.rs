use anyhow::{ensure, Result};
use image::{imageops, RgbImage};
use ndarray::Array4;

/// Convert an RGB frame into a normalized NCHW tensor
///
/// Steps:
/// 1. Mirror horizontally if requested
/// 2. Convert to float and normalize to [0, 1]
/// 3. Transpose from HWC to NCHW format
///
/// Returns: Array4<f32> with shape [1, 3, height, width]
pub fn frame_to_tensor(image: &RgbImage, flip_horizontal: bool) -> Array4<f32> {
    let _span = tracing::debug_span!("preprocess").entered();

    let flipped;
    let source = if flip_horizontal {
        flipped = imageops::flip_horizontal(image);
        &flipped
    } else {
        image
    };

    let (width, height) = source.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

    for (x, y, pixel) in source.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        tensor[[0, 0, y, x]] = pixel[0] as f32 / 255.0;
        tensor[[0, 1, y, x]] = pixel[1] as f32 / 255.0;
        tensor[[0, 2, y, x]] = pixel[2] as f32 / 255.0;
    }

    tensor
}

/// Resize a model output matte to the frame dimensions
///
/// Returns the matte unchanged when the sizes already agree, which is the
/// normal case for models that upsample internally.
pub fn resize_matte(
    matte: &[f32],
    matte_width: u32,
    matte_height: u32,
    target_width: u32,
    target_height: u32,
) -> Result<Vec<f32>> {
    let _span = tracing::debug_span!("postprocess").entered();

    ensure!(
        matte.len() == matte_width as usize * matte_height as usize,
        "matte holds {} values, expected {}x{}",
        matte.len(),
        matte_width,
        matte_height
    );

    if matte_width == target_width && matte_height == target_height {
        return Ok(matte.to_vec());
    }

    // Convert to grayscale image for resizing
    let gray_image = image::GrayImage::from_fn(matte_width, matte_height, |x, y| {
        let idx = (y * matte_width + x) as usize;
        let value = (matte[idx] * 255.0).clamp(0.0, 255.0) as u8;
        image::Luma([value])
    });

    let resized = imageops::resize(
        &gray_image,
        target_width,
        target_height,
        imageops::FilterType::Triangle,
    );

    Ok(resized.pixels().map(|p| p[0] as f32 / 255.0).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn tensor_is_nchw_and_normalized() {
        let mut frame = RgbImage::new(3, 2);
        frame.put_pixel(2, 1, Rgb([255, 0, 51]));

        let tensor = frame_to_tensor(&frame, false);
        assert_eq!(tensor.shape(), &[1, 3, 2, 3]);
        assert_eq!(tensor[[0, 0, 1, 2]], 1.0);
        assert_eq!(tensor[[0, 1, 1, 2]], 0.0);
        assert!((tensor[[0, 2, 1, 2]] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn flip_mirrors_columns() {
        let mut frame = RgbImage::new(3, 1);
        frame.put_pixel(0, 0, Rgb([255, 255, 255]));

        let tensor = frame_to_tensor(&frame, true);
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        assert_eq!(tensor[[0, 0, 0, 2]], 1.0);
    }

    #[test]
    fn matte_is_resized_to_the_frame() {
        let matte = vec![1.0; 4];
        let resized = resize_matte(&matte, 2, 2, 4, 3).unwrap();
        assert_eq!(resized.len(), 12);
        assert!(resized.iter().all(|&v| v > 0.99));
    }

    #[test]
    fn short_matte_is_an_error() {
        assert!(resize_matte(&[0.5; 3], 2, 2, 2, 2).is_err());
    }
}
