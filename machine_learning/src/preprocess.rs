//! The transform every X-ray goes through before entering the model.

use std::path::Path;

use image::{DynamicImage, GrayImage, Luma, imageops::FilterType};
use ndarray::{Array4, ArrayD};

use crate::Result;

/// Side of the square images the models take.
pub const IMAGE_SIZE: u32 = 256;

const MEAN: f32 = 0.5;
const STD: f32 = 0.5;

/// Converts `img` to 8 bit grayscale with the ITU-R 601 weights
/// `0.299 R + 0.587 G + 0.114 B`, in 16 bit fixed point with rounding.
pub fn to_luma601(img: &DynamicImage) -> GrayImage {
    let rgb = img.to_rgb8();

    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0.map(u32::from);
        let luma = (r * 19595 + g * 38470 + b * 7471 + 0x8000) >> 16;
        Luma([luma as u8])
    })
}

/// Grayscales, resizes to 256x256 and normalizes `img` into a `(1, 1, 256, 256)` array.
pub fn preprocess(img: &DynamicImage) -> ArrayD<f32> {
    let gray = to_luma601(img);
    let resized = image::imageops::resize(&gray, IMAGE_SIZE, IMAGE_SIZE, FilterType::Triangle);
    let size = IMAGE_SIZE as usize;

    Array4::from_shape_fn((1, 1, size, size), |(_, _, y, x)| {
        let v = resized.get_pixel(x as u32, y as u32)[0] as f32 / 255.0;
        (v - MEAN) / STD
    })
    .into_dyn()
}

/// Loads the image at `path` and preprocesses it.
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<ArrayD<f32>> {
    let img = image::open(path)?;
    Ok(preprocess(&img))
}
