use image::{imageops::FilterType, RgbImage};
use ndarray::Array4;

/// ImageNet channel statistics used by every classification backbone
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Gray fill used for letterbox padding
const LETTERBOX_FILL: f32 = 114.0 / 255.0;

/// Mapping from letterboxed model-input coordinates back to the source image
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
}

impl Letterbox {
    pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Image → tensor transforms
pub struct ImageTransforms;

impl ImageTransforms {
    /// Resize to `width`x`height` (bilinear, aspect not kept), scale to [0,1],
    /// normalize per channel and lay out as `(1, 3, H, W)`.
    pub fn classification_input(image: &RgbImage, width: u32, height: u32) -> Array4<f32> {
        let resized = image::imageops::resize(image, width, height, FilterType::Triangle);

        let mut input = Array4::<f32>::zeros((1, 3, height as usize, width as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                let value = pixel[c] as f32 / 255.0;
                input[[0, c, y as usize, x as usize]] = (value - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
            }
        }

        input
    }

    /// Fit the image into a `size`x`size` square keeping its aspect ratio,
    /// pad the rest with gray, scale to [0,1] and lay out as `(1, 3, S, S)`.
    pub fn letterbox(image: &RgbImage, size: u32) -> (Array4<f32>, Letterbox) {
        let (orig_w, orig_h) = image.dimensions();
        let scale = (size as f32 / orig_w as f32).min(size as f32 / orig_h as f32);

        let new_w = ((orig_w as f32 * scale).round() as u32).clamp(1, size);
        let new_h = ((orig_h as f32 * scale).round() as u32).clamp(1, size);
        let offset_x = (size - new_w) / 2;
        let offset_y = (size - new_h) / 2;

        let resized = image::imageops::resize(image, new_w, new_h, FilterType::Triangle);

        let side = size as usize;
        let mut input = Array4::<f32>::from_elem((1, 3, side, side), LETTERBOX_FILL);
        for (x, y, pixel) in resized.enumerate_pixels() {
            let (ty, tx) = ((y + offset_y) as usize, (x + offset_x) as usize);
            for c in 0..3 {
                input[[0, c, ty, tx]] = pixel[c] as f32 / 255.0;
            }
        }

        let letterbox = Letterbox {
            scale,
            pad_x: offset_x as f32,
            pad_y: offset_y as f32,
        };

        (input, letterbox)
    }
}
