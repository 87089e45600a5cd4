use crate::image::font::{self, GLYPH_HEIGHT};
use crate::inference::types::{Category, Detection};
use crate::Result;
use image::{ImageFormat, Rgb, RgbImage};
use std::io::Cursor;

const WEED_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const CROP_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
const BOX_THICKNESS: u32 = 3;
/// Gap between a caption and the box edge it belongs to
const CAPTION_GAP: i64 = 4;

/// Renders detection boxes and captions onto a copy of the source image
pub struct Annotator;

impl Annotator {
    pub fn color(category: Category) -> Rgb<u8> {
        match category {
            Category::Weed => WEED_COLOR,
            Category::Crop => CROP_COLOR,
        }
    }

    /// Draw every detection onto a copy of `image` and encode it as PNG
    pub fn annotate(image: &RgbImage, detections: &[Detection]) -> Result<Vec<u8>> {
        let rendered = Self::render(image, detections);
        Self::encode_png(&rendered)
    }

    pub fn render(image: &RgbImage, detections: &[Detection]) -> RgbImage {
        let mut canvas = image.clone();
        if canvas.width() == 0 || canvas.height() == 0 {
            return canvas;
        }

        let scale = Self::caption_scale(&canvas);

        for detection in detections {
            let color = Self::color(detection.category);
            let b = detection.bounding_box;

            Self::draw_box(&mut canvas, b.x1, b.y1, b.x2, b.y2, color);

            let caption_height = (GLYPH_HEIGHT * scale) as i64;
            let above = b.y1 as i64 - caption_height - CAPTION_GAP;
            let caption_y = if above >= 0 {
                above
            } else {
                b.y1 as i64 + BOX_THICKNESS as i64 + CAPTION_GAP
            };

            // keep the caption inside the right edge where the box allows it
            let caption = detection.caption();
            let caption_width = font::text_width(&caption, scale) as i64;
            let caption_x = (b.x1 as i64).min(canvas.width() as i64 - caption_width).max(0);

            font::draw_text(&mut canvas, caption_x, caption_y, &caption, color, scale);
        }

        canvas
    }

    pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>> {
        let mut buffer = Cursor::new(Vec::new());
        image.write_to(&mut buffer, ImageFormat::Png)?;
        Ok(buffer.into_inner())
    }

    fn caption_scale(image: &RgbImage) -> u32 {
        if image.width().min(image.height()) >= 480 {
            2
        } else {
            1
        }
    }

    /// Hollow rectangle, `BOX_THICKNESS` pixels wide, growing inwards
    fn draw_box(image: &mut RgbImage, x1: u32, y1: u32, x2: u32, y2: u32, color: Rgb<u8>) {
        let max_x = image.width() - 1;
        let max_y = image.height() - 1;
        let (x1, x2) = (x1.min(x2).min(max_x), x1.max(x2).min(max_x));
        let (y1, y2) = (y1.min(y2).min(max_y), y1.max(y2).min(max_y));

        for t in 0..BOX_THICKNESS {
            let (left, right) = (x1 + t, x2.saturating_sub(t));
            let (top, bottom) = (y1 + t, y2.saturating_sub(t));
            if left > right || top > bottom {
                break;
            }

            for x in left..=right {
                image.put_pixel(x, top, color);
                image.put_pixel(x, bottom, color);
            }
            for y in top..=bottom {
                image.put_pixel(left, y, color);
                image.put_pixel(right, y, color);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::types::BoundingBox;

    fn detection(x1: u32, y1: u32, x2: u32, y2: u32, label: &str) -> Detection {
        Detection {
            bounding_box: BoundingBox { x1, y1, x2, y2 },
            label: label.to_string(),
            confidence: 91.25,
            category: Category::from_label(label),
        }
    }

    #[test]
    fn zero_detections_leave_pixels_untouched() {
        let image = RgbImage::from_fn(40, 30, |x, y| Rgb([x as u8, y as u8, 7]));
        let rendered = Annotator::render(&image, &[]);
        assert_eq!(rendered, image);

        let png = Annotator::annotate(&image, &[]).unwrap();
        let decoded = image::load_from_memory(&png).unwrap().to_rgb8();
        assert_eq!(decoded, image);
    }

    #[test]
    fn boxes_use_category_colors_and_keep_dimensions() {
        let image = RgbImage::from_pixel(100, 80, Rgb([0, 255, 0]));
        let detections = vec![detection(10, 30, 40, 70, "weed"), detection(50, 30, 90, 70, "maize")];

        let rendered = Annotator::render(&image, &detections);
        assert_eq!(rendered.dimensions(), image.dimensions());
        assert_eq!(*rendered.get_pixel(10, 50), WEED_COLOR);
        assert_eq!(*rendered.get_pixel(12, 50), WEED_COLOR);
        assert_eq!(*rendered.get_pixel(90, 50), CROP_COLOR);
        // box interior is untouched
        assert_eq!(*rendered.get_pixel(25, 50), Rgb([0, 255, 0]));
    }

    #[test]
    fn source_buffer_is_not_mutated() {
        let image = RgbImage::from_pixel(50, 50, Rgb([9, 9, 9]));
        let before = image.clone();
        let _ = Annotator::annotate(&image, &[detection(0, 0, 49, 49, "weed")]).unwrap();
        assert_eq!(image, before);
    }

    #[test]
    fn boxes_touching_the_border_are_clipped() {
        let image = RgbImage::new(20, 20);
        let rendered = Annotator::render(&image, &[detection(15, 0, 20, 20, "crop")]);
        assert_eq!(*rendered.get_pixel(19, 19), CROP_COLOR);
    }

    #[test]
    fn caption_is_drawn_near_the_box() {
        let image = RgbImage::new(120, 60);
        let rendered = Annotator::render(&image, &[detection(5, 30, 100, 55, "weed")]);

        let caption_pixels = (0..28)
            .flat_map(|y| (0..120).map(move |x| (x, y)))
            .filter(|&(x, y)| *rendered.get_pixel(x, y) == WEED_COLOR)
            .count();
        assert!(caption_pixels > 0);
    }
}
