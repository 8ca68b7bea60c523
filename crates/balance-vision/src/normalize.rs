use balance_core::{Corner, Frame, NormalizationSettings};
use image::{imageops, Rgb};

/// Turns raw camera frames into the normalized frame: rotated upright, with
/// the corner clutter painted out and the border cropped.
///
/// Every detector backend and the session recorder work in the coordinate space
/// of the normalized frame, so this is the only place raw frames are touched.
#[derive(Debug, Clone, Default)]
pub struct FrameNormalizer {
    settings: NormalizationSettings,
}

impl FrameNormalizer {
    pub fn new(settings: NormalizationSettings) -> Self {
        Self { settings }
    }

    /// Size of the normalized frame for a raw frame of the given size.
    pub fn output_size(&self, raw_width: u32, raw_height: u32) -> (u32, u32) {
        let crop = &self.settings.crop;
        (
            raw_width.saturating_sub(crop.left + crop.right),
            raw_height.saturating_sub(crop.top + crop.bottom),
        )
    }

    pub fn normalize(&self, raw: &Frame) -> Frame {
        let mut frame = if self.settings.rotate_180 {
            imageops::rotate180(raw)
        } else {
            raw.clone()
        };

        let (width, height) = frame.dimensions();
        let gray = Rgb([self.settings.mask_value; 3]);
        for mask in &self.settings.corner_masks {
            let cols = mask.cols.min(width);
            let rows = mask.rows.min(height);
            let (x0, y0) = match mask.corner {
                Corner::TopLeft => (0, 0),
                Corner::TopRight => (width - cols, 0),
                Corner::BottomLeft => (0, height - rows),
                Corner::BottomRight => (width - cols, height - rows),
            };
            for y in y0..y0 + rows {
                for x in x0..x0 + cols {
                    frame.put_pixel(x, y, gray);
                }
            }
        }

        let crop = &self.settings.crop;
        let left = crop.left.min(width);
        let top = crop.top.min(height);
        let (out_width, out_height) = self.output_size(width, height);
        imageops::crop_imm(&frame, left, top, out_width, out_height).to_image()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use balance_core::CropBorders;

    fn raw_frame() -> Frame {
        Frame::from_fn(800, 600, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 7]))
    }

    #[test]
    fn test_default_output_size() {
        let normalizer = FrameNormalizer::default();
        let frame = normalizer.normalize(&raw_frame());
        assert_eq!(frame.dimensions(), (644, 600));
        assert_eq!(normalizer.output_size(800, 600), (644, 600));
    }

    #[test]
    fn test_rotation_and_crop_coordinates() {
        let normalizer = FrameNormalizer::new(NormalizationSettings {
            corner_masks: vec![],
            ..Default::default()
        });
        let raw = raw_frame();
        let frame = normalizer.normalize(&raw);
        // normalized (x, y) comes from raw (799 - (x + 86), 599 - y)
        let x = 300;
        let y = 200;
        assert_eq!(frame.get_pixel(x, y), raw.get_pixel(799 - (x + 86), 599 - y));
    }

    #[test]
    fn test_corners_are_masked() {
        let normalizer = FrameNormalizer::new(NormalizationSettings {
            crop: CropBorders::default(),
            ..Default::default()
        });
        let frame = normalizer.normalize(&raw_frame());
        let gray = Rgb([128, 128, 128]);
        assert_eq!(*frame.get_pixel(0, 0), gray);
        assert_eq!(*frame.get_pixel(179, 89), gray);
        assert_ne!(*frame.get_pixel(180, 89), gray);
        assert_eq!(*frame.get_pixel(799, 0), gray);
        assert_eq!(*frame.get_pixel(0, 599), gray);
        assert_eq!(*frame.get_pixel(799, 599), gray);
        assert_ne!(*frame.get_pixel(400, 300), gray);
    }

    #[test]
    fn test_oversized_masks_and_crop_are_clipped() {
        let normalizer = FrameNormalizer::new(NormalizationSettings {
            corner_masks: vec![balance_core::CornerMask {
                corner: Corner::BottomRight,
                rows: 1000,
                cols: 1000,
            }],
            crop: CropBorders {
                top: 0,
                bottom: 0,
                left: 30,
                right: 30,
            },
            ..Default::default()
        });
        let frame = normalizer.normalize(&Frame::new(40, 20));
        assert_eq!(frame.dimensions(), (0, 20));
    }
}
