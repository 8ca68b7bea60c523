use image::{GrayImage, Luma};
use imageproc::{
    gradients::{horizontal_sobel, vertical_sobel},
    morphology::{grayscale_dilate, Mask},
};

/// tan(22.5°) in Q15 fixed point.
const TAN_22_5_Q15: i64 = 13573;

const NOT_EDGE: u8 = 0;
const CANDIDATE: u8 = 1;
const EDGE: u8 = 2;

/// Canny edge detector for an image that has already been smoothed.
///
/// Gradients come from 3x3 Sobel kernels and are scored by the L1 magnitude
/// `|gx| + |gy|`. Pixels that are not a local maximum along the gradient
/// direction are suppressed; the rest are kept if above `high`, or above `low`
/// and 8-connected to a kept pixel. Unlike [`imageproc::edges::canny`] the
/// input is not blurred again.
pub fn canny_l1(image: &GrayImage, low: f32, high: f32) -> GrayImage {
    let (width, height) = image.dimensions();
    let mut out = GrayImage::new(width, height);
    if width == 0 || height == 0 {
        return out;
    }

    let gx = horizontal_sobel(image);
    let gy = vertical_sobel(image);
    let w = width as usize;
    let h = height as usize;
    let magnitude: Vec<i32> = gx
        .pixels()
        .zip(gy.pixels())
        .map(|(x, y)| (x[0] as i32).abs() + (y[0] as i32).abs())
        .collect();
    let magnitude_at = |x: i64, y: i64| -> i32 {
        if x < 0 || y < 0 || x >= w as i64 || y >= h as i64 {
            0
        } else {
            magnitude[y as usize * w + x as usize]
        }
    };

    let mut class = vec![NOT_EDGE; w * h];
    let mut stack = Vec::new();
    for y in 0..h {
        for x in 0..w {
            let index = y * w + x;
            let m = magnitude[index];
            if m as f32 <= low {
                continue;
            }

            let sx = gx.get_pixel(x as u32, y as u32)[0] as i32;
            let sy = gy.get_pixel(x as u32, y as u32)[0] as i32;
            let (dx, dy) = gradient_step(sx, sy);
            let (x, y) = (x as i64, y as i64);
            // Ties go to the pixel on the negative side, so plateaus stay one pixel wide
            if m <= magnitude_at(x - dx, y - dy) || m < magnitude_at(x + dx, y + dy) {
                continue;
            }

            if m as f32 > high {
                class[index] = EDGE;
                stack.push(index);
            } else {
                class[index] = CANDIDATE;
            }
        }
    }

    while let Some(index) = stack.pop() {
        let (x, y) = (index % w, index / w);
        for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
            for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                let neighbour = ny * w + nx;
                if class[neighbour] == CANDIDATE {
                    class[neighbour] = EDGE;
                    stack.push(neighbour);
                }
            }
        }
    }

    for (pixel, &c) in out.pixels_mut().zip(&class) {
        if c == EDGE {
            *pixel = Luma([255]);
        }
    }
    out
}

/// Neighbour offset along the gradient, quantized to 0°, 45°, 90° or 135°.
fn gradient_step(sx: i32, sy: i32) -> (i64, i64) {
    let ax = (sx as i64).abs();
    let ay = (sy as i64).abs() << 15;
    let tan_22 = ax * TAN_22_5_Q15;
    if ay < tan_22 {
        (1, 0)
    } else if ay > tan_22 + (ax << 16) {
        (0, 1)
    } else if (sx ^ sy) < 0 {
        (-1, 1)
    } else {
        (1, 1)
    }
}

/// Elliptical structuring element of size `2 * radius + 1`, in the shape
/// OpenCV's `MORPH_ELLIPSE` produces. Radius 2 gives the 5x5 kernel with only
/// the middle pixel kept in the first and last rows.
pub fn elliptical_mask(radius: u8) -> Mask {
    let size = 2 * radius as u32 + 1;
    let r = radius as f64;
    let kernel = GrayImage::from_fn(size, size, |x, y| {
        let dy = y as f64 - r;
        let dx = x as f64 - r;
        let half_width = if radius == 0 {
            0.0
        } else {
            (r * (1.0 - dy * dy / (r * r)).max(0.0).sqrt()).round()
        };
        if dx.abs() <= half_width {
            Luma([255])
        } else {
            Luma([0])
        }
    });
    Mask::from_image(&kernel, radius, radius)
}

/// Dilate a binary edge map with [`elliptical_mask`].
pub fn dilate_elliptical(edges: &GrayImage, radius: u8) -> GrayImage {
    if radius == 0 {
        return edges.clone();
    }
    grayscale_dilate(edges, &elliptical_mask(radius))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_image(left: u8, right: u8) -> GrayImage {
        GrayImage::from_fn(40, 30, |x, _| if x < 20 { Luma([left]) } else { Luma([right]) })
    }

    fn edge_columns(edges: &GrayImage, y: u32) -> Vec<u32> {
        (0..edges.width())
            .filter(|&x| edges.get_pixel(x, y)[0] == 255)
            .collect()
    }

    #[test]
    fn test_vertical_step_gives_one_pixel_wide_edge() {
        let edges = canny_l1(&step_image(60, 240), 100.0, 200.0);
        for y in 0..edges.height() {
            assert_eq!(edge_columns(&edges, y), vec![19], "row {}", y);
        }
    }

    #[test]
    fn test_weak_step_alone_is_dropped() {
        // 4 * 30 = 120: above the low threshold only
        let edges = canny_l1(&step_image(100, 130), 100.0, 200.0);
        assert!(edges.pixels().all(|p| p[0] == 0));
    }

    #[test]
    fn test_weak_edge_connected_to_strong_edge_is_kept() {
        // Strong in the top half (4 * 55), weak in the bottom half (4 * 30)
        let image = GrayImage::from_fn(40, 30, |x, y| {
            let right = if y < 15 { 155 } else { 130 };
            if x < 20 {
                Luma([100])
            } else {
                Luma([right])
            }
        });
        let edges = canny_l1(&image, 100.0, 200.0);
        for y in 0..edges.height() {
            let columns = edge_columns(&edges, y);
            assert_eq!(columns.len(), 1, "row {}: {:?}", y, columns);
            assert!((19..=20).contains(&columns[0]), "row {}: {:?}", y, columns);
        }
        for y in 17..edges.height() {
            assert_eq!(edge_columns(&edges, y), vec![19], "row {}", y);
        }
    }

    #[test]
    fn test_flat_and_empty_images() {
        let flat = GrayImage::from_pixel(16, 16, Luma([128]));
        assert!(canny_l1(&flat, 100.0, 200.0).pixels().all(|p| p[0] == 0));
        assert_eq!(canny_l1(&GrayImage::new(0, 0), 100.0, 200.0).dimensions(), (0, 0));
    }

    #[test]
    fn test_elliptical_mask_matches_5x5_ellipse() {
        let mut dot = GrayImage::new(9, 9);
        dot.put_pixel(4, 4, Luma([255]));
        let dilated = dilate_elliptical(&dot, 2);

        let expected = [
            ".........",
            ".........",
            "....#....",
            "..#####..",
            "..#####..",
            "..#####..",
            "....#....",
            ".........",
            ".........",
        ];
        for (y, row) in expected.iter().enumerate() {
            for x in 0..9u32 {
                let set = dilated.get_pixel(x, y as u32)[0] == 255;
                assert_eq!(set, row.as_bytes()[x as usize] == b'#', "({}, {})", x, y);
            }
        }
    }

    #[test]
    fn test_zero_radius_dilation_is_identity() {
        let edges = canny_l1(&step_image(60, 240), 100.0, 200.0);
        assert_eq!(dilate_elliptical(&edges, 0), edges);
    }
}
