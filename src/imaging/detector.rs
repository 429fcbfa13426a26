use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage};
use imageproc::corners::{corners_fast9, Corner};

use crate::frame::Keypoint;

/// Diameter of the Bresenham circle FAST-9 samples around a candidate pixel.
const FAST_DIAMETER: f32 = 7.0;
/// Radius of the patch used for the intensity-centroid orientation.
const ORIENTATION_RADIUS: i64 = 7;
/// Pyramid levels smaller than this carry no usable corners.
const MIN_LEVEL_SIZE: u32 = 16;

pub trait FeatureDetector: Send + Sync {
    /// Detected keypoints in full-resolution image coordinates.
    fn detect(&self, image: &DynamicImage) -> Vec<Keypoint>;
}

/// FAST-9 corners over a halving image pyramid.
#[derive(Debug, Clone)]
pub struct FastDetector {
    threshold: u8,
    octaves: u8,
}

impl FastDetector {
    pub fn new(threshold: u8, octaves: u8) -> Self {
        Self {
            threshold,
            octaves: octaves.max(1),
        }
    }
}

impl Default for FastDetector {
    fn default() -> Self {
        Self::new(20, 3)
    }
}

impl FeatureDetector for FastDetector {
    fn detect(&self, image: &DynamicImage) -> Vec<Keypoint> {
        let mut level = image.to_luma8();
        let mut keypoints = Vec::new();

        for octave in 0..self.octaves {
            if level.width() < MIN_LEVEL_SIZE || level.height() < MIN_LEVEL_SIZE {
                break;
            }
            let scale = (1u32 << octave) as f32;
            keypoints.extend(corners_fast9(&level, self.threshold).into_iter().map(
                |Corner { x, y, score }| Keypoint {
                    x: x as f32 * scale,
                    y: y as f32 * scale,
                    size: FAST_DIAMETER * scale,
                    angle: orientation(&level, x, y),
                    response: score,
                    octave: octave as i32,
                },
            ));

            let (width, height) = (level.width() / 2, level.height() / 2);
            level = imageops::resize(&level, width.max(1), height.max(1), FilterType::Triangle);
        }

        keypoints
    }
}

/// Intensity-centroid angle of the patch around `(x, y)`, in degrees `[0, 360)`.
fn orientation(image: &GrayImage, x: u32, y: u32) -> f32 {
    let (width, height) = (image.width() as i64, image.height() as i64);
    let (cx, cy) = (x as i64, y as i64);
    let mut m10 = 0i64;
    let mut m01 = 0i64;

    for dy in -ORIENTATION_RADIUS..=ORIENTATION_RADIUS {
        for dx in -ORIENTATION_RADIUS..=ORIENTATION_RADIUS {
            if dx * dx + dy * dy > ORIENTATION_RADIUS * ORIENTATION_RADIUS {
                continue;
            }
            let (px, py) = (cx + dx, cy + dy);
            if px < 0 || py < 0 || px >= width || py >= height {
                continue;
            }
            let intensity = image.get_pixel(px as u32, py as u32).0[0] as i64;
            m10 += dx * intensity;
            m01 += dy * intensity;
        }
    }

    let degrees = (m01 as f32).atan2(m10 as f32).to_degrees();
    let degrees = if degrees < 0.0 { degrees + 360.0 } else { degrees };
    if degrees >= 360.0 {
        0.0
    } else {
        degrees
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb, RgbImage};

    fn square_on_black(size: u32, from: u32, to: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(size, size, |x, y| {
            if (from..to).contains(&x) && (from..to).contains(&y) {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        }))
    }

    #[test]
    fn flat_image_has_no_keypoints() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 64, Rgb([90, 90, 90])));
        assert!(FastDetector::default().detect(&image).is_empty());
    }

    #[test]
    fn square_corners_are_found_inside_the_image() {
        let image = square_on_black(128, 40, 88);
        let keypoints = FastDetector::new(20, 3).detect(&image);

        assert!(!keypoints.is_empty());
        assert!(keypoints.iter().any(|k| k.octave == 0));
        for keypoint in &keypoints {
            assert!(keypoint.x >= 0.0 && keypoint.x < 128.0);
            assert!(keypoint.y >= 0.0 && keypoint.y < 128.0);
            assert!((0.0..360.0).contains(&keypoint.angle));
            assert!((0..3).contains(&keypoint.octave));
            assert_eq!(keypoint.size, FAST_DIAMETER * (1u32 << keypoint.octave) as f32);
            assert!(keypoint.response > 0.0);
        }
    }

    #[test]
    fn keypoints_are_ordered_by_octave() {
        let keypoints = FastDetector::new(20, 3).detect(&square_on_black(128, 40, 88));
        assert!(keypoints.windows(2).all(|pair| pair[0].octave <= pair[1].octave));
    }

    #[test]
    fn tiny_images_stop_the_pyramid_early() {
        let keypoints = FastDetector::new(20, 6).detect(&square_on_black(40, 12, 28));
        assert!(keypoints.iter().all(|k| k.octave <= 1));
    }

    #[test]
    fn orientation_points_towards_the_bright_side() {
        let image = GrayImage::from_fn(32, 32, |x, _| if x > 16 { Luma([255]) } else { Luma([0]) });
        let angle = orientation(&image, 16, 16);
        assert!(angle < 1.0 || angle > 359.0, "angle was {angle}");

        let image = GrayImage::from_fn(32, 32, |_, y| if y > 16 { Luma([255]) } else { Luma([0]) });
        let angle = orientation(&image, 16, 16);
        assert!((angle - 90.0).abs() < 1.0, "angle was {angle}");
    }
}
