//! Face alignment to the canonical 112×112 ArcFace crop.
//!
//! A 4-DOF similarity transform (scale, rotation, translation) is fitted in
//! closed form from the five detected landmarks to the reference positions,
//! then the RGB image is resampled bilinearly through its inverse.

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

/// ArcFace reference landmarks for a 112×112 output.
const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: u32 = 112;

/// `dst = [a -b; b a] * src + t`
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    /// Least-squares fit over corresponding points, computed about the centroids.
    /// Returns `None` when the source points coincide.
    fn fit(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Option<Self> {
        let centroid = |pts: &[(f32, f32); 5]| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), (x, y)| (ax + x, ay + y));
            (sx / 5.0, sy / 5.0)
        };
        let (scx, scy) = centroid(src);
        let (dcx, dcy) = centroid(dst);

        let (mut dot, mut cross, mut spread) = (0.0f32, 0.0f32, 0.0f32);
        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst) {
            let (sx, sy) = (sx - scx, sy - scy);
            let (dx, dy) = (dx - dcx, dy - dcy);
            dot += sx * dx + sy * dy;
            cross += sx * dy - sy * dx;
            spread += sx * sx + sy * sy;
        }
        if spread < 1e-6 {
            return None;
        }

        let a = dot / spread;
        let b = cross / spread;
        Some(Self {
            a,
            b,
            tx: dcx - (a * scx - b * scy),
            ty: dcy - (b * scx + a * scy),
        })
    }

    fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (self.a * x - self.b * y + self.tx, self.b * x + self.a * y + self.ty)
    }

    fn inverse(&self) -> Option<Self> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let (a, b) = (self.a / det, -self.b / det);
        Some(Self {
            a,
            b,
            tx: -(a * self.tx - b * self.ty),
            ty: -(b * self.tx + a * self.ty),
        })
    }
}

/// Bilinear sample; outside the image reads as black.
fn sample(image: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (w, h) = (image.width() as i64, image.height() as i64);
    let (x0, y0) = (x.floor() as i64, y.floor() as i64);
    let (fx, fy) = (x - x0 as f32, y - y0 as f32);

    let texel = |px: i64, py: i64| -> [f32; 3] {
        if px >= 0 && px < w && py >= 0 && py < h {
            image.get_pixel(px as u32, py as u32).0.map(f32::from)
        } else {
            [0.0; 3]
        }
    };
    let (p00, p10) = (texel(x0, y0), texel(x0 + 1, y0));
    let (p01, p11) = (texel(x0, y0 + 1), texel(x0 + 1, y0 + 1));

    Rgb(std::array::from_fn(|c| {
        let v = p00[c] * (1.0 - fx) * (1.0 - fy)
            + p10[c] * fx * (1.0 - fy)
            + p01[c] * (1.0 - fx) * fy
            + p11[c] * fx * fy;
        v.round().clamp(0.0, 255.0) as u8
    }))
}

/// Warp the face described by `landmarks` into a 112×112 RGB crop.
///
/// Degenerate landmarks (all at one point) produce a black crop.
pub fn align_face(image: &RgbImage, landmarks: &[(f32, f32); 5]) -> RgbImage {
    let Some(inverse) = Similarity::fit(landmarks, &REFERENCE_LANDMARKS_112).and_then(|t| t.inverse()) else {
        return RgbImage::new(ALIGNED_SIZE, ALIGNED_SIZE);
    };
    RgbImage::from_fn(ALIGNED_SIZE, ALIGNED_SIZE, |ox, oy| {
        let (sx, sy) = inverse.apply((ox as f32, oy as f32));
        sample(image, sx, sy)
    })
}

/// Crop the bounding box (clipped to the image) and resize to 112×112.
/// Used for faces detected without landmarks.
pub fn crop_face(image: &RgbImage, corners: (f32, f32, f32, f32)) -> RgbImage {
    let (w, h) = image.dimensions();
    let (x1, y1, x2, y2) = corners;
    let clip = |v: f32, max: u32| (v.round().max(0.0) as u32).min(max);
    let (x1, y1) = (clip(x1, w), clip(y1, h));
    let (x2, y2) = (clip(x2, w), clip(y2, h));

    if x2 <= x1 || y2 <= y1 {
        return resize_to_aligned(image);
    }
    let crop = imageops::crop_imm(image, x1, y1, x2 - x1, y2 - y1).to_image();
    resize_to_aligned(&crop)
}

/// Resize a whole image to 112×112, ignoring aspect ratio.
pub fn resize_to_aligned(image: &RgbImage) -> RgbImage {
    if image.width() == 0 || image.height() == 0 {
        return RgbImage::new(ALIGNED_SIZE, ALIGNED_SIZE);
    }
    imageops::resize(image, ALIGNED_SIZE, ALIGNED_SIZE, FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: (f32, f32), b: (f32, f32), tol: f32) -> bool {
        (a.0 - b.0).abs() < tol && (a.1 - b.1).abs() < tol
    }

    #[test]
    fn test_identity_fit() {
        let t = Similarity::fit(&REFERENCE_LANDMARKS_112, &REFERENCE_LANDMARKS_112).unwrap();
        assert!((t.a - 1.0).abs() < 1e-4, "a = {}", t.a);
        assert!(t.b.abs() < 1e-4, "b = {}", t.b);
        assert!(t.tx.abs() < 1e-3 && t.ty.abs() < 1e-3);
    }

    #[test]
    fn test_recovers_scale_rotation_translation() {
        let truth = Similarity {
            a: 0.4,
            b: 0.3,
            tx: 12.0,
            ty: -7.0,
        };
        let src = [(100.0, 80.0), (160.0, 82.0), (130.0, 120.0), (105.0, 150.0), (155.0, 151.0)];
        let dst = src.map(|p| truth.apply(p));
        let t = Similarity::fit(&src, &dst).unwrap();
        assert!((t.a - 0.4).abs() < 1e-4 && (t.b - 0.3).abs() < 1e-4);
        assert!((t.tx - 12.0).abs() < 1e-2 && (t.ty + 7.0).abs() < 1e-2);
    }

    #[test]
    fn test_inverse_roundtrip() {
        let t = Similarity {
            a: 0.5,
            b: -0.2,
            tx: 3.0,
            ty: 9.0,
        };
        let inv = t.inverse().unwrap();
        let p = (41.0, 17.5);
        assert!(close(inv.apply(t.apply(p)), p, 1e-3));
    }

    #[test]
    fn test_degenerate_landmarks() {
        let pts = [(10.0, 10.0); 5];
        assert!(Similarity::fit(&pts, &REFERENCE_LANDMARKS_112).is_none());
        let out = align_face(&RgbImage::from_pixel(50, 50, Rgb([200, 200, 200])), &pts);
        assert_eq!(out.dimensions(), (112, 112));
        assert_eq!(*out.get_pixel(56, 56), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_bright_patch_lands_on_reference_eye() {
        let mut image = RgbImage::new(200, 200);
        let src = [(80.0, 60.0), (120.0, 60.0), (100.0, 85.0), (85.0, 110.0), (115.0, 110.0)];
        for y in 58..63 {
            for x in 78..83 {
                image.put_pixel(x, y, Rgb([255, 40, 10]));
            }
        }

        let aligned = align_face(&image, &src);
        let (rx, ry) = (
            REFERENCE_LANDMARKS_112[0].0.round() as u32,
            REFERENCE_LANDMARKS_112[0].1.round() as u32,
        );
        let brightest = (ry - 1..=ry + 1)
            .flat_map(|y| (rx - 1..=rx + 1).map(move |x| (x, y)))
            .map(|(x, y)| aligned.get_pixel(x, y).0[0])
            .max()
            .unwrap();
        assert!(brightest > 100, "red near reference eye: {brightest}");
    }

    #[test]
    fn test_crop_face_clips_and_resizes() {
        let mut image = RgbImage::from_pixel(64, 64, Rgb([0, 0, 255]));
        for y in 0..32 {
            for x in 0..32 {
                image.put_pixel(x, y, Rgb([0, 255, 0]));
            }
        }
        let out = crop_face(&image, (-10.0, -10.0, 32.0, 32.0));
        assert_eq!(out.dimensions(), (112, 112));
        assert_eq!(*out.get_pixel(56, 56), Rgb([0, 255, 0]));
    }

    #[test]
    fn test_empty_box_uses_whole_image() {
        let image = RgbImage::from_pixel(30, 20, Rgb([9, 9, 9]));
        let out = crop_face(&image, (50.0, 50.0, 60.0, 60.0));
        assert_eq!(out.dimensions(), (112, 112));
        assert_eq!(*out.get_pixel(0, 0), Rgb([9, 9, 9]));
    }
}
