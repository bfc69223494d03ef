//! Per-frame annotation of detected faces.

use crate::error::MatchError;
use crate::gallery::Gallery;
use crate::matcher::Matcher;
use crate::types::{BoundingBox, DetectedFace, Threshold};
use image::{Rgb, RgbImage};

/// Box color for a recognized face.
pub const ACCEPT_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
/// Box color for an unknown face.
pub const REJECT_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

const BOX_THICKNESS: u32 = 2;

/// What to draw for one face.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationInstruction {
    pub bbox: BoundingBox,
    pub text: String,
    pub color: Rgb<u8>,
}

/// Match every face of one frame. No state is carried between frames.
pub fn annotate_frame<M: Matcher>(
    matcher: &M,
    faces: &[DetectedFace],
    gallery: &Gallery,
    threshold: Threshold,
) -> Result<Vec<AnnotationInstruction>, MatchError> {
    let mut instructions = Vec::with_capacity(faces.len());
    for face in faces {
        let Some(embedding) = face.usable_embedding() else {
            continue;
        };
        let result = matcher.compare(embedding, gallery, threshold)?;
        instructions.push(AnnotationInstruction {
            bbox: face.bbox.clone(),
            text: format!("{} ({:.2}%)", result.display_label(), result.confidence * 100.0),
            color: if result.accepted { ACCEPT_COLOR } else { REJECT_COLOR },
        });
    }
    Ok(instructions)
}

/// Draw box outlines onto `frame`, clipped to its bounds.
pub fn draw_annotations(frame: &mut RgbImage, instructions: &[AnnotationInstruction]) {
    let (w, h) = frame.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    for inst in instructions {
        let (x1, y1, x2, y2) = inst.bbox.corners();
        let clamp_x = |v: f32| (v.round().max(0.0) as u32).min(w - 1);
        let clamp_y = |v: f32| (v.round().max(0.0) as u32).min(h - 1);
        let (x1, x2) = (clamp_x(x1), clamp_x(x2));
        let (y1, y2) = (clamp_y(y1), clamp_y(y2));

        for t in 0..BOX_THICKNESS {
            for x in x1..=x2 {
                frame.put_pixel(x, (y1 + t).min(h - 1), inst.color);
                frame.put_pixel(x, y2.saturating_sub(t), inst.color);
            }
            for y in y1..=y2 {
                frame.put_pixel((x1 + t).min(w - 1), y, inst.color);
                frame.put_pixel(x2.saturating_sub(t), y, inst.color);
            }
        }
    }
}
