//! Page viewport transform
//!
//! Maps PDF user space (origin bottom-left, y up) to a pixel space with the
//! origin at the visual top-left of the page after rotation. The same
//! transform sizes thumbnails and positions text boxes, so boxes line up
//! with what was previewed.

use serde::Serialize;

/// Affine matrix `[a b c d e f]` in PDF operand order
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix(pub [f32; 6]);

impl Matrix {
    pub const IDENTITY: Matrix = Matrix([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

    pub fn translate(tx: f32, ty: f32) -> Self {
        Matrix([1.0, 0.0, 0.0, 1.0, tx, ty])
    }

    /// `self` applied first, then `other`
    pub fn then(&self, other: &Matrix) -> Matrix {
        let [a1, b1, c1, d1, e1, f1] = self.0;
        let [a2, b2, c2, d2, e2, f2] = other.0;
        Matrix([
            a1 * a2 + b1 * c2,
            a1 * b2 + b1 * d2,
            c1 * a2 + d1 * c2,
            c1 * b2 + d1 * d2,
            e1 * a2 + f1 * c2 + e2,
            e1 * b2 + f1 * d2 + f2,
        ])
    }

    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        let [a, b, c, d, e, f] = self.0;
        (a * x + c * y + e, b * x + d * y + f)
    }

    pub fn inverse(&self) -> Option<Matrix> {
        let [a, b, c, d, e, f] = self.0;
        let det = a * d - b * c;
        if det.abs() < f32::EPSILON {
            return None;
        }
        Some(Matrix([
            d / det,
            -b / det,
            -c / det,
            a / det,
            (c * f - d * e) / det,
            (b * e - a * f) / det,
        ]))
    }
}

/// Axis-aligned box: position of the top-left corner plus size
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Rect {
            x: x1.min(x2),
            y: y1.min(y2),
            width: (x1 - x2).abs(),
            height: (y1 - y2).abs(),
        }
    }

    pub fn expand(&self, margin: f32) -> Rect {
        Rect {
            x: self.x - margin,
            y: self.y - margin,
            width: self.width + margin * 2.0,
            height: self.height + margin * 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
    pub scale: f32,
    pub rotation: i32,
    transform: Matrix,
}

impl Viewport {
    /// `view_box` is `[x1 y1 x2 y2]` in user space, `rotation` one of 0/90/180/270
    pub fn new(view_box: [f32; 4], scale: f32, rotation: i32) -> Self {
        let [x1, y1, x2, y2] = view_box;
        let center_x = (x1 + x2) / 2.0;
        let center_y = (y1 + y2) / 2.0;

        let (ra, rb, rc, rd) = match rotation.rem_euclid(360) {
            90 => (0.0, 1.0, 1.0, 0.0),
            180 => (-1.0, 0.0, 0.0, 1.0),
            270 => (0.0, -1.0, -1.0, 0.0),
            _ => (1.0, 0.0, 0.0, -1.0),
        };

        let (offset_x, offset_y, width, height) = if ra == 0.0 {
            (
                (center_y - y1).abs() * scale,
                (center_x - x1).abs() * scale,
                (y2 - y1).abs() * scale,
                (x2 - x1).abs() * scale,
            )
        } else {
            (
                (center_x - x1).abs() * scale,
                (center_y - y1).abs() * scale,
                (x2 - x1).abs() * scale,
                (y2 - y1).abs() * scale,
            )
        };

        let transform = Matrix([
            ra * scale,
            rb * scale,
            rc * scale,
            rd * scale,
            offset_x - ra * scale * center_x - rc * scale * center_y,
            offset_y - rb * scale * center_x - rd * scale * center_y,
        ]);

        Self {
            width,
            height,
            scale,
            rotation: rotation.rem_euclid(360),
            transform,
        }
    }

    pub fn transform(&self) -> &Matrix {
        &self.transform
    }

    pub fn to_viewport_point(&self, x: f32, y: f32) -> (f32, f32) {
        self.transform.apply(x, y)
    }

    pub fn to_user_point(&self, x: f32, y: f32) -> (f32, f32) {
        match self.transform.inverse() {
            Some(inverse) => inverse.apply(x, y),
            None => (x, y),
        }
    }

    /// User-space rectangle given by two corners, as a viewport box
    pub fn to_viewport_rect(&self, x1: f32, y1: f32, x2: f32, y2: f32) -> Rect {
        let (vx1, vy1) = self.to_viewport_point(x1, y1);
        let (vx2, vy2) = self.to_viewport_point(x2, y2);
        Rect::from_corners(vx1, vy1, vx2, vy2)
    }

    /// Viewport box back in user space, with `y` at the bottom edge
    pub fn to_user_rect(&self, rect: &Rect) -> Rect {
        let (ux1, uy1) = self.to_user_point(rect.x, rect.y);
        let (ux2, uy2) = self.to_user_point(rect.x + rect.width, rect.y + rect.height);
        Rect::from_corners(ux1, uy1, ux2, uy2)
    }

    /// Pixel size of a raster of this viewport
    pub fn pixel_size(&self) -> (u32, u32) {
        (
            (self.width.round() as u32).max(1),
            (self.height.round() as u32).max(1),
        )
    }
}
