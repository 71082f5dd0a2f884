use serde::{Deserialize, Serialize};

///Represents a vector in the play field.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector2 {
    ///Value along the x-axis.
    /// Positive direction is to the right.
    pub x: f32,
    ///Value along the y-axis.
    /// Positive direction is up the track.
    pub y: f32,
}

impl Vector2 {
    pub const ZERO: Vector2 = Vector2 { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Vector2 { x, y }
    }

    ///Returns the velocity of something moving at `speed` along `rotation`.
    /// A rotation of zero points straight up the track, positive rotation turns left.
    pub fn from_heading(speed: f32, rotation: f32) -> Vector2 {
        Vector2 {
            x: speed * (-rotation).sin(),
            y: speed * rotation.cos(),
        }
    }

    ///Returns the magnitude of the vector.
    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    ///Returns the scaled vector.
    pub fn scale(&self, scalar: f32) -> Vector2 {
        Vector2 {
            x: self.x * scalar,
            y: self.y * scalar,
        }
    }

    ///Returns the sum of two vectors.
    pub fn add(&self, other: &Vector2) -> Vector2 {
        Vector2 {
            x: self.x + other.x,
            y: self.y + other.y,
        }
    }

    ///Returns the difference of two vectors.
    pub fn sub(&self, other: &Vector2) -> Vector2 {
        Vector2 {
            x: self.x - other.x,
            y: self.y - other.y,
        }
    }

    ///Returns the point `t` of the way from `self` to `other`.
    pub fn lerp(&self, other: &Vector2, t: f32) -> Vector2 {
        self.add(&other.sub(self).scale(t))
    }

    pub fn distance(&self, other: &Vector2) -> f32 {
        other.sub(self).magnitude()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

///An axis-aligned rectangle positioned by its centre.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub center: Vector2,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(center: Vector2, width: f32, height: f32) -> Self {
        Rect {
            center,
            width,
            height,
        }
    }

    pub fn left(&self) -> f32 {
        self.center.x - self.width / 2.0
    }

    pub fn right(&self) -> f32 {
        self.center.x + self.width / 2.0
    }

    pub fn bottom(&self) -> f32 {
        self.center.y - self.height / 2.0
    }

    pub fn top(&self) -> f32 {
        self.center.y + self.height / 2.0
    }

    ///Checks for AABB overlap. Rectangles that only share an edge do not intersect.
    pub fn intersects(&self, other: &Rect) -> bool {
        !(self.right() <= other.left()
            || self.left() >= other.right()
            || self.top() <= other.bottom()
            || self.bottom() >= other.top())
    }
}
