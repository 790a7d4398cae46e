use serde::{Deserialize, Serialize};
use std::ops::{Add, Sub};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl Sub for Point {
    type Output = Point;

    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Add for Point {
    type Output = Point;

    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: i32,
    pub height: i32,
}

impl Size {
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub position: Point,
    pub size: Size,
}

impl Geometry {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            position: Point::new(x, y),
            size: Size::new(width, height),
        }
    }

    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.position.x
            && point.x < self.position.x + self.size.width
            && point.y >= self.position.y
            && point.y < self.position.y + self.size.height
    }

    pub fn right(&self) -> i32 {
        self.position.x + self.size.width
    }

    pub fn bottom(&self) -> i32 {
        self.position.y + self.size.height
    }

    /// Keep the whole window inside `viewport`. A window wider than the viewport pins to the left edge.
    pub fn clamp_position(&mut self, viewport: Size) {
        self.position.x = self
            .position
            .x
            .clamp(0, (viewport.width - self.size.width).max(0));
        self.position.y = self
            .position
            .y
            .clamp(0, (viewport.height - self.size.height).max(0));
    }

    /// Shrink to fit `viewport` from the current position, never below `min_size`.
    pub fn clamp_size(&mut self, viewport: Size, min_size: Size) {
        self.size.width = self
            .size
            .width
            .min(viewport.width - self.position.x)
            .max(min_size.width);
        self.size.height = self
            .size
            .height
            .min(viewport.height - self.position.y)
            .max(min_size.height);
    }
}
