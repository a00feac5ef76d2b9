//! Render resolution selection.
//!
//! The render workflow produces one of two fixed frame sizes. Which one
//! is chosen depends only on the orientation of the source image:
//! portrait sources get the vertical size, everything else (landscape
//! and square) gets the horizontal size.

use serde::{Deserialize, Serialize};

/* --------------------------------------------------------------------------
Named constants
-------------------------------------------------------------------------- */

/// Target size for landscape and square sources.
pub const DEFAULT_HORIZONTAL_SIZE: TargetSize = TargetSize {
    width: 1280,
    height: 720,
};

/// Target size for portrait sources.
pub const DEFAULT_VERTICAL_SIZE: TargetSize = TargetSize {
    width: 720,
    height: 1280,
};

/* --------------------------------------------------------------------------
Types
-------------------------------------------------------------------------- */

/// Orientation of an image or video frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    Portrait,
    Landscape,
    Square,
}

/// A width/height pair in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSize {
    pub width: u32,
    pub height: u32,
}

impl TargetSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Width divided by height.
    pub fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height as f64
    }
}

/* --------------------------------------------------------------------------
Selection functions
-------------------------------------------------------------------------- */

/// Classify pixel dimensions.
pub fn orientation_of(width: u32, height: u32) -> Orientation {
    match height.cmp(&width) {
        std::cmp::Ordering::Greater => Orientation::Portrait,
        std::cmp::Ordering::Less => Orientation::Landscape,
        std::cmp::Ordering::Equal => Orientation::Square,
    }
}

/// Pick the render size for a source of the given dimensions.
pub fn select_target_size(width: u32, height: u32) -> TargetSize {
    match orientation_of(width, height) {
        Orientation::Portrait => DEFAULT_VERTICAL_SIZE,
        Orientation::Landscape | Orientation::Square => DEFAULT_HORIZONTAL_SIZE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn portrait_maps_to_vertical() {
        assert_eq!(select_target_size(1080, 1920), DEFAULT_VERTICAL_SIZE);
    }

    #[test]
    fn landscape_maps_to_horizontal() {
        assert_eq!(select_target_size(1920, 1080), DEFAULT_HORIZONTAL_SIZE);
    }

    #[test]
    fn square_maps_to_horizontal() {
        assert_eq!(orientation_of(512, 512), Orientation::Square);
        assert_eq!(select_target_size(512, 512), DEFAULT_HORIZONTAL_SIZE);
    }

    #[test]
    fn one_pixel_taller_is_portrait() {
        assert_eq!(orientation_of(1000, 1001), Orientation::Portrait);
    }

    #[test]
    fn aspect_ratio() {
        assert!((DEFAULT_HORIZONTAL_SIZE.aspect_ratio() - 16.0 / 9.0).abs() < 1e-9);
        assert!((DEFAULT_VERTICAL_SIZE.aspect_ratio() - 9.0 / 16.0).abs() < 1e-9);
    }
}
