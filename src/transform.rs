//! Coordinate stages: editing-surface pixels ⇄ page percent ⇄ page points.
//!
//! Pixels and percent share a top-left origin. Only the percent → points stage flips the
//! vertical axis, and it flips the box, not a point: the bottom edge of the box is
//! `page_height - y_from_top - height`.

use crate::error::FieldMarkError;
use crate::field::FieldPlacement;
use crate::types::{PageDimensions, PointRect};

pub fn percent_to_points(
    placement: &FieldPlacement,
    page: PageDimensions,
) -> Result<PointRect, FieldMarkError> {
    page.validate()?;
    let x = (placement.x / 100.0) * page.width;
    let y_from_top = (placement.y / 100.0) * page.height;
    let width = (placement.width / 100.0) * page.width;
    let height = (placement.height / 100.0) * page.height;
    let y_from_bottom = page.height - y_from_top - height;
    Ok(PointRect {
        x,
        y: y_from_bottom,
        width,
        height,
    })
}

pub fn points_to_percent(
    id: impl Into<String>,
    rect: &PointRect,
    page: PageDimensions,
) -> Result<FieldPlacement, FieldMarkError> {
    page.validate()?;
    let y_from_top = page.height - rect.y - rect.height;
    Ok(FieldPlacement {
        id: id.into(),
        x: rect.x / page.width * 100.0,
        y: y_from_top / page.height * 100.0,
        width: rect.width / page.width * 100.0,
        height: rect.height / page.height * 100.0,
    })
}

/// Display scale of the editing surface: rendered pixel width over page width in points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceScale(f64);

impl SurfaceScale {
    pub fn new(scale: f64) -> Result<Self, FieldMarkError> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(FieldMarkError::InvalidConfiguration(format!(
                "surface scale must be positive, got {}",
                scale
            )));
        }
        Ok(Self(scale))
    }

    pub fn from_display_width(
        display_width: f64,
        page: PageDimensions,
    ) -> Result<Self, FieldMarkError> {
        page.validate()?;
        if !display_width.is_finite() || display_width <= 0.0 {
            return Err(FieldMarkError::InvalidConfiguration(format!(
                "display width must be positive, got {}",
                display_width
            )));
        }
        Self::new(display_width / page.width)
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

/// Rectangle on the editing surface in CSS pixels, top-left origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

pub fn pixels_to_percent(
    id: impl Into<String>,
    rect: &PixelRect,
    scale: SurfaceScale,
    page: PageDimensions,
) -> Result<FieldPlacement, FieldMarkError> {
    page.validate()?;
    let s = scale.value();
    Ok(FieldPlacement {
        id: id.into(),
        x: rect.x / s / page.width * 100.0,
        y: rect.y / s / page.height * 100.0,
        width: rect.width / s / page.width * 100.0,
        height: rect.height / s / page.height * 100.0,
    })
}

pub fn percent_to_pixels(
    placement: &FieldPlacement,
    scale: SurfaceScale,
    page: PageDimensions,
) -> Result<PixelRect, FieldMarkError> {
    page.validate()?;
    let s = scale.value();
    Ok(PixelRect {
        x: placement.x / 100.0 * page.width * s,
        y: placement.y / 100.0 * page.height * s,
        width: placement.width / 100.0 * page.width * s,
        height: placement.height / 100.0 * page.height * s,
    })
}
