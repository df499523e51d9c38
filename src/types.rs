use crate::error::FieldMarkError;
use fixed::types::I32F32;

/// Page-space length quantized to 1/1000 pt. Content streams are written from this form so
/// identical inputs always produce identical operators.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Pt(I32F32);

impl Pt {
    pub const ZERO: Pt = Pt(I32F32::from_bits(0));

    pub fn from_f64(value: f64) -> Pt {
        if !value.is_finite() {
            return Pt::ZERO;
        }
        let milli = (value * 1000.0).round();
        let milli = milli.clamp(i64::MIN as f64, i64::MAX as f64) as i64;
        Pt::from_milli_i64(milli)
    }

    pub fn to_f64(self) -> f64 {
        self.0.to_num()
    }

    pub fn to_milli_i64(self) -> i64 {
        let bits = self.0.to_bits() as i128;
        let denom = 1i128 << 32;
        let scaled = bits * 1000;
        let adj = if scaled >= 0 { denom / 2 } else { -denom / 2 };
        let milli = (scaled + adj) / denom;
        milli.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }

    pub fn from_milli_i64(milli: i64) -> Pt {
        let milli = milli as i128;
        let denom = 1i128 << 32;
        let adj = if milli >= 0 { 500 } else { -500 };
        let bits = (milli * denom + adj) / 1000;
        let bits = bits.clamp(i64::MIN as i128, i64::MAX as i128) as i64;
        Pt(I32F32::from_bits(bits))
    }

    pub fn min(self, other: Pt) -> Pt {
        if self <= other { self } else { other }
    }
}

impl std::ops::Add for Pt {
    type Output = Pt;
    fn add(self, rhs: Pt) -> Pt {
        Pt::from_milli_i64(self.to_milli_i64().saturating_add(rhs.to_milli_i64()))
    }
}

impl std::ops::Sub for Pt {
    type Output = Pt;
    fn sub(self, rhs: Pt) -> Pt {
        Pt::from_milli_i64(self.to_milli_i64().saturating_sub(rhs.to_milli_i64()))
    }
}

impl std::ops::Neg for Pt {
    type Output = Pt;
    fn neg(self) -> Pt {
        Pt::from_milli_i64(-self.to_milli_i64())
    }
}

/// Size of the target page in points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageDimensions {
    pub width: f64,
    pub height: f64,
}

impl PageDimensions {
    pub fn new(width: f64, height: f64) -> Result<Self, FieldMarkError> {
        let dims = Self { width, height };
        dims.validate()?;
        Ok(dims)
    }

    pub fn letter() -> Self {
        // 8.5in x 11in at 72pt/in.
        Self {
            width: 612.0,
            height: 792.0,
        }
    }

    pub fn a4() -> Self {
        Self {
            width: 595.28,
            height: 841.89,
        }
    }

    pub fn validate(&self) -> Result<(), FieldMarkError> {
        if !self.width.is_finite() || self.width <= 0.0 {
            return Err(FieldMarkError::InvalidConfiguration(format!(
                "page width must be positive, got {}",
                self.width
            )));
        }
        if !self.height.is_finite() || self.height <= 0.0 {
            return Err(FieldMarkError::InvalidConfiguration(format!(
                "page height must be positive, got {}",
                self.height
            )));
        }
        Ok(())
    }

    pub fn approx_eq(&self, other: &PageDimensions, tolerance: f64) -> bool {
        (self.width - other.width).abs() <= tolerance
            && (self.height - other.height).abs() <= tolerance
    }
}

/// Rectangle in page points, origin at the bottom-left corner of the page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl PointRect {
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color {
    pub const BLACK: Color = Color {
        r: 0.0,
        g: 0.0,
        b: 0.0,
    };

    pub fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }
}
