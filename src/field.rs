use crate::error::{FieldMarkError, Stage};

// Slack allowed on the 0..=100 box before a placement counts as out of range.
const PERCENT_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    Png,
    Jpeg,
}

impl ImageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpeg",
        }
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        let mime = mime.trim().to_ascii_lowercase();
        if mime.contains("png") {
            Some(ImageFormat::Png)
        } else if mime.contains("jpeg") || mime.contains("jpg") {
            Some(ImageFormat::Jpeg)
        } else {
            None
        }
    }

    pub(crate) fn to_image_format(self) -> image::ImageFormat {
        match self {
            ImageFormat::Png => image::ImageFormat::Png,
            ImageFormat::Jpeg => image::ImageFormat::Jpeg,
        }
    }
}

/// Placement of a field in percent of the page, measured from the top-left corner.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldPlacement {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl FieldPlacement {
    pub fn new(id: impl Into<String>, x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            id: id.into(),
            x,
            y,
            width,
            height,
        }
    }

    pub fn validate(&self) -> Result<(), FieldMarkError> {
        let fail = |message: String| Err(FieldMarkError::field(Stage::Validate, &self.id, message));
        if self.id.trim().is_empty() {
            return Err(FieldMarkError::structural(
                Stage::Validate,
                "field id cannot be empty",
            ));
        }
        for (name, value) in [
            ("x", self.x),
            ("y", self.y),
            ("width", self.width),
            ("height", self.height),
        ] {
            if !value.is_finite() {
                return fail(format!("{name} is not a finite number"));
            }
        }
        if self.width <= 0.0 || self.height <= 0.0 {
            return fail(format!(
                "size must be positive (width={}, height={})",
                self.width, self.height
            ));
        }
        if self.x < -PERCENT_TOLERANCE || self.y < -PERCENT_TOLERANCE {
            return fail(format!(
                "origin outside page (x={}, y={})",
                self.x, self.y
            ));
        }
        if self.x + self.width > 100.0 + PERCENT_TOLERANCE {
            return fail(format!(
                "right edge outside page (x+width={})",
                self.x + self.width
            ));
        }
        if self.y + self.height > 100.0 + PERCENT_TOLERANCE {
            return fail(format!(
                "bottom edge outside page (y+height={})",
                self.y + self.height
            ));
        }
        Ok(())
    }

    /// Pulls the box back inside the page the way the editor does after a drag or resize:
    /// size is capped at 100%, then the origin is shifted so the far edges fit.
    pub fn clamped(&self) -> FieldPlacement {
        let width = finite_or_zero(self.width).clamp(0.0, 100.0);
        let height = finite_or_zero(self.height).clamp(0.0, 100.0);
        FieldPlacement {
            id: self.id.clone(),
            x: finite_or_zero(self.x).clamp(0.0, 100.0 - width),
            y: finite_or_zero(self.y).clamp(0.0, 100.0 - height),
            width,
            height,
        }
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldContent {
    Text { value: String },
    Signature { image: Vec<u8>, format: ImageFormat },
    Image { image: Vec<u8>, format: ImageFormat },
    /// `None` renders the clock's date. An explicit value is drawn as given, so a blank one
    /// leaves the field empty.
    Date { value: Option<String> },
    Marker { checked: bool },
}

impl FieldContent {
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldContent::Text { .. } => FieldKind::Text,
            FieldContent::Signature { .. } => FieldKind::Signature,
            FieldContent::Image { .. } => FieldKind::Image,
            FieldContent::Date { .. } => FieldKind::Date,
            FieldContent::Marker { .. } => FieldKind::Marker,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Text,
    Signature,
    Image,
    Date,
    Marker,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::Signature => "signature",
            FieldKind::Image => "image",
            FieldKind::Date => "date",
            FieldKind::Marker => "checkbox",
        }
    }

    /// Parses the wire type tag. Unknown tags yield `None` and are rejected by the caller.
    pub fn from_tag(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "text" => Some(FieldKind::Text),
            "signature" => Some(FieldKind::Signature),
            "image" => Some(FieldKind::Image),
            "date" => Some(FieldKind::Date),
            "checkbox" | "marker" => Some(FieldKind::Marker),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub placement: FieldPlacement,
    pub content: FieldContent,
}

impl Field {
    pub fn new(placement: FieldPlacement, content: FieldContent) -> Self {
        Self { placement, content }
    }

    pub fn id(&self) -> &str {
        &self.placement.id
    }

    pub fn kind(&self) -> FieldKind {
        self.content.kind()
    }
}

/// Rejects invalid placements and duplicate ids before anything is drawn.
pub fn validate_fields(fields: &[Field]) -> Result<(), FieldMarkError> {
    let mut seen = std::collections::BTreeSet::new();
    for field in fields {
        field.placement.validate()?;
        if !seen.insert(field.id()) {
            return Err(FieldMarkError::field(
                Stage::Validate,
                field.id(),
                "duplicate field id",
            ));
        }
    }
    Ok(())
}
