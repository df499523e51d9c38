use crate::canvas::Canvas;
use crate::clock::{Clock, DateFormat};
use crate::content::winansi_replacements;
use crate::error::{FieldMarkError, Stage};
use crate::field::{Field, FieldContent, ImageFormat};
use crate::fit::aspect_fit;
use crate::images::{ImageData, decode_image_bytes};
use crate::types::{Color, PointRect, Pt};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;

// Helvetica cap height in text space units (1/1000 em).
const CAP_HEIGHT_EM: f64 = 0.718;

#[derive(Clone)]
pub(crate) struct RenderOptions {
    pub text_inset: f64,
    pub max_font_size: f64,
    pub font_height_ratio: f64,
    pub font_name: String,
    pub text_color: Color,
    pub marker_color: Color,
    pub date_format: Arc<DateFormat>,
    pub clock: Arc<dyn Clock>,
}

/// Non-fatal problem found while stamping. The field it names was skipped or degraded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StampWarning {
    pub field_id: Option<String>,
    pub code: String,
    pub message: String,
}

impl StampWarning {
    pub(crate) fn field(field_id: &str, code: &str, message: impl Into<String>) -> Self {
        Self {
            field_id: Some(field_id.to_string()),
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn document(code: &str, message: impl Into<String>) -> Self {
        Self {
            field_id: None,
            code: code.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RenderOutcome {
    Drawn,
    Blank,
    Skipped,
}

/// Image XObjects used by the stamp, keyed by content so repeated bytes embed once.
#[derive(Debug, Default)]
pub(crate) struct ImageRegistry {
    by_digest: BTreeMap<[u8; 32], String>,
    images: Vec<(String, ImageData)>,
}

impl ImageRegistry {
    fn lookup(&self, digest: &[u8; 32]) -> Option<(&str, &ImageData)> {
        let name = self.by_digest.get(digest)?;
        self.images
            .iter()
            .find(|(n, _)| n == name)
            .map(|(n, data)| (n.as_str(), data))
    }

    fn insert(&mut self, digest: [u8; 32], data: ImageData) -> String {
        let name = format!("FMIm{}", self.images.len() + 1);
        self.by_digest.insert(digest, name.clone());
        self.images.push((name.clone(), data));
        name
    }

    pub(crate) fn into_images(self) -> Vec<(String, ImageData)> {
        self.images
    }

    pub(crate) fn len(&self) -> usize {
        self.images.len()
    }
}

pub(crate) struct FieldRenderer<'a> {
    options: &'a RenderOptions,
    images: ImageRegistry,
    warnings: Vec<StampWarning>,
}

impl<'a> FieldRenderer<'a> {
    pub(crate) fn new(options: &'a RenderOptions) -> Self {
        Self {
            options,
            images: ImageRegistry::default(),
            warnings: Vec::new(),
        }
    }

    pub(crate) fn render_field(
        &mut self,
        canvas: &mut Canvas,
        field: &Field,
        rect: PointRect,
    ) -> Result<RenderOutcome, FieldMarkError> {
        match &field.content {
            FieldContent::Text { value } => Ok(self.draw_text(canvas, field.id(), value, rect)),
            FieldContent::Date { value } => {
                let text = match value {
                    Some(explicit) => explicit.trim().to_string(),
                    None => self.options.date_format.render(self.options.clock.today()),
                };
                Ok(self.draw_text(canvas, field.id(), &text, rect))
            }
            FieldContent::Signature { image, format } | FieldContent::Image { image, format } => {
                self.draw_image(canvas, field.id(), image, *format, rect)
            }
            FieldContent::Marker { checked } => {
                if !*checked {
                    return Ok(RenderOutcome::Blank);
                }
                let (cx, cy) = rect.center();
                let radius = rect.width.min(rect.height) / 3.0;
                canvas.save_state();
                canvas.set_fill_color(self.options.marker_color);
                canvas.fill_circle(cx, cy, radius);
                canvas.restore_state();
                Ok(RenderOutcome::Drawn)
            }
        }
    }

    fn draw_text(
        &mut self,
        canvas: &mut Canvas,
        field_id: &str,
        text: &str,
        rect: PointRect,
    ) -> RenderOutcome {
        if text.is_empty() {
            return RenderOutcome::Blank;
        }
        let replaced = winansi_replacements(text);
        if replaced > 0 {
            self.warnings.push(StampWarning::field(
                field_id,
                "text_lossy",
                format!("{replaced} character(s) not representable in WinAnsi were replaced"),
            ));
        }
        let size = text_font_size(rect.height, self.options);
        let (_, mid_y) = rect.center();
        let baseline = mid_y - size * CAP_HEIGHT_EM / 2.0;
        canvas.save_state();
        canvas.set_fill_color(self.options.text_color);
        canvas.set_font(&self.options.font_name, Pt::from_f64(size));
        canvas.draw_string(rect.x + self.options.text_inset, baseline, text);
        canvas.restore_state();
        RenderOutcome::Drawn
    }

    fn draw_image(
        &mut self,
        canvas: &mut Canvas,
        field_id: &str,
        bytes: &[u8],
        format: ImageFormat,
        rect: PointRect,
    ) -> Result<RenderOutcome, FieldMarkError> {
        let digest: [u8; 32] = Sha256::digest(bytes).into();
        let (name, width, height) = match self.images.lookup(&digest) {
            Some((name, data)) => (name.to_string(), data.width, data.height),
            None => match decode_image_bytes(bytes, format) {
                Ok(data) => {
                    let (w, h) = (data.width, data.height);
                    (self.images.insert(digest, data), w, h)
                }
                Err(err) => {
                    self.warnings.push(StampWarning::field(
                        field_id,
                        "image_decode_failed",
                        err.to_string(),
                    ));
                    return Ok(RenderOutcome::Skipped);
                }
            },
        };

        let fit = aspect_fit(rect.width, rect.height, width as f64, height as f64)
            .map_err(|err| FieldMarkError::field(Stage::Render, field_id, err.to_string()))?;
        canvas.draw_image(
            rect.x + fit.offset_x,
            rect.y + fit.offset_y,
            fit.width,
            fit.height,
            &name,
        );
        Ok(RenderOutcome::Drawn)
    }

    pub(crate) fn finish(self) -> (ImageRegistry, Vec<StampWarning>) {
        (self.images, self.warnings)
    }
}

pub(crate) fn text_font_size(rect_height: f64, options: &RenderOptions) -> f64 {
    (rect_height * options.font_height_ratio).min(options.max_font_size)
}
