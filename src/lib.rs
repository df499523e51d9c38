mod canvas;
mod clock;
mod content;
mod debug;
mod error;
mod field;
mod fit;
mod images;
mod pdfinspect;
mod pipeline;
mod render;
mod request;
mod stamp;
mod transform;
mod types;

pub use canvas::{Canvas, Command};
pub use clock::{Clock, DEFAULT_DATE_FORMAT, FixedClock, SystemClock};
use clock::DateFormat;
use debug::DebugLogger;

pub use error::{FieldMarkError, Stage};
pub use field::{
    Field, FieldContent, FieldKind, FieldPlacement, ImageFormat, validate_fields,
};
pub use fieldmark_audit::{
    AuditError, AuditLog, AuditRecord, JsonLinesAuditLog, MemoryAuditLog, hex_sha256,
};
pub use fit::{AspectFit, aspect_fit};
pub use pdfinspect::{
    PageGeometry, PdfInspectError, PdfInspectErrorCode, PdfInspectReport, inspect_pdf_bytes,
    inspect_pdf_path, require_stampable,
};
pub use pipeline::{ORIGINAL_HASH_HEADER, SIGNED_HASH_HEADER, SignedDocument};
pub use render::StampWarning;
use render::RenderOptions;
pub use request::{SignRequest, parse_fields, parse_page_hint};
pub use transform::{
    PixelRect, SurfaceScale, percent_to_pixels, percent_to_points, pixels_to_percent,
    points_to_percent,
};
pub use types::{Color, PageDimensions, PointRect, Pt};
use std::sync::Arc;

// Standard 14 text faces that accept WinAnsiEncoding.
const BASE14_TEXT_FONTS: [&str; 12] = [
    "Helvetica",
    "Helvetica-Bold",
    "Helvetica-Oblique",
    "Helvetica-BoldOblique",
    "Times-Roman",
    "Times-Bold",
    "Times-Italic",
    "Times-BoldItalic",
    "Courier",
    "Courier-Bold",
    "Courier-Oblique",
    "Courier-BoldOblique",
];

/// Stamps editor fields onto the first page of PDF documents.
///
/// A stamper holds only immutable options and may be shared across threads; every call to
/// [`FieldStamper::sign`] is an independent pass over its own copy of the document.
pub struct FieldStamper {
    options: RenderOptions,
    debug: Option<Arc<DebugLogger>>,
}

#[derive(Clone)]
pub struct FieldStamperBuilder {
    text_inset: f64,
    max_font_size: f64,
    font_height_ratio: f64,
    font_name: String,
    text_color: Color,
    marker_color: Color,
    date_format: String,
    clock: Arc<dyn Clock>,
    debug_path: Option<std::path::PathBuf>,
}

/// One document of a batch.
#[derive(Debug, Clone)]
pub struct SignJob {
    pub source: Vec<u8>,
    pub fields: Vec<Field>,
    pub page_hint: Option<PageDimensions>,
}

/// Which side of a signing event a verified document matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestMatch {
    Original,
    Signed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Verification {
    pub digest: String,
    pub matched: Option<(DigestMatch, AuditRecord)>,
}

impl Verification {
    pub fn is_known(&self) -> bool {
        self.matched.is_some()
    }
}

impl FieldStamper {
    pub fn builder() -> FieldStamperBuilder {
        FieldStamperBuilder::new()
    }

    pub fn sign(
        &self,
        source: &[u8],
        fields: &[Field],
        page_hint: Option<PageDimensions>,
    ) -> Result<SignedDocument, FieldMarkError> {
        pipeline::run(
            source,
            fields,
            page_hint,
            &self.options,
            self.debug.as_deref(),
        )
    }

    /// Parses the editor's JSON payload, then signs.
    pub fn sign_request(
        &self,
        source: &[u8],
        fields_json: &str,
        page_hint_json: Option<&str>,
    ) -> Result<SignedDocument, FieldMarkError> {
        let request = SignRequest::from_parts(fields_json, page_hint_json)?;
        self.sign(source, &request.fields, request.page_hint)
    }

    /// Signs independent documents in parallel. Results keep the order of `jobs`.
    pub fn sign_batch(&self, jobs: &[SignJob]) -> Vec<Result<SignedDocument, FieldMarkError>> {
        use rayon::prelude::*;

        jobs.par_iter()
            .map(|job| self.sign(&job.source, &job.fields, job.page_hint))
            .collect()
    }

    /// Signs and appends the resulting audit record. Nothing is recorded if signing fails.
    pub fn sign_and_record(
        &self,
        source: &[u8],
        fields: &[Field],
        page_hint: Option<PageDimensions>,
        source_filename: Option<&str>,
        log: &dyn AuditLog,
    ) -> Result<SignedDocument, FieldMarkError> {
        let signed = self.sign(source, fields, page_hint)?;
        log.append(audit_record(&signed, source_filename))?;
        Ok(signed)
    }
}

/// Audit record for a finished signing pass, stamped with the current UTC time.
pub fn audit_record(signed: &SignedDocument, source_filename: Option<&str>) -> AuditRecord {
    let timestamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    AuditRecord::new(
        signed.original_digest.as_str(),
        signed.output_digest.as_str(),
        timestamp,
        source_filename.map(str::to_string),
        signed.field_count,
    )
}

/// Digests `bytes` and looks the digest up in `log` on either side of a signing event.
pub fn verify_document(bytes: &[u8], log: &dyn AuditLog) -> Result<Verification, FieldMarkError> {
    let digest = hex_sha256(bytes);
    let matched = log.lookup(&digest)?.map(|record| {
        let side = if record.output_digest == digest {
            DigestMatch::Signed
        } else {
            DigestMatch::Original
        };
        (side, record)
    });
    Ok(Verification { digest, matched })
}

impl FieldStamperBuilder {
    pub fn new() -> Self {
        Self {
            text_inset: 5.0,
            max_font_size: 12.0,
            font_height_ratio: 0.6,
            font_name: "Helvetica".to_string(),
            text_color: Color::BLACK,
            marker_color: Color::BLACK,
            date_format: DEFAULT_DATE_FORMAT.to_string(),
            clock: Arc::new(SystemClock),
            debug_path: None,
        }
    }

    /// Distance in points from a text field's left edge to its first glyph.
    pub fn text_inset(mut self, inset: f64) -> Self {
        self.text_inset = inset;
        self
    }

    pub fn max_font_size(mut self, size: f64) -> Self {
        self.max_font_size = size;
        self
    }

    /// Font size as a fraction of the field height, before the `max_font_size` cap.
    pub fn font_height_ratio(mut self, ratio: f64) -> Self {
        self.font_height_ratio = ratio;
        self
    }

    pub fn font_name(mut self, name: impl Into<String>) -> Self {
        self.font_name = name.into();
        self
    }

    pub fn text_color(mut self, color: Color) -> Self {
        self.text_color = color;
        self
    }

    pub fn marker_color(mut self, color: Color) -> Self {
        self.marker_color = color;
        self
    }

    /// strftime pattern for date fields rendered from the clock.
    pub fn date_format(mut self, pattern: impl Into<String>) -> Self {
        self.date_format = pattern.into();
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn debug_log(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.debug_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<FieldStamper, FieldMarkError> {
        if !self.text_inset.is_finite() || self.text_inset < 0.0 {
            return Err(FieldMarkError::InvalidConfiguration(
                "text_inset must be a finite value >= 0".to_string(),
            ));
        }
        if !self.max_font_size.is_finite() || self.max_font_size <= 0.0 {
            return Err(FieldMarkError::InvalidConfiguration(
                "max_font_size must be > 0".to_string(),
            ));
        }
        if !self.font_height_ratio.is_finite()
            || self.font_height_ratio <= 0.0
            || self.font_height_ratio > 1.0
        {
            return Err(FieldMarkError::InvalidConfiguration(
                "font_height_ratio must be in (0, 1]".to_string(),
            ));
        }
        if !BASE14_TEXT_FONTS.contains(&self.font_name.as_str()) {
            return Err(FieldMarkError::InvalidConfiguration(format!(
                "font_name must be a standard 14 text font, got {}",
                self.font_name
            )));
        }
        for (name, color) in [("text_color", self.text_color), ("marker_color", self.marker_color)]
        {
            let in_range = |c: f32| c.is_finite() && (0.0..=1.0).contains(&c);
            if !(in_range(color.r) && in_range(color.g) && in_range(color.b)) {
                return Err(FieldMarkError::InvalidConfiguration(format!(
                    "{name} components must be in [0, 1]"
                )));
            }
        }
        let date_format = DateFormat::new(&self.date_format).ok_or_else(|| {
            FieldMarkError::InvalidConfiguration(format!(
                "date_format is not a valid strftime pattern: {}",
                self.date_format
            ))
        })?;
        let debug = if let Some(path) = self.debug_path {
            Some(Arc::new(DebugLogger::new(path)?))
        } else {
            None
        };
        Ok(FieldStamper {
            options: RenderOptions {
                text_inset: self.text_inset,
                max_font_size: self.max_font_size,
                font_height_ratio: self.font_height_ratio,
                font_name: self.font_name,
                text_color: self.text_color,
                marker_color: self.marker_color,
                date_format: Arc::new(date_format),
                clock: self.clock,
            },
            debug,
        })
    }
}

impl Default for FieldStamperBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::images::tests::png_bytes;
    use crate::pdfinspect::tests::make_single_page_pdf_bytes;
    use crate::pipeline::tests::form_contents;
    use chrono::NaiveDate;

    fn stamper() -> FieldStamper {
        FieldStamper::builder()
            .clock(FixedClock(
                NaiveDate::from_ymd_opt(2025, 1, 31).expect("date"),
            ))
            .build()
            .expect("stamper")
    }

    fn date_field(id: &str) -> Field {
        Field::new(
            FieldPlacement::new(id, 60.0, 85.0, 20.0, 4.0),
            FieldContent::Date { value: None },
        )
    }

    #[test]
    fn stamper_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<FieldStamper>();
    }

    #[test]
    fn builder_rejects_invalid_options() {
        let cases = [
            FieldStamper::builder().text_inset(-1.0),
            FieldStamper::builder().max_font_size(0.0),
            FieldStamper::builder().font_height_ratio(1.5),
            FieldStamper::builder().font_name("Comic Sans"),
            FieldStamper::builder().text_color(Color::rgb(2.0, 0.0, 0.0)),
            FieldStamper::builder().date_format("%Q"),
        ];
        for builder in cases {
            assert!(matches!(
                builder.build(),
                Err(FieldMarkError::InvalidConfiguration(_))
            ));
        }
    }

    #[test]
    fn absent_date_renders_from_clock_with_format() {
        let source = make_single_page_pdf_bytes("CONTRACT");
        let signed = stamper()
            .sign(&source, &[date_field("when")], None)
            .expect("sign");
        assert!(form_contents(&signed.bytes)[0].contains("(01/31/2025) Tj"));

        let iso = FieldStamper::builder()
            .clock(FixedClock(
                NaiveDate::from_ymd_opt(2025, 1, 31).expect("date"),
            ))
            .date_format("%Y-%m-%d")
            .build()
            .expect("stamper");
        let signed = iso
            .sign(&source, &[date_field("when")], None)
            .expect("sign");
        assert!(form_contents(&signed.bytes)[0].contains("(2025-01-31) Tj"));
    }

    #[test]
    fn sign_request_parses_json_payload() {
        let source = make_single_page_pdf_bytes("CONTRACT");
        let fields = r#"[
            {"id":"name","type":"text","x":10,"y":20,"width":25,"height":6,"value":"Jane"},
            {"id":"ok","type":"checkbox","x":80,"y":80,"width":3,"height":3,"checked":true}
        ]"#;
        let signed = stamper()
            .sign_request(&source, fields, Some(r#"{"width":612,"height":792}"#))
            .expect("sign");
        assert_eq!(signed.field_count, 2);
        assert!(signed.warnings.is_empty());
        assert!(form_contents(&signed.bytes)[0].contains("(Jane) Tj"));

        let err = stamper()
            .sign_request(&source, r#"[{"id":"q","type":"radio","x":0,"y":0,"width":1,"height":1}]"#, None)
            .expect_err("unknown type");
        assert_eq!(err.field_id(), Some("q"));
    }

    #[test]
    fn batch_keeps_job_order_and_isolates_failures() {
        let good = make_single_page_pdf_bytes("ONE");
        let jobs = vec![
            SignJob {
                source: good.clone(),
                fields: vec![date_field("a")],
                page_hint: None,
            },
            SignJob {
                source: b"not a pdf".to_vec(),
                fields: Vec::new(),
                page_hint: None,
            },
            SignJob {
                source: good.clone(),
                fields: vec![Field::new(
                    FieldPlacement::new("img", 10.0, 10.0, 30.0, 10.0),
                    FieldContent::Image {
                        image: png_bytes(4, 4, 128),
                        format: ImageFormat::Png,
                    },
                )],
                page_hint: None,
            },
        ];
        let results = stamper().sign_batch(&jobs);
        assert_eq!(results.len(), 3);
        let first = results[0].as_ref().expect("first");
        assert_eq!(first.original_digest, hex_sha256(&good));
        assert!(results[1].is_err());
        let third = results[2].as_ref().expect("third");
        assert!(third.warnings.is_empty());
        assert_ne!(first.output_digest, third.output_digest);
    }

    #[test]
    fn recorded_documents_verify_on_both_sides() {
        let log = MemoryAuditLog::new();
        let source = make_single_page_pdf_bytes("CONTRACT");
        let signed = stamper()
            .sign_and_record(&source, &[date_field("d")], None, Some("lease.pdf"), &log)
            .expect("sign");
        assert_eq!(log.len(), 1);

        let on_output = verify_document(&signed.bytes, &log).expect("verify");
        let (side, record) = on_output.matched.expect("known output");
        assert_eq!(side, DigestMatch::Signed);
        assert_eq!(record.source_filename.as_deref(), Some("lease.pdf"));
        assert_eq!(record.field_count, 1);

        let on_source = verify_document(&source, &log).expect("verify");
        assert_eq!(
            on_source.matched.map(|(side, _)| side),
            Some(DigestMatch::Original)
        );

        let unknown = verify_document(b"something else", &log).expect("verify");
        assert!(!unknown.is_known());
        assert_eq!(unknown.digest, hex_sha256(b"something else"));
    }

    #[test]
    fn failed_signing_records_nothing() {
        let log = MemoryAuditLog::new();
        let result = stamper().sign_and_record(b"garbage", &[], None, None, &log);
        assert!(result.is_err());
        assert!(log.is_empty());
    }

    #[test]
    fn debug_log_path_receives_pipeline_events() {
        let path = std::env::temp_dir().join(format!(
            "fieldmark_stamper_{}_{}.log",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        let stamper = FieldStamper::builder()
            .debug_log(&path)
            .build()
            .expect("stamper");
        let source = make_single_page_pdf_bytes("CONTRACT");
        stamper.sign(&source, &[], None).expect("sign");
        let text = std::fs::read_to_string(&path).expect("read log");
        assert!(text.contains("\"type\":\"pipeline.loaded\""));
        assert!(text.contains("\"type\":\"debug.summary\""));
        let _ = std::fs::remove_file(&path);
    }
}
