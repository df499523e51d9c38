//! One signing pass over one in-memory document.
//!
//! Stages run strictly in order: load, validate, transform and render each field, serialize,
//! digest. Any fatal error aborts the pass before output bytes exist.

use crate::canvas::Canvas;
use crate::content::render_commands;
use crate::debug::DebugLogger;
use crate::error::{FieldMarkError, Stage};
use crate::field::{Field, validate_fields};
use crate::pdfinspect::{first_page_id, inspect_document, require_stampable};
use crate::render::{FieldRenderer, RenderOptions, RenderOutcome, StampWarning};
use crate::stamp::{apply_stamp, serialize};
use crate::transform::percent_to_points;
use crate::types::PageDimensions;
use fieldmark_audit::hex_sha256;
use lopdf::Document as LoDocument;
use serde_json::Value;
use std::collections::BTreeMap;

// Points of slack allowed between the editor's page size and the document's.
const PAGE_HINT_TOLERANCE: f64 = 0.5;

pub const ORIGINAL_HASH_HEADER: &str = "X-Original-Hash";
pub const SIGNED_HASH_HEADER: &str = "X-Signed-Hash";

/// Output of a signing pass: the new document and the digests tying it to its source.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedDocument {
    pub bytes: Vec<u8>,
    pub original_digest: String,
    pub output_digest: String,
    pub page_dimensions: PageDimensions,
    pub field_count: usize,
    pub warnings: Vec<StampWarning>,
}

impl SignedDocument {
    /// Header pairs carrying both digests, for the transport layer.
    pub fn response_headers(&self) -> [(&'static str, String); 2] {
        [
            (ORIGINAL_HASH_HEADER, self.original_digest.clone()),
            (SIGNED_HASH_HEADER, self.output_digest.clone()),
        ]
    }
}

pub(crate) fn run(
    source: &[u8],
    fields: &[Field],
    page_hint: Option<PageDimensions>,
    options: &RenderOptions,
    debug: Option<&DebugLogger>,
) -> Result<SignedDocument, FieldMarkError> {
    let log = |kind: &str, data: &[(&str, Value)]| {
        if let Some(logger) = debug {
            logger.event(kind, data);
        }
    };
    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    let mut count = |key: &str, amount: u64| {
        if debug.is_some() {
            *counts.entry(key.to_string()).or_insert(0) += amount;
        }
    };
    let mut warnings: Vec<StampWarning> = Vec::new();

    // Loaded
    let mut doc = LoDocument::load_mem(source).map_err(|err| {
        FieldMarkError::structural(Stage::Load, format!("unparseable pdf: {err}"))
    })?;
    let report = inspect_document(&doc, source.len());
    let geometry = require_stampable(&report)
        .map_err(|err| FieldMarkError::structural(Stage::Load, err.to_string()))?;
    let page_id = first_page_id(&doc)
        .ok_or_else(|| FieldMarkError::structural(Stage::Load, "pdf has no pages"))?;
    let page = geometry.dimensions;
    log(
        "pipeline.loaded",
        &[
            ("pdf_version", Value::from(report.pdf_version.as_str())),
            ("page_count", Value::from(report.page_count)),
            ("page_width", Value::from(page.width)),
            ("page_height", Value::from(page.height)),
            ("source_bytes", Value::from(source.len())),
        ],
    );
    if let Some(hint) = page_hint {
        if !hint.approx_eq(&page, PAGE_HINT_TOLERANCE) {
            warnings.push(StampWarning::document(
                "page_dimension_hint_mismatch",
                format!(
                    "editor page {}x{} differs from document page {}x{}",
                    hint.width, hint.height, page.width, page.height
                ),
            ));
        }
    }
    if geometry.rotate.rem_euclid(360) != 0 {
        warnings.push(StampWarning::document(
            "page_rotated",
            format!(
                "first page is rotated {} degrees; fields are placed in unrotated page space",
                geometry.rotate
            ),
        ));
    }

    // Validated
    validate_fields(fields)?;
    log(
        "pipeline.validated",
        &[("field_count", Value::from(fields.len()))],
    );

    // Transformed + Rendered
    let mut canvas = Canvas::new();
    let mut renderer = FieldRenderer::new(options);
    for field in fields {
        let rect = percent_to_points(&field.placement, page).map_err(|err| {
            FieldMarkError::field(Stage::Transform, field.id(), err.to_string())
        })?;
        let outcome = renderer.render_field(&mut canvas, field, rect)?;
        count(outcome_counter(outcome), 1);
        log(
            "pipeline.field",
            &[
                ("id", Value::from(field.id())),
                ("kind", Value::from(field.kind().as_str())),
                ("outcome", Value::from(outcome_label(outcome))),
                ("x", Value::from(rect.x)),
                ("y", Value::from(rect.y)),
                ("width", Value::from(rect.width)),
                ("height", Value::from(rect.height)),
            ],
        );
    }
    let (images, field_warnings) = renderer.finish();
    warnings.extend(field_warnings);
    let image_count = images.len();
    let content = render_commands(&canvas.finish());
    log(
        "pipeline.rendered",
        &[
            ("content_bytes", Value::from(content.bytes.len())),
            ("fonts", Value::from(content.fonts.len())),
            ("images", Value::from(image_count)),
        ],
    );

    // Serialized
    let summary = if content.bytes.is_empty() {
        None
    } else {
        Some(apply_stamp(
            &mut doc,
            page_id,
            &geometry,
            content,
            images.into_images(),
        )?)
    };
    let bytes = serialize(&mut doc)?;
    log(
        "pipeline.serialized",
        &[
            ("output_bytes", Value::from(bytes.len())),
            (
                "form",
                summary
                    .as_ref()
                    .map(|s| Value::from(s.form_name.as_str()))
                    .unwrap_or(Value::Null),
            ),
            (
                "fonts_written",
                Value::from(summary.as_ref().map_or(0, |s| s.fonts_written)),
            ),
            (
                "images_written",
                Value::from(summary.as_ref().map_or(0, |s| s.images_written)),
            ),
        ],
    );

    // Digested
    let original_digest = hex_sha256(source);
    let output_digest = hex_sha256(&bytes);
    log(
        "pipeline.digested",
        &[
            ("original_digest", Value::from(original_digest.as_str())),
            ("output_digest", Value::from(output_digest.as_str())),
        ],
    );

    for warning in &warnings {
        count("warnings", 1);
        log(
            "pipeline.warning",
            &[
                (
                    "field_id",
                    warning
                        .field_id
                        .as_deref()
                        .map(Value::from)
                        .unwrap_or(Value::Null),
                ),
                ("code", Value::from(warning.code.as_str())),
                ("message", Value::from(warning.message.as_str())),
            ],
        );
    }
    if let Some(logger) = debug {
        logger.summary("sign", &counts);
        logger.flush();
    }

    Ok(SignedDocument {
        bytes,
        original_digest,
        output_digest,
        page_dimensions: page,
        field_count: fields.len(),
        warnings,
    })
}

fn outcome_label(outcome: RenderOutcome) -> &'static str {
    match outcome {
        RenderOutcome::Drawn => "drawn",
        RenderOutcome::Blank => "blank",
        RenderOutcome::Skipped => "skipped",
    }
}

fn outcome_counter(outcome: RenderOutcome) -> &'static str {
    match outcome {
        RenderOutcome::Drawn => "fields_drawn",
        RenderOutcome::Blank => "fields_blank",
        RenderOutcome::Skipped => "fields_skipped",
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::debug::tests::SharedBuf;
    use crate::field::{FieldContent, FieldPlacement, ImageFormat};
    use crate::images::tests::png_bytes;
    use crate::pdfinspect::tests::{make_pdf_bytes, make_single_page_pdf_bytes};
    use crate::render::tests::test_options;
    use lopdf::Object as LoObject;

    fn text_field(id: &str, value: &str) -> Field {
        Field::new(
            FieldPlacement::new(id, 10.0, 20.0, 25.0, 6.0),
            FieldContent::Text {
                value: value.to_string(),
            },
        )
    }

    /// Decompressed bytes of every form XObject in the document.
    pub(crate) fn form_contents(bytes: &[u8]) -> Vec<String> {
        let doc = LoDocument::load_mem(bytes).expect("reload");
        doc.objects
            .values()
            .filter_map(|obj| match obj {
                LoObject::Stream(stream) => {
                    let is_form = stream
                        .dict
                        .get(b"Subtype")
                        .and_then(LoObject::as_name)
                        .map(|name| name == b"Form")
                        .unwrap_or(false);
                    is_form.then(|| {
                        let body = stream
                            .decompressed_content()
                            .unwrap_or_else(|_| stream.content.clone());
                        String::from_utf8_lossy(&body).to_string()
                    })
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn text_field_lands_in_stamp_and_digests_match() {
        let source = make_single_page_pdf_bytes("CONTRACT");
        let signed = run(
            &source,
            &[text_field("name", "Jane Doe")],
            None,
            &test_options(),
            None,
        )
        .expect("sign");

        assert_eq!(signed.original_digest, hex_sha256(&source));
        assert_eq!(signed.output_digest, hex_sha256(&signed.bytes));
        assert_ne!(signed.original_digest, signed.output_digest);
        assert_eq!(signed.page_dimensions, PageDimensions::letter());
        assert_eq!(signed.field_count, 1);
        assert!(signed.warnings.is_empty());

        let forms = form_contents(&signed.bytes);
        assert_eq!(forms.len(), 1);
        // rect (61.2, 586.08, 153, 47.52): inset 5, size 12, baseline 609.84 - 4.308
        assert!(forms[0].contains("66.2 605.532 Td\n"));
        assert!(forms[0].contains("(Jane Doe) Tj"));

        let doc = LoDocument::load_mem(&signed.bytes).expect("reload");
        let page_id = first_page_id(&doc).expect("page");
        let page_content = String::from_utf8_lossy(&doc.get_page_content(page_id).expect("content"))
            .to_string();
        assert!(page_content.contains("(CONTRACT) Tj"));
        assert!(page_content.contains("/FMStamp1 Do"));
    }

    #[test]
    fn corrupt_signature_is_skipped_and_text_still_drawn() {
        let source = make_single_page_pdf_bytes("CONTRACT");
        let fields = vec![
            Field::new(
                FieldPlacement::new("sig", 10.0, 40.0, 30.0, 10.0),
                FieldContent::Signature {
                    image: b"not an image".to_vec(),
                    format: ImageFormat::Png,
                },
            ),
            text_field("name", "Jane"),
        ];
        let signed = run(&source, &fields, None, &test_options(), None).expect("sign");

        assert_eq!(signed.warnings.len(), 1);
        assert_eq!(signed.warnings[0].field_id.as_deref(), Some("sig"));
        assert_eq!(signed.warnings[0].code, "image_decode_failed");
        let forms = form_contents(&signed.bytes);
        assert!(forms[0].contains("(Jane) Tj"));
        assert!(!forms[0].contains(" Do Q"));
    }

    #[test]
    fn signature_image_is_embedded_and_fitted() {
        let source = make_single_page_pdf_bytes("CONTRACT");
        let fields = vec![Field::new(
            FieldPlacement::new("sig", 10.0, 20.0, 25.0, 6.0),
            FieldContent::Signature {
                image: png_bytes(300, 100, 255),
                format: ImageFormat::Png,
            },
        )];
        let signed = run(&source, &fields, None, &test_options(), None).expect("sign");
        assert!(signed.warnings.is_empty());
        let forms = form_contents(&signed.bytes);
        assert!(forms[0].contains("q 142.56 0 0 47.52 66.42 586.08 cm /FMIm1 Do Q"));
    }

    #[test]
    fn same_input_produces_identical_output() {
        let source = make_single_page_pdf_bytes("CONTRACT");
        let fields = vec![
            text_field("name", "Jane"),
            Field::new(
                FieldPlacement::new("when", 50.0, 50.0, 20.0, 4.0),
                FieldContent::Date {
                    value: Some("02/03/2024".to_string()),
                },
            ),
            Field::new(
                FieldPlacement::new("ok", 80.0, 80.0, 3.0, 3.0),
                FieldContent::Marker { checked: true },
            ),
        ];
        let first = run(&source, &fields, None, &test_options(), None).expect("first");
        let second = run(&source, &fields, None, &test_options(), None).expect("second");
        assert_eq!(first.bytes, second.bytes);
        assert_eq!(first.output_digest, second.output_digest);
    }

    #[test]
    fn malformed_source_fails_at_load() {
        let err = run(b"%PDF-1.7 garbage", &[], None, &test_options(), None)
            .expect_err("malformed");
        assert_eq!(err.stage(), Some(Stage::Load));
    }

    #[test]
    fn invalid_placement_aborts_before_render() {
        let source = make_single_page_pdf_bytes("CONTRACT");
        let fields = vec![Field::new(
            FieldPlacement::new("off-page", 90.0, 10.0, 20.0, 5.0),
            FieldContent::Marker { checked: true },
        )];
        let err = run(&source, &fields, None, &test_options(), None).expect_err("overflow");
        assert_eq!(err.stage(), Some(Stage::Validate));
        assert_eq!(err.field_id(), Some("off-page"));
    }

    #[test]
    fn duplicate_ids_abort() {
        let source = make_single_page_pdf_bytes("CONTRACT");
        let fields = vec![text_field("dup", "a"), text_field("dup", "b")];
        let err = run(&source, &fields, None, &test_options(), None).expect_err("dup");
        assert_eq!(err.field_id(), Some("dup"));
    }

    #[test]
    fn page_hint_mismatch_is_warning_only() {
        let source = make_single_page_pdf_bytes("CONTRACT");
        let signed = run(
            &source,
            &[text_field("name", "Jane")],
            Some(PageDimensions::a4()),
            &test_options(),
            None,
        )
        .expect("sign");
        assert_eq!(signed.page_dimensions, PageDimensions::letter());
        assert_eq!(signed.warnings.len(), 1);
        assert_eq!(signed.warnings[0].code, "page_dimension_hint_mismatch");
        assert!(signed.warnings[0].field_id.is_none());

        let matching = run(
            &source,
            &[text_field("name", "Jane")],
            Some(PageDimensions::letter()),
            &test_options(),
            None,
        )
        .expect("sign");
        assert!(matching.warnings.is_empty());
    }

    #[test]
    fn inherited_media_box_sets_page_size() {
        let source = make_pdf_bytes(
            "A4",
            vec![0.into(), 0.into(), 595.into(), 842.into()],
            false,
        );
        let signed = run(
            &source,
            &[text_field("name", "Jane")],
            None,
            &test_options(),
            None,
        )
        .expect("sign");
        assert_eq!(signed.page_dimensions.width, 595.0);
        assert_eq!(signed.page_dimensions.height, 842.0);
    }

    #[test]
    fn empty_field_list_leaves_page_content_unwrapped() {
        let source = make_single_page_pdf_bytes("CONTRACT");
        let signed = run(&source, &[], None, &test_options(), None).expect("sign");
        assert_eq!(signed.field_count, 0);
        assert!(form_contents(&signed.bytes).is_empty());
    }

    #[test]
    fn response_headers_carry_both_digests() {
        let source = make_single_page_pdf_bytes("CONTRACT");
        let signed = run(&source, &[], None, &test_options(), None).expect("sign");
        let headers = signed.response_headers();
        assert_eq!(headers[0], ("X-Original-Hash", signed.original_digest.clone()));
        assert_eq!(headers[1], ("X-Signed-Hash", signed.output_digest.clone()));
    }

    #[test]
    fn debug_log_records_stages_fields_and_summary() {
        let buf = SharedBuf::default();
        let logger = DebugLogger::from_writer(buf.clone());
        let source = make_single_page_pdf_bytes("CONTRACT");
        let fields = vec![
            text_field("name", "Jane"),
            Field::new(
                FieldPlacement::new("box", 80.0, 80.0, 3.0, 3.0),
                FieldContent::Marker { checked: false },
            ),
        ];
        run(&source, &fields, None, &test_options(), Some(&logger)).expect("sign");

        let lines = buf.lines();
        let kinds: Vec<&str> = lines
            .iter()
            .map(|line| line["type"].as_str().expect("type"))
            .collect();
        assert_eq!(
            kinds,
            vec![
                "pipeline.loaded",
                "pipeline.validated",
                "pipeline.field",
                "pipeline.field",
                "pipeline.rendered",
                "pipeline.serialized",
                "pipeline.digested",
                "debug.summary",
            ]
        );
        assert_eq!(lines[2]["outcome"], "drawn");
        assert_eq!(lines[3]["outcome"], "blank");
        assert_eq!(lines[5]["form"], "FMStamp1");
        assert_eq!(lines[7]["counts"]["fields_drawn"], 1);
        assert_eq!(lines[7]["counts"]["fields_blank"], 1);
    }

    #[test]
    fn concurrent_runs_on_one_logger_keep_separate_counts() {
        const THREADS: usize = 8;
        const RUNS: usize = 5;
        const MARKERS: usize = 40;

        let buf = SharedBuf::default();
        let logger = DebugLogger::from_writer(buf.clone());
        let source = make_single_page_pdf_bytes("CONTRACT");
        let fields: Vec<Field> = (0..MARKERS)
            .map(|i| {
                Field::new(
                    FieldPlacement::new(
                        format!("box-{i}"),
                        (i % 10) as f64 * 10.0,
                        (i / 10) as f64 * 10.0,
                        5.0,
                        5.0,
                    ),
                    FieldContent::Marker { checked: true },
                )
            })
            .collect();
        let options = test_options();

        std::thread::scope(|scope| {
            for _ in 0..THREADS {
                scope.spawn(|| {
                    for _ in 0..RUNS {
                        run(&source, &fields, None, &options, Some(&logger)).expect("sign");
                    }
                });
            }
        });

        let summaries: Vec<Value> = buf
            .lines()
            .into_iter()
            .filter(|line| line["type"] == "debug.summary")
            .collect();
        assert_eq!(summaries.len(), THREADS * RUNS);
        for summary in &summaries {
            assert_eq!(summary["counts"]["fields_drawn"], MARKERS as u64);
            assert!(summary["counts"].get("warnings").is_none());
        }
    }

    #[test]
    fn offset_media_box_moves_stamp_origin() {
        let source = make_pdf_bytes(
            "OFFSET",
            vec![10.into(), 20.into(), 622.into(), 812.into()],
            true,
        );
        let signed = run(
            &source,
            &[text_field("name", "Jane")],
            None,
            &test_options(),
            None,
        )
        .expect("sign");
        assert_eq!(signed.page_dimensions, PageDimensions::letter());

        let doc = LoDocument::load_mem(&signed.bytes).expect("reload");
        let page_id = first_page_id(&doc).expect("page");
        let page_content = String::from_utf8_lossy(&doc.get_page_content(page_id).expect("content"))
            .to_string();
        assert!(page_content.contains("(OFFSET) Tj"));
        assert!(page_content.contains("q 1 0 0 1 10 20 cm /FMStamp1 Do Q"));
    }
}
