use crate::types::PageDimensions;
use lopdf::{Document as LoDocument, Object as LoObject, ObjectId as LoObjectId};
use std::path::Path;

// Page-tree depth guard against cyclic /Parent links.
const MAX_PAGE_TREE_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PdfInspectErrorCode {
    PdfParseFailed,
    PdfEncryptedUnsupported,
    PdfEmptyOrNoPages,
    PdfInvalidPageBox,
    PdfIoError,
}

impl PdfInspectErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PdfInspectErrorCode::PdfParseFailed => "PDF_PARSE_FAILED",
            PdfInspectErrorCode::PdfEncryptedUnsupported => "PDF_ENCRYPTED_UNSUPPORTED",
            PdfInspectErrorCode::PdfEmptyOrNoPages => "PDF_EMPTY_OR_NO_PAGES",
            PdfInspectErrorCode::PdfInvalidPageBox => "PDF_INVALID_PAGE_BOX",
            PdfInspectErrorCode::PdfIoError => "PDF_IO_ERROR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfInspectError {
    pub code: PdfInspectErrorCode,
    pub message: String,
}

impl std::fmt::Display for PdfInspectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for PdfInspectError {}

/// Geometry of the page that receives the stamp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    pub dimensions: PageDimensions,
    // Lower-left corner of the MediaBox.
    pub origin_x: f64,
    pub origin_y: f64,
    pub rotate: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PdfInspectReport {
    pub pdf_version: String,
    pub page_count: usize,
    pub encrypted: bool,
    pub file_size_bytes: usize,
    pub first_page: Option<PageGeometry>,
}

pub fn inspect_pdf_bytes(bytes: &[u8]) -> Result<PdfInspectReport, PdfInspectError> {
    let pdf = LoDocument::load_mem(bytes).map_err(|err| PdfInspectError {
        code: PdfInspectErrorCode::PdfParseFailed,
        message: err.to_string(),
    })?;
    Ok(inspect_document(&pdf, bytes.len()))
}

pub fn inspect_pdf_path(path: &Path) -> Result<PdfInspectReport, PdfInspectError> {
    let data = std::fs::read(path).map_err(|err| PdfInspectError {
        code: PdfInspectErrorCode::PdfIoError,
        message: err.to_string(),
    })?;
    inspect_pdf_bytes(&data)
}

pub(crate) fn inspect_document(pdf: &LoDocument, file_size_bytes: usize) -> PdfInspectReport {
    let first_page = first_page_id(pdf).and_then(|id| page_geometry(pdf, id).ok());
    PdfInspectReport {
        pdf_version: pdf.version.clone(),
        page_count: pdf.get_pages().len(),
        encrypted: pdf.is_encrypted(),
        file_size_bytes,
        first_page,
    }
}

/// Checks the report against what stamping needs and returns the target page geometry.
pub fn require_stampable(report: &PdfInspectReport) -> Result<PageGeometry, PdfInspectError> {
    if report.encrypted {
        return Err(PdfInspectError {
            code: PdfInspectErrorCode::PdfEncryptedUnsupported,
            message: "encrypted pdf documents are not supported".to_string(),
        });
    }
    if report.page_count == 0 {
        return Err(PdfInspectError {
            code: PdfInspectErrorCode::PdfEmptyOrNoPages,
            message: "pdf has no pages".to_string(),
        });
    }
    report.first_page.ok_or_else(|| PdfInspectError {
        code: PdfInspectErrorCode::PdfInvalidPageBox,
        message: "first page has no usable MediaBox".to_string(),
    })
}

pub(crate) fn first_page_id(pdf: &LoDocument) -> Option<LoObjectId> {
    pdf.get_pages().values().next().copied()
}

pub(crate) fn page_geometry(
    pdf: &LoDocument,
    page_id: LoObjectId,
) -> Result<PageGeometry, PdfInspectError> {
    let invalid = |message: String| PdfInspectError {
        code: PdfInspectErrorCode::PdfInvalidPageBox,
        message,
    };
    let media_box = inherited_attribute(pdf, page_id, b"MediaBox")
        .ok_or_else(|| invalid("MediaBox missing".to_string()))?;
    let media_box = resolve(pdf, &media_box)
        .as_array()
        .map_err(|_| invalid("MediaBox is not an array".to_string()))?
        .clone();
    if media_box.len() != 4 {
        return Err(invalid(format!(
            "MediaBox has {} entries, expected 4",
            media_box.len()
        )));
    }
    let mut values = [0f64; 4];
    for (slot, obj) in values.iter_mut().zip(media_box.iter()) {
        *slot = number(resolve(pdf, obj))
            .ok_or_else(|| invalid("MediaBox entry is not a number".to_string()))?;
    }
    let [x0, y0, x1, y1] = values;
    let dimensions = PageDimensions {
        width: (x1 - x0).abs(),
        height: (y1 - y0).abs(),
    };
    dimensions
        .validate()
        .map_err(|err| invalid(err.to_string()))?;
    let rotate = inherited_attribute(pdf, page_id, b"Rotate")
        .and_then(|obj| number(resolve(pdf, &obj)))
        .map(|v| v as i64)
        .unwrap_or(0);
    Ok(PageGeometry {
        dimensions,
        origin_x: x0.min(x1),
        origin_y: y0.min(y1),
        rotate,
    })
}

/// Looks up a page attribute, walking `/Parent` links for inheritable entries.
pub(crate) fn inherited_attribute(
    pdf: &LoDocument,
    page_id: LoObjectId,
    key: &[u8],
) -> Option<LoObject> {
    let mut current = page_id;
    for _ in 0..MAX_PAGE_TREE_DEPTH {
        let dict = pdf.get_object(current).and_then(LoObject::as_dict).ok()?;
        if let Ok(value) = dict.get(key) {
            return Some(value.clone());
        }
        current = dict.get(b"Parent").and_then(LoObject::as_reference).ok()?;
    }
    None
}

fn resolve<'a>(pdf: &'a LoDocument, obj: &'a LoObject) -> &'a LoObject {
    match obj {
        LoObject::Reference(id) => pdf.get_object(*id).unwrap_or(obj),
        _ => obj,
    }
}

fn number(obj: &LoObject) -> Option<f64> {
    match obj {
        LoObject::Integer(v) => Some(*v as f64),
        LoObject::Real(v) => Some(*v as f64),
        _ => None,
    }
}
