//! Structured request payload: the JSON field list and the page-size hint sent by the editor.

use crate::error::{FieldMarkError, Stage};
use crate::field::{Field, FieldContent, FieldKind, FieldPlacement, ImageFormat};
use crate::types::PageDimensions;
use base64::Engine;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawField {
    id: RawId,
    #[serde(rename = "type")]
    kind: String,
    x: f64,
    y: f64,
    width: f64,
    height: f64,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    checked: Option<bool>,
}

/// Field ids are opaque; editors that mint numeric ids send them unquoted.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(serde_json::Number),
}

impl RawId {
    fn into_string(self) -> String {
        match self {
            RawId::Text(id) => id,
            RawId::Number(id) => id.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawPageHint {
    width: f64,
    height: f64,
}

/// Fields plus the editor's page-size hint, as received from the transport layer.
#[derive(Debug, Clone, PartialEq)]
pub struct SignRequest {
    pub fields: Vec<Field>,
    pub page_hint: Option<PageDimensions>,
}

impl SignRequest {
    pub fn from_parts(
        fields_json: &str,
        page_hint_json: Option<&str>,
    ) -> Result<Self, FieldMarkError> {
        let fields = parse_fields(fields_json)?;
        let page_hint = page_hint_json
            .filter(|raw| !raw.trim().is_empty())
            .map(parse_page_hint)
            .transpose()?;
        Ok(Self { fields, page_hint })
    }
}

pub fn parse_fields(json: &str) -> Result<Vec<Field>, FieldMarkError> {
    let raw: Vec<RawField> = serde_json::from_str(json).map_err(|err| {
        FieldMarkError::structural(Stage::Request, format!("unparseable field list: {err}"))
    })?;
    raw.into_iter().map(convert_field).collect()
}

pub fn parse_page_hint(json: &str) -> Result<PageDimensions, FieldMarkError> {
    let raw: RawPageHint = serde_json::from_str(json).map_err(|err| {
        FieldMarkError::structural(Stage::Request, format!("unparseable page dimensions: {err}"))
    })?;
    PageDimensions::new(raw.width, raw.height)
}

fn convert_field(raw: RawField) -> Result<Field, FieldMarkError> {
    let id = raw.id.into_string();
    let Some(kind) = FieldKind::from_tag(&raw.kind) else {
        return Err(FieldMarkError::field(
            Stage::Request,
            &id,
            format!("unknown field type: {}", raw.kind),
        ));
    };
    let content = match kind {
        FieldKind::Text => FieldContent::Text {
            value: optional_string(&id, &raw.value)?.unwrap_or_default(),
        },
        FieldKind::Date => FieldContent::Date {
            value: optional_string(&id, &raw.value)?
                .filter(|value| !value.trim().is_empty()),
        },
        FieldKind::Signature => {
            let (image, format) = image_payload(&id, &raw.value)?;
            FieldContent::Signature { image, format }
        }
        FieldKind::Image => {
            let (image, format) = image_payload(&id, &raw.value)?;
            FieldContent::Image { image, format }
        }
        FieldKind::Marker => {
            let checked = match (&raw.checked, &raw.value) {
                (Some(checked), _) => *checked,
                (None, Value::Bool(checked)) => *checked,
                (None, Value::Null) => false,
                (None, other) => {
                    return Err(FieldMarkError::field(
                        Stage::Request,
                        &id,
                        format!("checkbox value must be a boolean, got {other}"),
                    ));
                }
            };
            FieldContent::Marker { checked }
        }
    };
    Ok(Field::new(
        FieldPlacement::new(id, raw.x, raw.y, raw.width, raw.height),
        content,
    ))
}

fn optional_string(id: &str, value: &Value) -> Result<Option<String>, FieldMarkError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        other => Err(FieldMarkError::field(
            Stage::Request,
            id,
            format!("expected a string value, got {other}"),
        )),
    }
}

/// Image bytes from a data URI. Bytes that cannot be recovered come back empty and are
/// reported later as an undecodable image, so one bad upload skips only its own field.
fn image_payload(id: &str, value: &Value) -> Result<(Vec<u8>, ImageFormat), FieldMarkError> {
    let uri = match optional_string(id, value)? {
        Some(uri) => uri,
        None => return Ok((Vec::new(), ImageFormat::Png)),
    };
    let Some((mime, data)) = parse_data_uri(&uri) else {
        return Ok((Vec::new(), ImageFormat::Png));
    };
    let format = ImageFormat::from_mime(&mime)
        .or_else(|| match image::guess_format(&data) {
            Ok(image::ImageFormat::Jpeg) => Some(ImageFormat::Jpeg),
            _ => None,
        })
        .unwrap_or(ImageFormat::Png);
    Ok((data, format))
}

pub(crate) fn parse_data_uri(uri: &str) -> Option<(String, Vec<u8>)> {
    let rest = uri.trim().strip_prefix("data:")?;
    let (header, data_part) = rest.split_once(',')?;
    let mime = header
        .split(';')
        .next()
        .filter(|m| !m.is_empty())
        .unwrap_or("application/octet-stream")
        .to_string();
    let data = if header.split(';').any(|p| p.eq_ignore_ascii_case("base64")) {
        base64::engine::general_purpose::STANDARD
            .decode(data_part.trim())
            .ok()?
    } else {
        data_part.as_bytes().to_vec()
    };
    Some((mime, data))
}
