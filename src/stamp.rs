use crate::content::{ContentStream, fmt_pt};
use crate::error::{FieldMarkError, Stage};
use crate::images::ImageData;
use crate::pdfinspect::{PageGeometry, inherited_attribute};
use crate::types::Pt;
use lopdf::{
    Dictionary as LoDictionary, Document as LoDocument, Object as LoObject,
    ObjectId as LoObjectId, Stream as LoStream, dictionary,
};

const FORM_NAME_PREFIX: &str = "FMStamp";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StampSummary {
    pub form_name: String,
    pub fonts_written: usize,
    pub images_written: usize,
}

fn lopdf_err(err: lopdf::Error) -> FieldMarkError {
    FieldMarkError::structural(Stage::Serialize, format!("pdf stamp error: {err}"))
}

/// Places the stamp on `page_id` as one form XObject drawn after the existing content.
///
/// The form carries its own fonts and images, so its resource names cannot collide with the
/// page's. The page's original content is wrapped in `q … Q` to reset any graphics state it
/// leaves behind.
pub(crate) fn apply_stamp(
    doc: &mut LoDocument,
    page_id: LoObjectId,
    geometry: &PageGeometry,
    content: ContentStream,
    images: Vec<(String, ImageData)>,
) -> Result<StampSummary, FieldMarkError> {
    let mut font_dict = LoDictionary::new();
    for (resource, base_font) in &content.fonts {
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => base_font.as_str(),
            "Encoding" => "WinAnsiEncoding",
        });
        font_dict.set(resource.as_bytes().to_vec(), LoObject::Reference(font_id));
    }

    let mut image_dict = LoDictionary::new();
    let images_written = images.len();
    for (resource, image) in images {
        let image_id = add_image_object(doc, image);
        image_dict.set(resource.as_bytes().to_vec(), LoObject::Reference(image_id));
    }

    let mut form_resources = LoDictionary::new();
    if !font_dict.is_empty() {
        form_resources.set("Font", LoObject::Dictionary(font_dict));
    }
    if !image_dict.is_empty() {
        form_resources.set("XObject", LoObject::Dictionary(image_dict));
    }

    let dims = geometry.dimensions;
    let form_id = doc.add_object(LoStream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Form",
            "FormType" => 1,
            "BBox" => vec![0.into(), 0.into(), LoObject::Real(dims.width as f32), LoObject::Real(dims.height as f32)],
            "Resources" => LoObject::Dictionary(form_resources),
        },
        content.bytes,
    ));

    let page_dict = doc
        .get_object(page_id)
        .and_then(LoObject::as_dict)
        .map_err(lopdf_err)?
        .clone();
    let mut resources = page_resources_dict(doc, page_id);
    let mut xobjects = sub_dict(doc, &resources, b"XObject");
    let form_name = unused_name(&xobjects, FORM_NAME_PREFIX);
    xobjects.set(form_name.as_bytes().to_vec(), LoObject::Reference(form_id));
    resources.set("XObject", LoObject::Dictionary(xobjects));

    let existing = content_refs(doc, &page_dict);
    let mut contents: Vec<LoObject> = Vec::with_capacity(existing.len() + 2);
    if !existing.is_empty() {
        let open_id = doc.add_object(LoStream::new(dictionary! {}, b"q\n".to_vec()));
        contents.push(LoObject::Reference(open_id));
        contents.extend(existing);
    }
    let close = if contents.is_empty() { "" } else { "\nQ\n" };
    let draw = format!(
        "{close}q 1 0 0 1 {} {} cm /{} Do Q\n",
        fmt_coord(geometry.origin_x),
        fmt_coord(geometry.origin_y),
        form_name
    );
    let draw_id = doc.add_object(LoStream::new(dictionary! {}, draw.into_bytes()));
    contents.push(LoObject::Reference(draw_id));

    {
        let page_mut = doc
            .get_object_mut(page_id)
            .and_then(LoObject::as_dict_mut)
            .map_err(lopdf_err)?;
        page_mut.set("Resources", LoObject::Dictionary(resources));
        page_mut.set("Contents", LoObject::Array(contents));
    }

    Ok(StampSummary {
        form_name,
        fonts_written: content.fonts.len(),
        images_written,
    })
}

pub(crate) fn serialize(doc: &mut LoDocument) -> Result<Vec<u8>, FieldMarkError> {
    doc.compress();
    let mut out = Vec::new();
    doc.save_to(&mut out)
        .map_err(|err| FieldMarkError::Serialization(err.to_string()))?;
    Ok(out)
}

fn add_image_object(doc: &mut LoDocument, image: ImageData) -> LoObjectId {
    let smask_id = image.alpha.map(|alpha| {
        doc.add_object(
            LoStream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => alpha.width as i64,
                    "Height" => alpha.height as i64,
                    "ColorSpace" => "DeviceGray",
                    "BitsPerComponent" => 8,
                    "Filter" => "FlateDecode",
                },
                alpha.data,
            )
            .with_compression(false),
        )
    });
    let mut dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => image.width as i64,
        "Height" => image.height as i64,
        "ColorSpace" => image.color_space.trim_start_matches('/'),
        "BitsPerComponent" => image.bits_per_component as i64,
        "Filter" => image.filter.trim_start_matches('/'),
    };
    if let Some(id) = smask_id {
        dict.set("SMask", LoObject::Reference(id));
    }
    doc.add_object(LoStream::new(dict, image.data).with_compression(false))
}

fn page_resources_dict(doc: &LoDocument, page_id: LoObjectId) -> LoDictionary {
    match inherited_attribute(doc, page_id, b"Resources") {
        Some(LoObject::Dictionary(d)) => d,
        Some(LoObject::Reference(id)) => doc
            .get_object(id)
            .ok()
            .and_then(|o| o.as_dict().ok())
            .cloned()
            .unwrap_or_default(),
        _ => LoDictionary::new(),
    }
}

fn sub_dict(doc: &LoDocument, parent: &LoDictionary, key: &[u8]) -> LoDictionary {
    match parent.get(key) {
        Ok(LoObject::Dictionary(d)) => d.clone(),
        Ok(LoObject::Reference(id)) => doc
            .get_object(*id)
            .ok()
            .and_then(|o| o.as_dict().ok())
            .cloned()
            .unwrap_or_default(),
        _ => LoDictionary::new(),
    }
}

fn content_refs(doc: &LoDocument, page: &LoDictionary) -> Vec<LoObject> {
    match page.get(b"Contents") {
        Ok(LoObject::Reference(id)) => match doc.get_object(*id) {
            Ok(LoObject::Array(items)) => items.clone(),
            Ok(_) => vec![LoObject::Reference(*id)],
            Err(_) => Vec::new(),
        },
        Ok(LoObject::Array(items)) => items.clone(),
        _ => Vec::new(),
    }
}

fn unused_name(dict: &LoDictionary, prefix: &str) -> String {
    let mut n = 1usize;
    loop {
        let candidate = format!("{prefix}{n}");
        if !dict.has(candidate.as_bytes()) {
            return candidate;
        }
        n += 1;
    }
}

fn fmt_coord(value: f64) -> String {
    fmt_pt(Pt::from_f64(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::render_commands;
    use crate::canvas::Canvas;
    use crate::pdfinspect::tests::make_single_page_pdf_bytes;
    use crate::pdfinspect::{first_page_id, page_geometry};

    fn stamp_content() -> ContentStream {
        let mut canvas = Canvas::new();
        canvas.set_font("Helvetica", Pt::from_f64(12.0));
        canvas.draw_string(66.2, 600.0, "Signed");
        render_commands(&canvas.finish())
    }

    #[test]
    fn stamp_adds_form_and_wraps_existing_content() {
        let bytes = make_single_page_pdf_bytes("ORIGINAL");
        let mut doc = LoDocument::load_mem(&bytes).expect("load");
        let page_id = first_page_id(&doc).expect("page");
        let geometry = page_geometry(&doc, page_id).expect("geometry");

        let summary =
            apply_stamp(&mut doc, page_id, &geometry, stamp_content(), Vec::new()).expect("stamp");
        assert_eq!(summary.form_name, "FMStamp1");
        assert_eq!(summary.fonts_written, 1);

        let out = serialize(&mut doc).expect("serialize");
        let reloaded = LoDocument::load_mem(&out).expect("reload");
        let page_id = first_page_id(&reloaded).expect("page");
        let content = reloaded.get_page_content(page_id).expect("content");
        let body = String::from_utf8_lossy(&content).to_string();
        assert!(body.starts_with("q\n"));
        assert!(body.contains("(ORIGINAL) Tj"));
        assert!(body.contains("Q\nq 1 0 0 1 0 0 cm /FMStamp1 Do Q\n"));
    }

    #[test]
    fn existing_form_names_are_not_reused() {
        let mut dict = LoDictionary::new();
        dict.set("FMStamp1", LoObject::Null);
        dict.set("FMStamp2", LoObject::Null);
        assert_eq!(unused_name(&dict, FORM_NAME_PREFIX), "FMStamp3");
    }

    #[test]
    fn fmt_coord_uses_milli_precision() {
        assert_eq!(fmt_coord(0.0), "0");
        assert_eq!(fmt_coord(10.0), "10");
        assert_eq!(fmt_coord(-12.5), "-12.5");
        assert_eq!(fmt_coord(0.0004), "0");
    }
}
