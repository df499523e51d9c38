use crate::field::ImageFormat;
use image::GenericImageView;
use std::io::Write;

/// Decoded image ready to become a PDF image XObject.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ImageData {
    pub width: u32,
    pub height: u32,
    pub color_space: &'static str,
    pub bits_per_component: u8,
    pub filter: &'static str,
    pub data: Vec<u8>,
    pub alpha: Option<AlphaData>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AlphaData {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ImageDecodeError {
    FormatMismatch {
        declared: ImageFormat,
        detected: String,
    },
    Corrupt(String),
    EmptyImage,
}

impl std::fmt::Display for ImageDecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageDecodeError::FormatMismatch { declared, detected } => write!(
                f,
                "declared {} but bytes look like {}",
                declared.as_str(),
                detected
            ),
            ImageDecodeError::Corrupt(message) => write!(f, "cannot decode image: {}", message),
            ImageDecodeError::EmptyImage => write!(f, "image has zero width or height"),
        }
    }
}

pub(crate) fn decode_image_bytes(
    data: &[u8],
    declared: ImageFormat,
) -> Result<ImageData, ImageDecodeError> {
    let detected = image::guess_format(data)
        .map_err(|err| ImageDecodeError::Corrupt(err.to_string()))?;
    if detected != declared.to_image_format() {
        return Err(ImageDecodeError::FormatMismatch {
            declared,
            detected: format!("{detected:?}").to_ascii_lowercase(),
        });
    }

    let decoded = image::load_from_memory_with_format(data, detected)
        .map_err(|err| ImageDecodeError::Corrupt(err.to_string()))?;
    let (width, height) = decoded.dimensions();
    if width == 0 || height == 0 {
        return Err(ImageDecodeError::EmptyImage);
    }

    if declared == ImageFormat::Jpeg {
        let color_space = match decoded.color() {
            image::ColorType::L8 | image::ColorType::La8 => "/DeviceGray",
            _ => "/DeviceRGB",
        };
        return Ok(ImageData {
            width,
            height,
            color_space,
            bits_per_component: 8,
            filter: "/DCTDecode",
            data: data.to_vec(),
            alpha: None,
        });
    }

    let rgba = decoded.to_rgba8();
    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    let mut alpha = Vec::with_capacity((width * height) as usize);
    let mut has_alpha = false;
    for pixel in rgba.pixels() {
        let [r, g, b, a] = pixel.0;
        if a != 255 {
            has_alpha = true;
        }
        rgb.extend_from_slice(&[r, g, b]);
        alpha.push(a);
    }

    let alpha = if has_alpha {
        Some(AlphaData {
            width,
            height,
            data: flate_compress(&alpha),
        })
    } else {
        None
    };
    Ok(ImageData {
        width,
        height,
        color_space: "/DeviceRGB",
        bits_per_component: 8,
        filter: "/FlateDecode",
        data: flate_compress(&rgb),
        alpha,
    })
}

fn flate_compress(data: &[u8]) -> Vec<u8> {
    use flate2::Compression;
    use flate2::write::ZlibEncoder;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    let _ = encoder.write_all(data);
    encoder.finish().unwrap_or_default()
}
