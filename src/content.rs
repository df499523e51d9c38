use crate::canvas::Command;
use crate::types::{Color, Pt};
use std::collections::BTreeMap;

/// Page content produced from the stamp commands plus the font resources it references.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ContentStream {
    pub bytes: Vec<u8>,
    // (resource name, base font)
    pub fonts: Vec<(String, String)>,
}

pub(crate) fn render_commands(commands: &[Command]) -> ContentStream {
    let mut out = String::new();
    let mut fonts: BTreeMap<String, String> = BTreeMap::new();
    let mut current_font: Option<(String, Pt)> = None;

    for cmd in commands {
        match cmd {
            Command::SaveState => out.push_str("q\n"),
            Command::RestoreState => out.push_str("Q\n"),
            Command::SetFillColor(color) => out.push_str(&color_to_pdf_fill(*color)),
            Command::SetFont { name, size } => {
                current_font = Some((name.clone(), *size));
            }
            Command::MoveTo { x, y } => {
                out.push_str(&format!("{} {} m\n", fmt_pt(*x), fmt_pt(*y)));
            }
            Command::CurveTo {
                x1,
                y1,
                x2,
                y2,
                x,
                y,
            } => {
                out.push_str(&format!(
                    "{} {} {} {} {} {} c\n",
                    fmt_pt(*x1),
                    fmt_pt(*y1),
                    fmt_pt(*x2),
                    fmt_pt(*y2),
                    fmt_pt(*x),
                    fmt_pt(*y)
                ));
            }
            Command::ClosePath => out.push_str("h\n"),
            Command::Fill => out.push_str("f\n"),
            Command::DrawString { x, y, text } => {
                let (font_name, size) = current_font
                    .clone()
                    .unwrap_or_else(|| ("Helvetica".to_string(), Pt::from_f64(12.0)));
                let next = format!("FMF{}", fonts.len() + 1);
                let resource = fonts.entry(font_name).or_insert(next).clone();
                out.push_str("BT\n");
                out.push_str(&format!("/{} {} Tf\n", resource, fmt_pt(size)));
                out.push_str(&format!("{} {} Td\n", fmt_pt(*x), fmt_pt(*y)));
                out.push_str(&format!("({}) Tj\n", encode_winansi_pdf_string(text).text));
                out.push_str("ET\n");
            }
            Command::DrawImage {
                x,
                y,
                width,
                height,
                resource_id,
            } => {
                out.push_str(&format!(
                    "q {} 0 0 {} {} {} cm /{} Do Q\n",
                    fmt_pt(*width),
                    fmt_pt(*height),
                    fmt_pt(*x),
                    fmt_pt(*y),
                    resource_id
                ));
            }
        }
    }

    let mut fonts: Vec<(String, String)> = fonts
        .into_iter()
        .map(|(base, resource)| (resource, base))
        .collect();
    fonts.sort();
    ContentStream {
        // WinAnsi escapes keep every char below 0x80, so the string is already the byte form.
        bytes: out.into_bytes(),
        fonts,
    }
}

pub(crate) struct WinAnsiEncoded {
    pub text: String,
    pub replaced: usize,
}

pub(crate) fn winansi_replacements(input: &str) -> usize {
    encode_winansi_pdf_string(input).replaced
}

pub(crate) fn encode_winansi_pdf_string(input: &str) -> WinAnsiEncoded {
    let mut out = String::new();
    let mut replaced = 0usize;
    for ch in input.chars() {
        let byte = match ch {
            '\u{0000}'..='\u{007F}' => ch as u8,
            '\u{00A0}'..='\u{00FF}' => ch as u8,
            // cp1252 extensions
            '\u{20AC}' => 0x80,
            '\u{201A}' => 0x82,
            '\u{0192}' => 0x83,
            '\u{201E}' => 0x84,
            '\u{2026}' => 0x85,
            '\u{2020}' => 0x86,
            '\u{2021}' => 0x87,
            '\u{02C6}' => 0x88,
            '\u{2030}' => 0x89,
            '\u{0160}' => 0x8A,
            '\u{2039}' => 0x8B,
            '\u{0152}' => 0x8C,
            '\u{017D}' => 0x8E,
            '\u{2018}' => 0x91,
            '\u{2019}' => 0x92,
            '\u{201C}' => 0x93,
            '\u{201D}' => 0x94,
            '\u{2022}' => 0x95,
            '\u{2013}' => 0x96,
            '\u{2014}' => 0x97,
            '\u{02DC}' => 0x98,
            '\u{2122}' => 0x99,
            '\u{0161}' => 0x9A,
            '\u{203A}' => 0x9B,
            '\u{0153}' => 0x9C,
            '\u{017E}' => 0x9E,
            '\u{0178}' => 0x9F,
            _ => {
                replaced += 1;
                b'?'
            }
        };

        match byte {
            b'\\' => out.push_str("\\\\"),
            b'(' => out.push_str("\\("),
            b')' => out.push_str("\\)"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b if b < 0x20 || b >= 0x7f => out.push_str(&format!("\\{:03o}", b)),
            b => out.push(b as char),
        }
    }

    WinAnsiEncoded {
        text: out,
        replaced,
    }
}

fn format_milli(milli: i64) -> String {
    if milli == 0 {
        return "0".to_string();
    }
    let sign = if milli < 0 { "-" } else { "" };
    let abs = milli.abs();
    let int_part = abs / 1000;
    let frac_part = abs % 1000;
    if frac_part == 0 {
        format!("{}{}", sign, int_part)
    } else {
        let mut s = format!("{}{}.{:03}", sign, int_part, frac_part);
        while s.ends_with('0') {
            s.pop();
        }
        s
    }
}

pub(crate) fn fmt_pt(value: Pt) -> String {
    format_milli(value.to_milli_i64())
}

fn fmt_unit(value: f32) -> String {
    let value = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };
    format_milli((value as f64 * 1000.0).round() as i64)
}

fn color_to_pdf_fill(color: Color) -> String {
    format!(
        "{} {} {} rg\n",
        fmt_unit(color.r),
        fmt_unit(color.g),
        fmt_unit(color.b)
    )
}
