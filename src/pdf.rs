use crate::assets::{AlphaData, ImageData};
use crate::canvas::{Command, Document, Page};
use crate::debug::DebugLogger;
use crate::error::ContractError;
use crate::font::{
    FontHandle, FontProgram, FontProgramKind, FontRegistry, RegisteredFont, winansi_code,
};
use crate::types::{Color, Pt};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::io::Write;

const PDF_CATALOG_ID: usize = 1;
const PDF_PAGES_ID: usize = 2;
const PDF_RESOURCES_ID: usize = 3;
const PDF_INFO_ID: usize = 4;
const PDF_FIXED_OBJECTS: usize = 4;

const PRODUCER: &str = concat!("contract-pdf ", env!("CARGO_PKG_VERSION"));

pub(crate) struct PdfOutput {
    pub(crate) bytes: Vec<u8>,
    pub(crate) page_content_bytes: Vec<usize>,
    pub(crate) content_sha256: String,
}

/// Serializes a laid-out document. Object ids follow a fixed order (catalog,
/// page tree, shared resources, info, fonts, images, then content/page pairs)
/// and nothing time-dependent is written, so equal documents give equal bytes.
pub(crate) fn document_to_pdf(
    document: &Document,
    fonts: &FontRegistry,
    debug: Option<&DebugLogger>,
) -> Result<PdfOutput, ContractError> {
    let mut objects: Vec<String> = vec![String::new(); PDF_FIXED_OBJECTS];

    let used_fonts = collect_used_fonts(document);
    let mut font_resources = Vec::with_capacity(used_fonts.len());
    for handle in &used_fonts {
        let font = fonts.get(*handle).ok_or_else(|| {
            ContractError::FontEmbed(format!("font handle {} is not registered", handle.index()))
        })?;
        let font_id = objects.len() + 1;
        objects.extend(font_objects(font, font_id)?);
        font_resources.push((font_resource_name(*handle), font_id));
    }

    let mut image_resources = Vec::with_capacity(document.images.len());
    for (index, image) in document.images.iter().enumerate() {
        let smask_id = match &image.alpha {
            Some(alpha) => {
                objects.push(image_smask_object(alpha));
                Some(objects.len())
            }
            None => None,
        };
        objects.push(image_object(image, smask_id));
        image_resources.push((image_resource_name(index), objects.len()));
    }

    let mut hasher = Sha256::new();
    let mut page_ids = Vec::with_capacity(document.pages.len());
    let mut page_content_bytes = Vec::with_capacity(document.pages.len());
    for page in &document.pages {
        let content = render_page(page);
        hasher.update(content.as_bytes());
        let compressed = flate_compress(content.as_bytes());
        page_content_bytes.push(compressed.len());
        objects.push(compressed_stream_object(&compressed));
        let content_id = objects.len();
        objects.push(format!(
            "<< /Type /Page /Parent {} 0 R /MediaBox [0 0 {} {}] /Resources {} 0 R /Contents {} 0 R >>",
            PDF_PAGES_ID,
            fmt_pt(document.page_size.width),
            fmt_pt(document.page_size.height),
            PDF_RESOURCES_ID,
            content_id
        ));
        page_ids.push(objects.len());
    }
    let content_sha256 = hex_digest(&hasher.finalize());

    objects[PDF_CATALOG_ID - 1] = format!("<< /Type /Catalog /Pages {} 0 R >>", PDF_PAGES_ID);
    objects[PDF_PAGES_ID - 1] = format!(
        "<< /Type /Pages /Kids [{}] /Count {} >>",
        page_ids
            .iter()
            .map(|id| format!("{} 0 R", id))
            .collect::<Vec<_>>()
            .join(" "),
        page_ids.len()
    );
    objects[PDF_RESOURCES_ID - 1] = format!(
        "<< /ProcSet [/PDF /Text /ImageB /ImageC] /Font {} /XObject {} >>",
        resource_dict(&font_resources),
        resource_dict(&image_resources)
    );
    objects[PDF_INFO_ID - 1] = info_object(document.title.as_deref());

    let bytes = build_pdf(&objects, &content_sha256);
    if let Some(debug) = debug {
        debug.log(json!({
            "type": "pdf.serialized",
            "objects": objects.len(),
            "pages": page_ids.len(),
            "fonts": used_fonts.len(),
            "images": document.images.len(),
            "bytes": bytes.len(),
        }));
    }
    Ok(PdfOutput {
        bytes,
        page_content_bytes,
        content_sha256,
    })
}

fn collect_used_fonts(document: &Document) -> BTreeSet<FontHandle> {
    let mut used = BTreeSet::new();
    for page in &document.pages {
        let mut current = None;
        for cmd in page.commands() {
            match cmd {
                Command::SetFont { font, .. } => current = Some(*font),
                Command::DrawString { .. } => {
                    used.insert(current.unwrap_or(FontHandle::HELVETICA));
                }
                _ => {}
            }
        }
    }
    used
}

fn font_resource_name(handle: FontHandle) -> String {
    format!("F{}", handle.index() + 1)
}

fn image_resource_name(index: usize) -> String {
    format!("Im{}", index + 1)
}

fn resource_dict(entries: &[(String, usize)]) -> String {
    let entries: Vec<String> = entries
        .iter()
        .map(|(name, id)| format!("/{} {} 0 R", name, id))
        .collect();
    format!("<< {} >>", entries.join(" "))
}

// One object for a built-in font; font, descriptor and program for an
// embedded one.
fn font_objects(font: &RegisteredFont, font_id: usize) -> Result<Vec<String>, ContractError> {
    match &font.program {
        FontProgram::Builtin(_) => Ok(vec![format!(
            "<< /Type /Font /Subtype /Type1 /BaseFont /{} /Encoding /WinAnsiEncoding >>",
            sanitize_font_name(&font.name)
        )]),
        FontProgram::Embedded {
            data,
            metrics: _,
            kind,
        } => {
            if data.is_empty() {
                return Err(ContractError::FontEmbed(format!(
                    "{} has no font program to embed",
                    font.name
                )));
            }
            let descriptor_id = font_id + 1;
            let file_id = font_id + 2;
            Ok(vec![
                embedded_font_object(font, descriptor_id)?,
                font_descriptor_object(font, file_id)?,
                font_file_object(data, *kind),
            ])
        }
    }
}

fn embedded_metrics(font: &RegisteredFont) -> Result<&crate::font::FontMetrics, ContractError> {
    match &font.program {
        FontProgram::Embedded { metrics, .. } => Ok(metrics),
        FontProgram::Builtin(_) => Err(ContractError::FontEmbed(format!(
            "{} is a built-in font",
            font.name
        ))),
    }
}

fn embedded_font_object(font: &RegisteredFont, descriptor_id: usize) -> Result<String, ContractError> {
    let metrics = embedded_metrics(font)?;
    let subtype = match &font.program {
        FontProgram::Embedded {
            kind: FontProgramKind::OpenTypeCff,
            ..
        } => "Type1",
        _ => "TrueType",
    };
    let widths = metrics
        .widths
        .iter()
        .map(|value| value.to_string())
        .collect::<Vec<_>>()
        .join(" ");
    Ok(format!(
        "<< /Type /Font /Subtype /{} /BaseFont /{} /FirstChar {} /LastChar {} /Widths [{}] /FontDescriptor {} 0 R /Encoding /WinAnsiEncoding >>",
        subtype,
        sanitize_font_name(&font.name),
        metrics.first_char,
        metrics.last_char,
        widths,
        descriptor_id
    ))
}

fn font_descriptor_object(font: &RegisteredFont, font_file_id: usize) -> Result<String, ContractError> {
    let metrics = embedded_metrics(font)?;
    let font_file_entry = match &font.program {
        FontProgram::Embedded {
            kind: FontProgramKind::OpenTypeCff,
            ..
        } => "FontFile3",
        _ => "FontFile2",
    };
    // Nonsymbolic, plus FixedPitch when the face is monospaced.
    let flags = if metrics.is_fixed_pitch { 33 } else { 32 };
    Ok(format!(
        "<< /Type /FontDescriptor /FontName /{} /Flags {} /FontBBox [{} {} {} {}] /ItalicAngle {} /Ascent {} /Descent {} /CapHeight {} /StemV 80 /MissingWidth {} /{} {} 0 R >>",
        sanitize_font_name(&font.name),
        flags,
        metrics.bbox.0,
        metrics.bbox.1,
        metrics.bbox.2,
        metrics.bbox.3,
        metrics.italic_angle,
        metrics.ascent,
        metrics.descent,
        metrics.cap_height,
        metrics.missing_width,
        font_file_entry,
        font_file_id
    ))
}

fn font_file_object(data: &[u8], kind: FontProgramKind) -> String {
    let stream_data = encode_stream_data(data);
    let mut dict = format!(
        "<< /Length {} /Length1 {} /Filter /ASCIIHexDecode",
        stream_data.len(),
        data.len()
    );
    if kind == FontProgramKind::OpenTypeCff {
        dict.push_str(" /Subtype /OpenType");
    }
    format!("{} >>\nstream\n{}\nendstream", dict, stream_data)
}

fn image_object(image: &ImageData, smask_id: Option<usize>) -> String {
    let stream_data = encode_stream_data(&image.data);
    let filters = match image.filter {
        "/DCTDecode" => "[/ASCIIHexDecode /DCTDecode]",
        _ => "[/ASCIIHexDecode /FlateDecode]",
    };
    let smask = smask_id
        .map(|id| format!(" /SMask {} 0 R", id))
        .unwrap_or_default();
    format!(
        "<< /Type /XObject /Subtype /Image /Width {} /Height {} /ColorSpace {} /BitsPerComponent {} /Length {} /Filter {}{} >>\nstream\n{}\nendstream",
        image.width,
        image.height,
        image.color_space,
        image.bits_per_component,
        stream_data.len(),
        filters,
        smask,
        stream_data
    )
}

fn image_smask_object(alpha: &AlphaData) -> String {
    let stream_data = encode_stream_data(&alpha.data);
    format!(
        "<< /Type /XObject /Subtype /Image /Width {} /Height {} /ColorSpace /DeviceGray /BitsPerComponent 8 /Length {} /Filter [/ASCIIHexDecode /FlateDecode] >>\nstream\n{}\nendstream",
        alpha.width,
        alpha.height,
        stream_data.len(),
        stream_data
    )
}

fn compressed_stream_object(compressed: &[u8]) -> String {
    let stream_data = encode_stream_data(compressed);
    format!(
        "<< /Length {} /Filter [/ASCIIHexDecode /FlateDecode] >>\nstream\n{}\nendstream",
        stream_data.len(),
        stream_data
    )
}

fn info_object(title: Option<&str>) -> String {
    let mut entries = Vec::new();
    if let Some(title) = title.filter(|t| !t.is_empty()) {
        entries.push(format!("/Title ({})", encode_winansi_pdf_string(title)));
    }
    entries.push(format!("/Producer ({})", escape_pdf_string(PRODUCER)));
    format!("<< {} >>", entries.join(" "))
}

fn render_page(page: &Page) -> String {
    let mut out = String::new();
    let mut font = (FontHandle::HELVETICA, Pt::from_f32(12.0));
    for cmd in page.commands() {
        match cmd {
            Command::SetFont { font: handle, size } => font = (*handle, *size),
            Command::SetFillColor(color) => out.push_str(&color_op(*color, "rg")),
            Command::SetStrokeColor(color) => out.push_str(&color_op(*color, "RG")),
            Command::SetLineWidth(width) => {
                let _ = writeln!(out, "{} w", fmt_pt(*width));
            }
            Command::DrawString { x, y, text } => {
                let _ = writeln!(
                    out,
                    "BT /{} {} Tf {} {} Td ({}) Tj ET",
                    font_resource_name(font.0),
                    fmt_pt(font.1),
                    fmt_pt(*x),
                    fmt_pt(*y),
                    encode_winansi_pdf_string(text)
                );
            }
            Command::Line { x1, y1, x2, y2 } => {
                let _ = writeln!(
                    out,
                    "{} {} m {} {} l S",
                    fmt_pt(*x1),
                    fmt_pt(*y1),
                    fmt_pt(*x2),
                    fmt_pt(*y2)
                );
            }
            Command::StrokeRect {
                x,
                y,
                width,
                height,
            } => {
                let _ = writeln!(
                    out,
                    "{} {} {} {} re S",
                    fmt_pt(*x),
                    fmt_pt(*y),
                    fmt_pt(*width),
                    fmt_pt(*height)
                );
            }
            Command::DrawImage {
                x,
                y,
                width,
                height,
                image,
            } => {
                let _ = writeln!(
                    out,
                    "q {} 0 0 {} {} {} cm /{} Do Q",
                    fmt_pt(*width),
                    fmt_pt(*height),
                    fmt_pt(*x),
                    fmt_pt(*y),
                    image_resource_name(image.0)
                );
            }
        }
    }
    out
}

fn build_pdf(objects: &[String], content_sha256: &str) -> Vec<u8> {
    let mut out: Vec<u8> = Vec::new();
    out.extend_from_slice(b"%PDF-1.7\n");
    out.extend_from_slice(b"%\xE2\xE3\xCF\xD3\n");

    let mut offsets = Vec::with_capacity(objects.len());
    for (index, obj) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n", index + 1).as_bytes());
        out.extend_from_slice(obj.as_bytes());
        out.extend_from_slice(b"\nendobj\n");
    }

    let xref_start = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
    out.extend_from_slice(b"0000000000 65535 f \n");
    for offset in offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    let trailer = format!(
        "trailer\n<< /Size {} /Root {} 0 R /Info {} 0 R /ID [<{}> <{}>] >>\nstartxref\n{}\n%%EOF\n",
        objects.len() + 1,
        PDF_CATALOG_ID,
        PDF_INFO_ID,
        content_sha256,
        content_sha256,
        xref_start
    );
    out.extend_from_slice(trailer.as_bytes());
    out
}

pub(crate) fn flate_compress(data: &[u8]) -> Vec<u8> {
    use flate2::Compression;
    use flate2::write::ZlibEncoder;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    let _ = encoder.write_all(data);
    encoder.finish().unwrap_or_default()
}

fn encode_stream_data(data: &[u8]) -> String {
    let mut hex = ascii_hex_encode(data);
    hex.push('>');
    hex
}

fn ascii_hex_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2 + data.len() / 32);
    for (index, byte) in data.iter().enumerate() {
        let _ = write!(&mut out, "{:02X}", byte);
        if index % 32 == 31 {
            out.push('\n');
        }
    }
    out
}

fn hex_digest(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(&mut out, "{:02x}", byte);
    }
    out
}

fn sanitize_font_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || *ch == '-' || *ch == '_')
        .collect();
    if cleaned.is_empty() {
        "EmbeddedFont".to_string()
    } else {
        cleaned
    }
}

fn escape_pdf_string(input: &str) -> String {
    let mut out = String::new();
    for ch in input.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '(' => out.push_str("\\("),
            ')' => out.push_str("\\)"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(ch),
        }
    }
    out
}

/// Maps text to cp1252 bytes written as a literal string body. Characters
/// without a WinAnsi code become `?`.
fn encode_winansi_pdf_string(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        let byte = match ch {
            '\u{0000}'..='\u{007F}' => ch as u8,
            _ => winansi_code(ch).unwrap_or(b'?'),
        };
        match byte {
            b'\\' => out.push_str("\\\\"),
            b'(' => out.push_str("\\("),
            b')' => out.push_str("\\)"),
            b if !(0x20..0x7f).contains(&b) => {
                let _ = write!(&mut out, "\\{:03o}", b);
            }
            b => out.push(b as char),
        }
    }
    out
}

fn color_op(color: Color, op: &str) -> String {
    format!(
        "{} {} {} {}\n",
        fmt(color.r),
        fmt(color.g),
        fmt(color.b),
        op
    )
}

fn fmt(value: f32) -> String {
    if !value.is_finite() {
        return "0".to_string();
    }
    format_milli((value.clamp(-1.0e9, 1.0e9) as f64 * 1000.0).round() as i64)
}

fn format_milli(milli: i64) -> String {
    if milli == 0 {
        return "0".to_string();
    }
    let sign = if milli < 0 { "-" } else { "" };
    let abs = milli.unsigned_abs();
    let int_part = abs / 1000;
    let frac_part = abs % 1000;
    if frac_part == 0 {
        return format!("{}{}", sign, int_part);
    }
    let mut s = format!("{}{}.{:03}", sign, int_part, frac_part);
    while s.ends_with('0') {
        s.pop();
    }
    s
}

fn fmt_pt(value: Pt) -> String {
    format_milli(value.to_milli())
}
