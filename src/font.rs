use crate::error::{ContractError, MeasureError};
use crate::types::Pt;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Index of a font inside the renderer's registry. Handles are only minted by
/// the registry, so every handle a caller holds refers to a registered font.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FontHandle(pub(crate) usize);

impl FontHandle {
    pub const HELVETICA: FontHandle = FontHandle(0);
    pub const HELVETICA_BOLD: FontHandle = FontHandle(1);

    pub fn index(self) -> usize {
        self.0
    }
}

// Advance widths (1/1000 em) for WinAnsi codes 0x20..=0xFF, from the Adobe
// core font metrics. Codes cp1252 leaves undefined hold 0.
const HELVETICA_WIDTHS: [u16; 224] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, 556, 556,
    556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, 1015, 667, 667, 722,
    722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, 667, 778, 722, 667, 611, 722,
    667, 944, 667, 667, 611, 278, 278, 278, 469, 556, 333, 556, 556, 500, 556, 556, 278, 556,
    556, 222, 222, 500, 222, 833, 556, 556, 556, 556, 333, 500, 278, 556, 500, 722, 500, 500,
    500, 334, 260, 334, 584, 0,
    // 0x80
    556, 0, 222, 556, 333, 1000, 556, 556, 333, 1000, 667, 333, 1000, 0, 611, 0,
    0, 222, 222, 333, 333, 350, 556, 1000, 333, 1000, 500, 333, 944, 0, 500, 667,
    // 0xA0
    278, 333, 556, 556, 556, 556, 260, 556, 333, 737, 370, 556, 584, 333, 737, 333,
    400, 584, 333, 333, 333, 556, 537, 278, 333, 333, 365, 556, 834, 834, 834, 611,
    // 0xC0
    667, 667, 667, 667, 667, 667, 1000, 722, 667, 667, 667, 667, 278, 278, 278, 278,
    722, 722, 778, 778, 778, 778, 778, 584, 778, 722, 722, 722, 722, 667, 667, 611,
    // 0xE0
    556, 556, 556, 556, 556, 556, 889, 500, 556, 556, 556, 556, 278, 278, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 584, 611, 556, 556, 556, 556, 500, 556, 500,
];

const HELVETICA_BOLD_WIDTHS: [u16; 224] = [
    278, 333, 474, 556, 556, 889, 722, 238, 333, 333, 389, 584, 278, 333, 278, 278, 556, 556,
    556, 556, 556, 556, 556, 556, 556, 556, 333, 333, 584, 584, 584, 611, 975, 722, 722, 722,
    722, 667, 611, 778, 722, 278, 556, 722, 611, 833, 722, 778, 667, 778, 722, 667, 611, 722,
    667, 944, 667, 667, 611, 333, 278, 333, 584, 556, 333, 556, 611, 556, 611, 556, 333, 611,
    611, 278, 278, 556, 278, 889, 611, 611, 611, 611, 389, 556, 333, 611, 556, 778, 556, 556,
    500, 389, 280, 389, 584, 0,
    // 0x80
    556, 0, 278, 556, 500, 1000, 556, 556, 333, 1000, 667, 333, 1000, 0, 611, 0,
    0, 278, 278, 500, 500, 350, 556, 1000, 333, 1000, 556, 333, 944, 0, 500, 667,
    // 0xA0
    278, 333, 556, 556, 556, 556, 280, 556, 333, 737, 370, 556, 584, 333, 737, 333,
    400, 584, 333, 333, 333, 611, 556, 278, 333, 333, 365, 556, 834, 834, 834, 611,
    // 0xC0
    722, 722, 722, 722, 722, 722, 1000, 722, 667, 667, 667, 667, 278, 278, 278, 278,
    722, 722, 778, 778, 778, 778, 778, 584, 778, 722, 722, 722, 722, 667, 667, 611,
    // 0xE0
    556, 556, 556, 556, 556, 556, 889, 556, 556, 556, 556, 556, 278, 278, 278, 278,
    611, 611, 611, 611, 611, 611, 611, 584, 611, 611, 611, 611, 611, 556, 611, 556,
];

/// Maps `ch` to its WinAnsiEncoding (cp1252) byte. Control characters and
/// codes cp1252 leaves undefined have no mapping.
pub(crate) fn winansi_code(ch: char) -> Option<u8> {
    let byte = match ch {
        '\u{0020}'..='\u{007E}' | '\u{00A0}'..='\u{00FF}' => ch as u8,
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
        _ => return None,
    };
    Some(byte)
}

#[derive(Debug)]
pub(crate) struct FontRegistry {
    fonts: Vec<RegisteredFont>,
    lookup: HashMap<String, usize>,
}

#[derive(Debug)]
pub(crate) struct RegisteredFont {
    pub(crate) name: String,
    pub(crate) program: FontProgram,
}

#[derive(Debug)]
pub(crate) enum FontProgram {
    Builtin(&'static [u16; 224]),
    Embedded {
        data: Vec<u8>,
        metrics: FontMetrics,
        kind: FontProgramKind,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FontProgramKind {
    TrueType,
    OpenTypeCff,
}

/// WinAnsi-range metrics for an embedded font, scaled to 1/1000 em.
#[derive(Debug)]
pub(crate) struct FontMetrics {
    pub(crate) first_char: u8,
    pub(crate) last_char: u8,
    pub(crate) widths: Vec<u16>,
    glyph_ids: Vec<u16>,
    pub(crate) ascent: i16,
    pub(crate) descent: i16,
    pub(crate) cap_height: i16,
    pub(crate) italic_angle: i16,
    pub(crate) bbox: (i16, i16, i16, i16),
    pub(crate) missing_width: u16,
    pub(crate) is_fixed_pitch: bool,
}

impl FontRegistry {
    pub(crate) fn new() -> Self {
        let mut registry = Self {
            fonts: Vec::new(),
            lookup: HashMap::new(),
        };
        registry.push("Helvetica", FontProgram::Builtin(&HELVETICA_WIDTHS), &[]);
        registry.push(
            "Helvetica-Bold",
            FontProgram::Builtin(&HELVETICA_BOLD_WIDTHS),
            &[],
        );
        registry
    }

    fn push(&mut self, name: &str, program: FontProgram, aliases: &[String]) -> FontHandle {
        let index = self.fonts.len();
        self.fonts.push(RegisteredFont {
            name: name.to_string(),
            program,
        });
        let names = std::iter::once(name.to_string()).chain(aliases.iter().cloned());
        for alias in names {
            let key = normalize_name(&alias);
            if key.is_empty() || self.lookup.contains_key(&key) {
                continue;
            }
            self.lookup.insert(key, index);
        }
        FontHandle(index)
    }

    pub(crate) fn register_file(&mut self, path: impl AsRef<Path>) -> Result<FontHandle, ContractError> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|err| {
            ContractError::FontEmbed(format!("cannot read {}: {}", path.display(), err))
        })?;
        let source = path
            .file_stem()
            .and_then(|v| v.to_str())
            .unwrap_or("EmbeddedFont")
            .to_string();
        self.register_bytes(data, Some(&source))
    }

    pub(crate) fn register_bytes(
        &mut self,
        data: Vec<u8>,
        source_name: Option<&str>,
    ) -> Result<FontHandle, ContractError> {
        let source = source_name.unwrap_or("EmbeddedFont");
        let (name, aliases, metrics, kind) = {
            let face = ttf_parser::Face::parse(&data, 0).map_err(|err| {
                ContractError::FontEmbed(format!("invalid font data for {source}: {err}"))
            })?;
            if face.tables().cmap.is_none() {
                return Err(ContractError::FontEmbed(format!(
                    "{source} has no character map"
                )));
            }
            let (name, aliases) = font_names(&face, source);
            let kind = if face.tables().cff.is_some() {
                FontProgramKind::OpenTypeCff
            } else {
                FontProgramKind::TrueType
            };
            (name, aliases, FontMetrics::from_face(&face), kind)
        };
        Ok(self.push(
            &name,
            FontProgram::Embedded {
                data,
                metrics,
                kind,
            },
            &aliases,
        ))
    }

    pub(crate) fn resolve(&self, name: &str) -> Option<FontHandle> {
        self.lookup.get(&normalize_name(name)).copied().map(FontHandle)
    }

    pub(crate) fn get(&self, handle: FontHandle) -> Option<&RegisteredFont> {
        self.fonts.get(handle.0)
    }

    /// Width of `text` set in `handle` at `size`. Fails on the first character
    /// the font cannot encode.
    #[cfg(test)]
    pub(crate) fn measure(&self, handle: FontHandle, size: Pt, text: &str) -> Result<Pt, MeasureError> {
        let units = self.advance_units(handle, text)?;
        Ok(size.mul_ratio(units, 1000))
    }

    /// Summed advance of `text` in 1/1000 em. No kerning is applied, so the
    /// advance of a concatenation is the sum of the parts.
    pub(crate) fn advance_units(&self, handle: FontHandle, text: &str) -> Result<i32, MeasureError> {
        let font = self
            .get(handle)
            .ok_or(MeasureError::UnknownFont(handle.0))?;
        let mut total_units: i32 = 0;
        for ch in text.chars() {
            let advance = font
                .advance_for_char(ch)
                .ok_or(MeasureError::UnsupportedGlyph(ch))?;
            total_units = total_units.saturating_add(advance as i32);
        }
        Ok(total_units)
    }
}

impl RegisteredFont {
    // Built-in fonts cover all of WinAnsi. Embedded fonts are written with
    // WinAnsiEncoding too but only carry metrics for Latin-1.
    fn advance_for_char(&self, ch: char) -> Option<u16> {
        let code = ch as u32;
        match &self.program {
            FontProgram::Builtin(widths) => {
                let byte = winansi_code(ch)?;
                widths
                    .get(usize::from(byte) - 0x20)
                    .copied()
                    .filter(|width| *width > 0)
            }
            FontProgram::Embedded { metrics, .. } => {
                if !(0x20..=0x7E).contains(&code) && !(0xA0..=0xFF).contains(&code) {
                    return None;
                }
                let idx = (code - metrics.first_char as u32) as usize;
                match metrics.glyph_ids.get(idx) {
                    Some(0) | None if ch != ' ' => None,
                    _ => Some(
                        metrics
                            .widths
                            .get(idx)
                            .copied()
                            .unwrap_or(metrics.missing_width),
                    ),
                }
            }
        }
    }
}

impl FontMetrics {
    fn from_face(face: &ttf_parser::Face<'_>) -> Self {
        let units_per_em = face.units_per_em().max(1);
        let scale = 1000.0 / units_per_em as f32;
        let first_char = 32u8;
        let last_char = 255u8;
        let mut glyph_ids = Vec::with_capacity((last_char - first_char) as usize + 1);
        let mut widths = Vec::with_capacity(glyph_ids.capacity());
        for code in first_char..=last_char {
            let gid = char::from_u32(code as u32).and_then(|ch| face.glyph_index(ch));
            let advance = gid.and_then(|id| face.glyph_hor_advance(id)).unwrap_or(0);
            glyph_ids.push(gid.map(|id| id.0).unwrap_or(0));
            let scaled = (advance as f32 * scale).round() as i32;
            widths.push(scaled.clamp(0, u16::MAX as i32) as u16);
        }
        let missing_width = widths.first().copied().unwrap_or(0);

        let ascent = scale_i16(face.ascender(), scale);
        let descent = scale_i16(face.descender(), scale);
        let bbox = face.global_bounding_box();
        Self {
            first_char,
            last_char,
            widths,
            glyph_ids,
            ascent,
            descent,
            cap_height: face
                .capital_height()
                .map(|value| scale_i16(value, scale))
                .unwrap_or(ascent),
            italic_angle: face
                .italic_angle()
                .map(|value| value.round() as i16)
                .unwrap_or(0),
            bbox: (
                scale_i16(bbox.x_min, scale),
                scale_i16(bbox.y_min, scale),
                scale_i16(bbox.x_max, scale),
                scale_i16(bbox.y_max, scale),
            ),
            missing_width,
            is_fixed_pitch: face.is_monospaced(),
        }
    }
}

fn scale_i16(value: i16, scale: f32) -> i16 {
    let scaled = (value as f32 * scale).round() as i32;
    scaled.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

fn font_names(face: &ttf_parser::Face<'_>, source: &str) -> (String, Vec<String>) {
    use ttf_parser::name::name_id;

    let mut family = None;
    let mut full = None;
    let mut post = None;
    for entry in face.names() {
        let Some(name) = entry.to_string() else {
            continue;
        };
        let slot = match entry.name_id {
            name_id::TYPOGRAPHIC_FAMILY | name_id::FAMILY => &mut family,
            name_id::FULL_NAME => &mut full,
            name_id::POST_SCRIPT_NAME => &mut post,
            _ => continue,
        };
        if slot.is_none() {
            *slot = Some(name);
        }
    }

    let stem = Some(source.to_string());
    let primary = post
        .clone()
        .or_else(|| full.clone())
        .or_else(|| family.clone())
        .unwrap_or_else(|| source.to_string());
    let aliases = [family, full, post, stem]
        .into_iter()
        .flatten()
        .filter(|candidate| *candidate != primary)
        .collect();
    (primary, aliases)
}

fn normalize_name(name: &str) -> String {
    name.trim()
        .trim_matches('"')
        .trim_matches('\'')
        .to_ascii_lowercase()
}
