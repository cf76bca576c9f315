use crate::debug::DebugLogger;
use crate::error::MeasureError;
use crate::font::{FontHandle, FontRegistry};
use crate::frame::{Cursor, Frame};
use crate::types::Pt;
use serde_json::json;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextStyle {
    pub font: FontHandle,
    pub size: Pt,
    pub line_height: Pt,
}

/// What to do with a single token wider than the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WordBreak {
    /// The token gets a line of its own and overhangs the right edge.
    Normal,
    /// The token is split at character boundaries into lines that fit.
    #[default]
    BreakWord,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    pub text: String,
    pub width: Pt,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlacedLine {
    pub page_index: usize,
    pub baseline: Pt,
    pub line: Line,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WrapOutcome {
    pub lines: Vec<PlacedLine>,
    pub cursor: Cursor,
}

/// Tokens the glyph failure policy had to touch during one render.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowStats {
    pub repaired_tokens: u64,
    pub dropped_tokens: u64,
}

/// Collapses every run of whitespace and control characters into one space
/// and trims both ends.
pub fn sanitize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_space = false;
    for ch in raw.chars() {
        if ch.is_whitespace() || ch.is_control() {
            pending_space = !out.is_empty();
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        out.push(ch);
    }
    out
}

/// Greedy text layout against real glyph metrics. Widths are accumulated in
/// font units and converted once per comparison, so a line's recorded width
/// is exactly what measuring its text would return.
pub(crate) struct Typesetter<'a> {
    fonts: &'a FontRegistry,
    word_break: WordBreak,
    stats: FlowStats,
    debug: Option<&'a DebugLogger>,
}

impl<'a> Typesetter<'a> {
    pub(crate) fn new(fonts: &'a FontRegistry, word_break: WordBreak) -> Self {
        Self {
            fonts,
            word_break,
            stats: FlowStats::default(),
            debug: None,
        }
    }

    pub(crate) fn with_debug(mut self, debug: Option<&'a DebugLogger>) -> Self {
        self.debug = debug;
        self
    }

    pub(crate) fn stats(&self) -> FlowStats {
        self.stats
    }

    fn units(&self, text: &str, style: &TextStyle) -> Result<i32, MeasureError> {
        self.fonts.advance_units(style.font, text)
    }

    fn to_width(units: i32, style: &TextStyle) -> Pt {
        style.size.mul_ratio(units, 1000)
    }

    // Unmeasurable tokens are reduced to printable ASCII and retried; a token
    // with nothing left is dropped.
    fn fit_token(&mut self, token: &str, style: &TextStyle) -> Option<(String, i32)> {
        let err = match self.units(token, style) {
            Ok(units) => return Some((token.to_string(), units)),
            Err(err) => err,
        };
        let filtered: String = token.chars().filter(|ch| ch.is_ascii_graphic()).collect();
        let retried = if filtered.is_empty() {
            None
        } else {
            self.units(&filtered, style).ok()
        };
        let kept = retried.is_some();
        if kept {
            self.stats.repaired_tokens += 1;
        } else {
            self.stats.dropped_tokens += 1;
        }
        log::debug!("glyph measurement failed ({err}); token {}", if kept { "repaired" } else { "dropped" });
        if let Some(debug) = self.debug {
            let kind = if kept {
                "text.glyph_repaired"
            } else {
                "text.glyph_dropped"
            };
            debug.log(json!({
                "type": kind,
                "reason": err.to_string(),
                "chars_before": token.chars().count(),
                "chars_after": if kept { filtered.chars().count() } else { 0 },
            }));
            debug.increment(kind, 1);
        }
        retried.map(|units| (filtered, units))
    }

    fn space_units(&self, style: &TextStyle) -> i32 {
        self.units(" ", style).unwrap_or(250)
    }

    /// Sanitizes `text` and applies the glyph failure policy without
    /// wrapping. Used for labels, short values and captions.
    pub(crate) fn fit_text(&mut self, text: &str, style: &TextStyle) -> Line {
        let clean = sanitize(text);
        let space = self.space_units(style);
        let mut out = String::with_capacity(clean.len());
        let mut units = 0i32;
        for raw in clean.split(' ').filter(|token| !token.is_empty()) {
            let Some((token, token_units)) = self.fit_token(raw, style) else {
                continue;
            };
            if !out.is_empty() {
                out.push(' ');
                units = units.saturating_add(space);
            }
            out.push_str(&token);
            units = units.saturating_add(token_units);
        }
        Line {
            width: Self::to_width(units, style),
            text: out,
        }
    }

    /// Packs sanitized tokens into lines no wider than `max_width`. The only
    /// line that may exceed it is a lone token under [`WordBreak::Normal`].
    pub(crate) fn layout_lines(&mut self, text: &str, max_width: Pt, style: &TextStyle) -> Vec<Line> {
        let clean = sanitize(text);
        let space = self.space_units(style);
        let mut lines = Vec::new();
        let mut current = String::new();
        let mut current_units = 0i32;

        for raw in clean.split(' ').filter(|token| !token.is_empty()) {
            let Some((token, token_units)) = self.fit_token(raw, style) else {
                continue;
            };
            if !current.is_empty() {
                let candidate = current_units.saturating_add(space).saturating_add(token_units);
                if Self::to_width(candidate, style) <= max_width {
                    current.push(' ');
                    current.push_str(&token);
                    current_units = candidate;
                    continue;
                }
                lines.push(Line {
                    text: std::mem::take(&mut current),
                    width: Self::to_width(current_units, style),
                });
                current_units = 0;
            }
            if Self::to_width(token_units, style) > max_width {
                match self.word_break {
                    WordBreak::Normal => lines.push(Line {
                        width: Self::to_width(token_units, style),
                        text: token,
                    }),
                    WordBreak::BreakWord => {
                        lines.extend(self.split_long_token(&token, max_width, style))
                    }
                }
            } else {
                current = token;
                current_units = token_units;
            }
        }
        if !current.is_empty() {
            lines.push(Line {
                text: current,
                width: Self::to_width(current_units, style),
            });
        }
        lines
    }

    fn split_long_token(&self, token: &str, max_width: Pt, style: &TextStyle) -> Vec<Line> {
        let mut parts = Vec::new();
        let mut current = String::new();
        let mut current_units = 0i32;
        let mut char_units: HashMap<char, i32> = HashMap::new();
        for ch in token.chars() {
            let units = *char_units.entry(ch).or_insert_with(|| {
                let mut buf = [0u8; 4];
                self.units(ch.encode_utf8(&mut buf), style).unwrap_or(0)
            });
            let next = current_units.saturating_add(units);
            if !current.is_empty() && Self::to_width(next, style) > max_width {
                parts.push(Line {
                    text: std::mem::take(&mut current),
                    width: Self::to_width(current_units, style),
                });
                current_units = units;
            } else {
                current_units = next;
            }
            current.push(ch);
        }
        if !current.is_empty() {
            parts.push(Line {
                text: current,
                width: Self::to_width(current_units, style),
            });
        }
        parts
    }

    /// Flows `text` down the frame starting at `cursor`, reserving one line
    /// height before each line so a full page breaks before the line is drawn.
    pub(crate) fn wrap(
        &mut self,
        frame: &mut Frame,
        cursor: Cursor,
        text: &str,
        x: Pt,
        max_width: Pt,
        style: &TextStyle,
    ) -> WrapOutcome {
        let lines = self.layout_lines(text, max_width, style);
        let mut placed = Vec::with_capacity(lines.len());
        let mut cursor = cursor;
        for line in lines {
            cursor = frame.ensure_space(cursor, style.line_height);
            let baseline = draw_text(frame, cursor, x, style, &line.text);
            placed.push(PlacedLine {
                page_index: cursor.page_index,
                baseline,
                line,
            });
            cursor = frame.advance(cursor, style.line_height);
        }
        WrapOutcome {
            lines: placed,
            cursor,
        }
    }
}

/// Draws `text` in the line band whose top edge is `cursor.y`; returns the
/// baseline used.
pub(crate) fn draw_text(frame: &mut Frame, cursor: Cursor, x: Pt, style: &TextStyle, text: &str) -> Pt {
    let baseline = cursor.y - style.size;
    let page = frame.page_mut(cursor.page_index);
    page.set_font(style.font, style.size);
    page.draw_string(x, baseline, text);
    baseline
}
