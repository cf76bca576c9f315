use crate::DocumentSpec;
use crate::frame::{Cursor, Frame};
use crate::record::RecordData;
use crate::text::{Typesetter, draw_text, sanitize};

/// Values longer than this many characters are wrapped even when their
/// kind would place them on one line.
pub const SINGLE_LINE_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Text,
    TextArea,
    Date,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldLayout {
    SingleLine,
    Wrapped,
}

impl FieldKind {
    pub fn layout(self, value: &str) -> FieldLayout {
        match self {
            FieldKind::TextArea => FieldLayout::Wrapped,
            FieldKind::Text | FieldKind::Date | FieldKind::Custom => {
                if value.chars().count() > SINGLE_LINE_LIMIT {
                    FieldLayout::Wrapped
                } else {
                    FieldLayout::SingleLine
                }
            }
        }
    }

    pub fn format(self, value: &str) -> String {
        match self {
            FieldKind::Date => format_date(value),
            FieldKind::Text | FieldKind::TextArea | FieldKind::Custom => value.to_string(),
        }
    }
}

/// `YYYY-MM-DD`, optionally followed by a `T` or space separated time, becomes
/// `DD/MM/YYYY`. Anything else is returned unchanged.
pub fn format_date(value: &str) -> String {
    let date = value
        .split_once(['T', ' '])
        .map(|(date, _)| date)
        .unwrap_or(value);
    let parts: Vec<&str> = date.split('-').collect();
    let [year, month, day] = parts[..] else {
        return value.to_string();
    };
    let numeric = |part: &str, len: usize| part.len() == len && part.bytes().all(|b| b.is_ascii_digit());
    if !numeric(year, 4) || !numeric(month, 2) || !numeric(day, 2) {
        return value.to_string();
    }
    let in_range = |part: &str, max: u32| part.parse::<u32>().is_ok_and(|v| (1..=max).contains(&v));
    if !in_range(month, 12) || !in_range(day, 31) {
        return value.to_string();
    }
    format!("{day}/{month}/{year}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub label: String,
    pub key: String,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub fn new(label: impl Into<String>, key: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            label: label.into(),
            key: key.into(),
            kind,
        }
    }
}

/// Ordered, caller-owned list of fields. Rendering walks it front to back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldTemplate {
    fields: Vec<FieldSpec>,
}

impl FieldTemplate {
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self { fields }
    }

    pub fn push(&mut self, field: FieldSpec) -> &mut Self {
        self.fields.push(field);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromIterator<FieldSpec> for FieldTemplate {
    fn from_iter<I: IntoIterator<Item = FieldSpec>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

pub(crate) fn render_fields(
    typesetter: &mut Typesetter<'_>,
    frame: &mut Frame,
    cursor: Cursor,
    template: &FieldTemplate,
    record: &RecordData,
    spec: &DocumentSpec,
) -> Cursor {
    template.iter().fold(cursor, |cursor, field| {
        render_field(typesetter, frame, cursor, field, record.get(&field.key), spec)
    })
}

/// Label, value and trailing gap for one field. A blank value reserves the
/// same height as a one-line value.
pub(crate) fn render_field(
    typesetter: &mut Typesetter<'_>,
    frame: &mut Frame,
    cursor: Cursor,
    field: &FieldSpec,
    raw: Option<&str>,
    spec: &DocumentSpec,
) -> Cursor {
    let label_style = spec.label_style();
    let body_style = spec.body_style();

    let cursor = frame.ensure_space(cursor, spec.label_line_height + spec.body_line_height);
    let left = frame.left();
    let label = typesetter.fit_text(&field.label, &label_style);
    draw_text(frame, cursor, left, &label_style, &label.text);
    let cursor = frame.advance(cursor, spec.label_line_height);

    let value = field.kind.format(&sanitize(raw.unwrap_or_default()));
    let x = left + spec.value_indent;
    let max_width = frame.content_width() - spec.value_indent;
    let drawn = match field.kind.layout(&value) {
        _ if value.is_empty() => None,
        FieldLayout::Wrapped => {
            let outcome = typesetter.wrap(frame, cursor, &value, x, max_width, &body_style);
            (!outcome.lines.is_empty()).then_some(outcome.cursor)
        }
        FieldLayout::SingleLine => {
            let line = typesetter.fit_text(&value, &body_style);
            if line.text.is_empty() {
                None
            } else if line.width > max_width {
                // Short but wide values still must not cross the right margin.
                Some(
                    typesetter
                        .wrap(frame, cursor, &line.text, x, max_width, &body_style)
                        .cursor,
                )
            } else {
                let cursor = frame.ensure_space(cursor, spec.body_line_height);
                draw_text(frame, cursor, x, &body_style, &line.text);
                Some(frame.advance(cursor, spec.body_line_height))
            }
        }
    };
    // Nothing measurable left: keep the blank line.
    let cursor = drawn.unwrap_or_else(|| frame.advance(cursor, spec.empty_value_height));
    frame.advance(cursor, spec.inter_field_gap)
}
