use crate::DocumentSpec;
use crate::frame::{Cursor, Frame};
use crate::text::{TextStyle, Typesetter, draw_text};
use crate::types::{Color, Pt};

/// Height reserved for the whole panel. The panel is placed as one unit.
pub const SIGNATURE_BLOCK_HEIGHT: Pt = Pt::from_int(420);

// Offsets below the anchor, in points.
const RULE_OFFSET: Pt = Pt::from_int(6);
const HEADING_OFFSET: Pt = Pt::from_int(16);
const ROW_OFFSETS: [Pt; 3] = [Pt::from_int(52), Pt::from_int(176), Pt::from_int(300)];
const COLUMN_GAP: Pt = Pt::from_int(24);
const SIGNATURE_LINE_OFFSET: Pt = Pt::from_int(56);
const NAME_CAPTION_OFFSET: Pt = Pt::from_int(66);
const DATE_CAPTION_OFFSET: Pt = Pt::from_int(82);
const STAMP_SIZE: Pt = Pt::from_int(96);

/// Roles printed in the panel. The counter-signatory label usually comes
/// from the render options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatoryBlock {
    pub heading: String,
    pub senior_roles: [String; 2],
    pub third_role: String,
    pub counter_signatory: String,
}

impl Default for SignatoryBlock {
    fn default() -> Self {
        Self {
            heading: "Signatures".to_string(),
            senior_roles: [
                "Managing Director".to_string(),
                "Chief Financial Officer".to_string(),
            ],
            third_role: "Head of Legal".to_string(),
            counter_signatory: "Counterparty".to_string(),
        }
    }
}

/// A role slot positioned relative to the panel anchor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotPlacement {
    pub role: String,
    pub dx: Pt,
    pub dy: Pt,
    pub width: Pt,
}

impl SignatoryBlock {
    pub fn with_counter_signatory(mut self, label: impl Into<String>) -> Self {
        self.counter_signatory = label.into();
        self
    }

    /// Two senior roles side by side, the third role below the first column
    /// with the stamp beside it, and the counter-signatory in the last row.
    pub fn slots(&self, content_width: Pt) -> Vec<SlotPlacement> {
        let column = (content_width - COLUMN_GAP) / 2;
        let second_column = column + COLUMN_GAP;
        vec![
            SlotPlacement {
                role: self.senior_roles[0].clone(),
                dx: Pt::ZERO,
                dy: ROW_OFFSETS[0],
                width: column,
            },
            SlotPlacement {
                role: self.senior_roles[1].clone(),
                dx: second_column,
                dy: ROW_OFFSETS[0],
                width: column,
            },
            SlotPlacement {
                role: self.third_role.clone(),
                dx: Pt::ZERO,
                dy: ROW_OFFSETS[1],
                width: column,
            },
            SlotPlacement {
                role: self.counter_signatory.clone(),
                dx: Pt::ZERO,
                dy: ROW_OFFSETS[2],
                width: column,
            },
        ]
    }

    /// Lower-left corner offset and side of the stamp placeholder.
    pub fn stamp(&self, content_width: Pt) -> (Pt, Pt, Pt) {
        let column = (content_width - COLUMN_GAP) / 2;
        (column + COLUMN_GAP, ROW_OFFSETS[1] + STAMP_SIZE, STAMP_SIZE)
    }
}

/// Draws the panel below `cursor`, moving to a fresh page first when the
/// current one cannot hold all of it.
pub(crate) fn compose(
    typesetter: &mut Typesetter<'_>,
    frame: &mut Frame,
    cursor: Cursor,
    block: &SignatoryBlock,
    spec: &DocumentSpec,
) -> Cursor {
    let cursor = frame.ensure_space(cursor, SIGNATURE_BLOCK_HEIGHT);
    let (left, width) = (frame.left(), frame.content_width());
    let anchor_y = cursor.y;
    let heading_style = TextStyle {
        font: spec.title_font,
        size: spec.label_size + Pt::from_int(2),
        line_height: spec.label_line_height,
    };
    let role_style = spec.label_style();
    let caption_style = TextStyle {
        font: spec.body_font,
        size: spec.footer_size + Pt::from_int(1),
        line_height: spec.body_line_height,
    };

    {
        let page = frame.page_mut(cursor.page_index);
        page.set_stroke_color(Color::GREY);
        page.set_line_width(Pt::from_f32(0.75));
        let rule_y = anchor_y - RULE_OFFSET;
        page.line(left, rule_y, left + width, rule_y);
    }
    let heading = typesetter.fit_text(&block.heading, &heading_style);
    draw_text(
        frame,
        Cursor {
            page_index: cursor.page_index,
            y: anchor_y - HEADING_OFFSET,
        },
        left,
        &heading_style,
        &heading.text,
    );

    for slot in block.slots(width) {
        let top = anchor_y - slot.dy;
        let x = left + slot.dx;
        let role = typesetter.fit_text(&slot.role, &role_style);
        let band = |offset: Pt| Cursor {
            page_index: cursor.page_index,
            y: top - offset,
        };
        draw_text(frame, band(Pt::ZERO), x, &role_style, &role.text);
        {
            let page = frame.page_mut(cursor.page_index);
            page.set_stroke_color(Color::BLACK);
            page.set_line_width(Pt::from_f32(0.5));
            let line_y = top - SIGNATURE_LINE_OFFSET;
            page.line(x, line_y, x + slot.width, line_y);
        }
        draw_text(frame, band(NAME_CAPTION_OFFSET), x, &caption_style, "Name:");
        draw_text(frame, band(DATE_CAPTION_OFFSET), x, &caption_style, "Date:");
    }

    let (stamp_dx, stamp_dy, stamp_size) = block.stamp(width);
    let stamp_x = left + stamp_dx;
    let stamp_y = anchor_y - stamp_dy;
    {
        let page = frame.page_mut(cursor.page_index);
        page.set_stroke_color(Color::GREY);
        page.set_line_width(Pt::from_f32(0.75));
        page.stroke_rect(stamp_x, stamp_y, stamp_size, stamp_size);
        page.set_stroke_color(Color::BLACK);
    }
    draw_text(
        frame,
        Cursor {
            page_index: cursor.page_index,
            y: stamp_y + stamp_size - Pt::from_int(6),
        },
        stamp_x + Pt::from_int(6),
        &caption_style,
        "Company stamp",
    );

    frame.advance(cursor, SIGNATURE_BLOCK_HEIGHT)
}
