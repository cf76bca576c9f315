use crate::assets::ImageData;
use crate::font::FontHandle;
use crate::types::{Color, Pt, Size};

/// Index into [`Document::images`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageId(pub(crate) usize);

/// One drawing operation in PDF user space (origin bottom-left).
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetFont {
        font: FontHandle,
        size: Pt,
    },
    SetFillColor(Color),
    SetStrokeColor(Color),
    SetLineWidth(Pt),
    // `y` is the text baseline.
    DrawString {
        x: Pt,
        y: Pt,
        text: String,
    },
    Line {
        x1: Pt,
        y1: Pt,
        x2: Pt,
        y2: Pt,
    },
    StrokeRect {
        x: Pt,
        y: Pt,
        width: Pt,
        height: Pt,
    },
    DrawImage {
        x: Pt,
        y: Pt,
        width: Pt,
        height: Pt,
        image: ImageId,
    },
}

#[derive(Debug, Clone)]
struct GraphicsState {
    font: Option<(FontHandle, Pt)>,
    fill_color: Color,
    stroke_color: Color,
    line_width: Pt,
}

impl Default for GraphicsState {
    fn default() -> Self {
        Self {
            font: None,
            fill_color: Color::BLACK,
            stroke_color: Color::BLACK,
            line_width: Pt::from_f32(1.0),
        }
    }
}

/// Append-only command list for one page. Redundant state changes are
/// elided so the content stream stays compact.
#[derive(Debug, Clone, Default)]
pub struct Page {
    commands: Vec<Command>,
    state: GraphicsState,
}

impl Page {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub(crate) fn set_font(&mut self, font: FontHandle, size: Pt) {
        if self.state.font == Some((font, size)) {
            return;
        }
        self.state.font = Some((font, size));
        self.commands.push(Command::SetFont { font, size });
    }

    pub(crate) fn set_fill_color(&mut self, color: Color) {
        if self.state.fill_color == color {
            return;
        }
        self.state.fill_color = color;
        self.commands.push(Command::SetFillColor(color));
    }

    pub(crate) fn set_stroke_color(&mut self, color: Color) {
        if self.state.stroke_color == color {
            return;
        }
        self.state.stroke_color = color;
        self.commands.push(Command::SetStrokeColor(color));
    }

    pub(crate) fn set_line_width(&mut self, width: Pt) {
        let width = width.max(Pt::ZERO);
        if self.state.line_width == width {
            return;
        }
        self.state.line_width = width;
        self.commands.push(Command::SetLineWidth(width));
    }

    pub(crate) fn draw_string(&mut self, x: Pt, y: Pt, text: impl Into<String>) {
        let text = text.into();
        if text.is_empty() {
            return;
        }
        self.commands.push(Command::DrawString { x, y, text });
    }

    pub(crate) fn line(&mut self, x1: Pt, y1: Pt, x2: Pt, y2: Pt) {
        self.commands.push(Command::Line { x1, y1, x2, y2 });
    }

    pub(crate) fn stroke_rect(&mut self, x: Pt, y: Pt, width: Pt, height: Pt) {
        self.commands.push(Command::StrokeRect {
            x,
            y,
            width,
            height,
        });
    }

    pub(crate) fn draw_image(&mut self, x: Pt, y: Pt, width: Pt, height: Pt, image: ImageId) {
        self.commands.push(Command::DrawImage {
            x,
            y,
            width,
            height,
            image,
        });
    }

    pub fn text_fragments(&self) -> impl Iterator<Item = &str> {
        self.commands.iter().filter_map(|cmd| match cmd {
            Command::DrawString { text, .. } => Some(text.as_str()),
            _ => None,
        })
    }
}

/// The laid-out document: pages in creation order plus the image resources
/// they reference.
#[derive(Debug, Clone)]
pub struct Document {
    pub page_size: Size,
    pub title: Option<String>,
    pub pages: Vec<Page>,
    pub(crate) images: Vec<ImageData>,
}
