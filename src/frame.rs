use crate::assets::ImageData;
use crate::canvas::{Document, ImageId, Page};
use crate::debug::DebugLogger;
use crate::types::{Margins, Pt, Size};
use serde_json::json;
use std::sync::Arc;

/// Current page and vertical write position. The only mutable render state;
/// drawing functions take it by value and hand back the moved cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub page_index: usize,
    pub y: Pt,
}

/// Owns the page list of one render call. Pages are only ever appended, so
/// page order always equals creation order.
pub struct Frame {
    page_size: Size,
    margins: Margins,
    pages: Vec<Page>,
    images: Vec<ImageData>,
    debug: Option<Arc<DebugLogger>>,
}

impl Frame {
    pub fn new(page_size: Size, margins: Margins) -> Self {
        Self {
            page_size,
            margins,
            pages: Vec::new(),
            images: Vec::new(),
            debug: None,
        }
    }

    pub(crate) fn with_debug(mut self, debug: Option<Arc<DebugLogger>>) -> Self {
        self.debug = debug;
        self
    }

    /// Creates the first page and returns a cursor at its top margin.
    pub fn open(&mut self) -> Cursor {
        let page_index = self.new_page();
        Cursor {
            page_index,
            y: self.top(),
        }
    }

    pub fn page_size(&self) -> Size {
        self.page_size
    }

    pub fn top(&self) -> Pt {
        self.page_size.height - self.margins.top
    }

    pub fn bottom(&self) -> Pt {
        self.margins.bottom
    }

    pub fn left(&self) -> Pt {
        self.margins.left
    }

    pub fn right(&self) -> Pt {
        self.page_size.width - self.margins.right
    }

    pub fn content_width(&self) -> Pt {
        self.right() - self.left()
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn new_page(&mut self) -> usize {
        self.pages.push(Page::new());
        let index = self.pages.len() - 1;
        if let Some(debug) = &self.debug {
            debug.log(json!({"type": "page.new", "page_index": index}));
            debug.increment("pages", 1);
        }
        index
    }

    /// Guarantees `min_height` of room below the cursor, breaking to a fresh
    /// page when the current one cannot hold it.
    pub fn ensure_space(&mut self, cursor: Cursor, min_height: Pt) -> Cursor {
        if cursor.y - min_height >= self.bottom() {
            return cursor;
        }
        let page_index = self.new_page();
        Cursor {
            page_index,
            y: self.top(),
        }
    }

    /// Moves the cursor down, never past the bottom margin. Callers reserve
    /// room with [`Frame::ensure_space`] first; the clamp only absorbs trailing
    /// gaps, which the next reservation turns into a page break.
    pub fn advance(&self, cursor: Cursor, dy: Pt) -> Cursor {
        Cursor {
            page_index: cursor.page_index,
            y: (cursor.y - dy).max(self.bottom()),
        }
    }

    pub(crate) fn page_mut(&mut self, index: usize) -> &mut Page {
        if index >= self.pages.len() {
            // Cursors are minted by this frame, so this only guards misuse.
            while self.pages.len() <= index {
                self.new_page();
            }
        }
        &mut self.pages[index]
    }

    pub(crate) fn add_image(&mut self, image: ImageData) -> ImageId {
        self.images.push(image);
        ImageId(self.images.len() - 1)
    }

    pub fn finish(self, title: Option<String>) -> Document {
        Document {
            page_size: self.page_size,
            title,
            pages: self.pages,
            images: self.images,
        }
    }
}
