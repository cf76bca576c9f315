mod assets;
mod canvas;
mod debug;
mod error;
mod fields;
mod font;
mod frame;
mod metrics;
mod pdf;
mod record;
mod signature;
mod text;
mod types;

pub use assets::{
    AssetFetcher, DEFAULT_FETCH_TIMEOUT, FetchError, HttpFetcher, fetch_asset, parse_data_uri,
    verification_url,
};
pub use canvas::{Command, Document, ImageId, Page};
use debug::DebugLogger;
pub use error::{ContractError, MeasureError};
pub use fields::{FieldKind, FieldLayout, FieldSpec, FieldTemplate, SINGLE_LINE_LIMIT, format_date};
pub use font::FontHandle;
use font::FontRegistry;
pub use frame::{Cursor, Frame};
pub use metrics::{PageMetrics, RenderMetrics};
pub use record::RecordData;
use serde_json::json;
pub use signature::{SIGNATURE_BLOCK_HEIGHT, SignatoryBlock, SlotPlacement};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
pub use text::{FlowStats, Line, PlacedLine, TextStyle, WordBreak, WrapOutcome, sanitize};
use text::{Typesetter, draw_text};
pub use types::{Color, Margins, Pt, Size};

/// Narrowest content area the field and signature layouts are drawn for.
pub const MIN_CONTENT_WIDTH: Pt = Pt::from_int(200);

pub const FOOTER_LABEL: &str = "Electronically generated document - verify with the QR code";

/// Page geometry, fonts and spacing for one renderer. Fixed once the
/// renderer is built.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSpec {
    pub page_size: Size,
    pub margins: Margins,
    pub title_font: FontHandle,
    pub body_font: FontHandle,
    pub title_size: Pt,
    pub title_line_height: Pt,
    pub label_size: Pt,
    pub label_line_height: Pt,
    pub body_size: Pt,
    pub body_line_height: Pt,
    pub footer_size: Pt,
    pub empty_value_height: Pt,
    pub inter_field_gap: Pt,
    pub value_indent: Pt,
    pub header_gap: Pt,
    pub logo_height: Pt,
    pub footer_height: Pt,
    pub qr_size: Pt,
}

impl Default for DocumentSpec {
    fn default() -> Self {
        Self {
            page_size: Size::a4(),
            margins: Margins::all(60.0),
            title_font: FontHandle::HELVETICA_BOLD,
            body_font: FontHandle::HELVETICA,
            title_size: Pt::from_int(18),
            title_line_height: Pt::from_int(28),
            label_size: Pt::from_int(10),
            label_line_height: Pt::from_int(16),
            body_size: Pt::from_int(11),
            body_line_height: Pt::from_int(15),
            footer_size: Pt::from_int(8),
            empty_value_height: Pt::from_int(15),
            inter_field_gap: Pt::from_int(10),
            value_indent: Pt::from_int(12),
            header_gap: Pt::from_int(24),
            logo_height: Pt::from_int(48),
            footer_height: Pt::from_int(108),
            qr_size: Pt::from_int(96),
        }
    }
}

impl DocumentSpec {
    pub fn content_width(&self) -> Pt {
        self.page_size.width - self.margins.left - self.margins.right
    }

    pub fn content_height(&self) -> Pt {
        self.page_size.height - self.margins.top - self.margins.bottom
    }

    pub(crate) fn title_style(&self) -> TextStyle {
        TextStyle {
            font: self.title_font,
            size: self.title_size,
            line_height: self.title_line_height,
        }
    }

    pub(crate) fn label_style(&self) -> TextStyle {
        TextStyle {
            font: self.title_font,
            size: self.label_size,
            line_height: self.label_line_height,
        }
    }

    pub(crate) fn body_style(&self) -> TextStyle {
        TextStyle {
            font: self.body_font,
            size: self.body_size,
            line_height: self.body_line_height,
        }
    }

    pub(crate) fn footer_style(&self) -> TextStyle {
        TextStyle {
            font: self.body_font,
            size: self.footer_size,
            line_height: self.footer_size.mul_ratio(3, 2),
        }
    }
}

/// Per-document inputs besides the template and the record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    pub document_id: String,
    pub title: Option<String>,
    /// Label/value pairs printed under the title.
    pub identity: Vec<(String, String)>,
    pub logo_url: Option<String>,
    /// Payload of the verification QR code. Required.
    pub qr_content: String,
    /// Replaces the counter-signatory role in the signature panel.
    pub signatory_label: Option<String>,
}

impl Options {
    pub fn new(document_id: impl Into<String>, qr_content: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            qr_content: qr_content.into(),
            ..Self::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_identity(mut self, label: impl Into<String>, value: impl Into<String>) -> Self {
        self.identity.push((label.into(), value.into()));
        self
    }

    pub fn with_logo_url(mut self, url: impl Into<String>) -> Self {
        self.logo_url = Some(url.into());
        self
    }

    pub fn with_signatory_label(mut self, label: impl Into<String>) -> Self {
        self.signatory_label = Some(label.into());
        self
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RenderJob<'a> {
    pub template: &'a FieldTemplate,
    pub record: &'a RecordData,
    pub options: &'a Options,
}

#[derive(Debug, Clone)]
pub struct RenderOutput {
    pub bytes: Vec<u8>,
    pub metrics: RenderMetrics,
}

/// Steps of a render, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Logo,
    Header,
    Fields,
    Signatures,
    Footer,
    VerificationCode,
    PageNumbers,
    Serialize,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Logo => "logo",
            Stage::Header => "header",
            Stage::Fields => "fields",
            Stage::Signatures => "signatures",
            Stage::Footer => "footer",
            Stage::VerificationCode => "verification_code",
            Stage::PageNumbers => "page_numbers",
            Stage::Serialize => "serialize",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStage {
    Idle,
    Rendering(Stage),
    Done,
    Failed(Stage),
}

impl RenderStage {
    /// The state after `next`, or `None` when the move would revisit an
    /// earlier stage or leave a terminal state.
    pub fn transition(self, next: RenderStage) -> Option<RenderStage> {
        match (self, next) {
            (RenderStage::Idle, RenderStage::Rendering(_)) => Some(next),
            (RenderStage::Rendering(current), RenderStage::Rendering(stage)) if stage > current => {
                Some(next)
            }
            (RenderStage::Rendering(_), RenderStage::Done) => Some(next),
            (RenderStage::Rendering(current), RenderStage::Failed(stage)) if stage == current => {
                Some(next)
            }
            _ => None,
        }
    }
}

struct StageTracker<'a> {
    state: RenderStage,
    debug: Option<&'a DebugLogger>,
}

impl<'a> StageTracker<'a> {
    fn new(debug: Option<&'a DebugLogger>) -> Self {
        Self {
            state: RenderStage::Idle,
            debug,
        }
    }

    fn enter(&mut self, stage: Stage) {
        self.move_to(RenderStage::Rendering(stage));
    }

    fn fail(&mut self) {
        if let RenderStage::Rendering(stage) = self.state {
            self.move_to(RenderStage::Failed(stage));
        }
    }

    fn finish(&mut self) {
        self.move_to(RenderStage::Done);
    }

    fn move_to(&mut self, next: RenderStage) {
        let Some(state) = self.state.transition(next) else {
            log::warn!("ignoring stage transition {:?} -> {:?}", self.state, next);
            return;
        };
        self.state = state;
        if let Some(debug) = self.debug {
            let (status, stage) = match state {
                RenderStage::Idle => ("idle", None),
                RenderStage::Rendering(stage) => ("rendering", Some(stage.as_str())),
                RenderStage::Done => ("done", None),
                RenderStage::Failed(stage) => ("failed", Some(stage.as_str())),
            };
            debug.log(json!({"type": "render.stage", "status": status, "stage": stage}));
        }
    }
}

struct LayoutResult {
    document: Document,
    stats: FlowStats,
    logo_embedded: bool,
}

/// Turns a field template plus a sparse record into a paginated PDF. Immutable
/// after [`ContractRendererBuilder::build`]; one renderer serves any number of
/// concurrent renders.
pub struct ContractRenderer {
    spec: DocumentSpec,
    fonts: Arc<FontRegistry>,
    fetcher: Arc<dyn AssetFetcher>,
    signatories: SignatoryBlock,
    word_break: WordBreak,
    page_numbers: bool,
    debug: Option<Arc<DebugLogger>>,
}

impl ContractRenderer {
    pub fn builder() -> ContractRendererBuilder {
        ContractRendererBuilder::new()
    }

    pub fn spec(&self) -> &DocumentSpec {
        &self.spec
    }

    pub fn render(
        &self,
        template: &FieldTemplate,
        record: &RecordData,
        options: &Options,
    ) -> Result<Vec<u8>, ContractError> {
        self.render_with_metrics(template, record, options)
            .map(|output| output.bytes)
    }

    pub fn render_with_metrics(
        &self,
        template: &FieldTemplate,
        record: &RecordData,
        options: &Options,
    ) -> Result<RenderOutput, ContractError> {
        let started = Instant::now();
        let debug = self.render_debug();
        let mut stages = StageTracker::new(debug.as_deref());
        let result = self.render_stages(&mut stages, debug.as_ref(), template, record, options);
        if result.is_err() {
            stages.fail();
        }
        let output = result.map(|(bytes, mut metrics)| {
            stages.finish();
            metrics.render_ms = started.elapsed().as_secs_f64() * 1000.0;
            RenderOutput { bytes, metrics }
        });
        emit_debug_summary(debug.as_deref(), "render");
        output
    }

    /// Lays the document out without serializing it.
    pub fn render_to_document(
        &self,
        template: &FieldTemplate,
        record: &RecordData,
        options: &Options,
    ) -> Result<Document, ContractError> {
        let debug = self.render_debug();
        let mut stages = StageTracker::new(debug.as_deref());
        let result = self.layout(&mut stages, debug.as_ref(), template, record, options);
        match &result {
            Ok(_) => stages.finish(),
            Err(_) => stages.fail(),
        }
        emit_debug_summary(debug.as_deref(), "layout");
        result.map(|layout| layout.document)
    }

    /// Renders independent jobs in parallel. Results keep the input order.
    pub fn render_batch(&self, jobs: &[RenderJob<'_>]) -> Vec<Result<RenderOutput, ContractError>> {
        use rayon::prelude::*;

        jobs.par_iter()
            .map(|job| self.render_with_metrics(job.template, job.record, job.options))
            .collect()
    }

    // Each render counts into its own handle so concurrent batch jobs get
    // separate summaries.
    fn render_debug(&self) -> Option<Arc<DebugLogger>> {
        self.debug
            .as_deref()
            .map(|logger| Arc::new(logger.for_render()))
    }

    fn render_stages(
        &self,
        stages: &mut StageTracker<'_>,
        debug: Option<&Arc<DebugLogger>>,
        template: &FieldTemplate,
        record: &RecordData,
        options: &Options,
    ) -> Result<(Vec<u8>, RenderMetrics), ContractError> {
        let layout = self.layout(stages, debug, template, record, options)?;
        stages.enter(Stage::Serialize);
        let document = layout.document;
        let output = pdf::document_to_pdf(&document, &self.fonts, debug.map(Arc::as_ref))?;
        let pages = document
            .pages
            .iter()
            .enumerate()
            .map(|(idx, page)| PageMetrics {
                page_number: idx + 1,
                command_count: page.commands().len(),
                text_fragments: page.text_fragments().count(),
                content_bytes: output.page_content_bytes.get(idx).copied().unwrap_or(0),
            })
            .collect();
        let metrics = RenderMetrics {
            page_count: document.pages.len(),
            pages,
            total_bytes: output.bytes.len(),
            render_ms: 0.0,
            content_sha256: output.content_sha256,
            repaired_tokens: layout.stats.repaired_tokens,
            dropped_tokens: layout.stats.dropped_tokens,
            logo_embedded: layout.logo_embedded,
        };
        if let Some(debug) = debug {
            debug.increment("documents", 1);
            debug.increment("text.repaired", metrics.repaired_tokens);
            debug.increment("text.dropped", metrics.dropped_tokens);
        }
        Ok((output.bytes, metrics))
    }

    fn layout(
        &self,
        stages: &mut StageTracker<'_>,
        debug_handle: Option<&Arc<DebugLogger>>,
        template: &FieldTemplate,
        record: &RecordData,
        options: &Options,
    ) -> Result<LayoutResult, ContractError> {
        let debug = debug_handle.map(Arc::as_ref);
        let spec = &self.spec;
        let mut frame = Frame::new(spec.page_size, spec.margins).with_debug(debug_handle.cloned());
        let mut typesetter = Typesetter::new(&self.fonts, self.word_break).with_debug(debug);
        let cursor = frame.open();

        stages.enter(Stage::Logo);
        let logo = assets::fetch_asset_logged(self.fetcher.as_ref(), options.logo_url.as_deref(), debug);
        let (cursor, logo_embedded) =
            assets::embed_logo(&mut frame, cursor, logo.as_deref(), spec, debug);

        stages.enter(Stage::Header);
        let cursor = self.render_header(&mut typesetter, &mut frame, cursor, options);

        stages.enter(Stage::Fields);
        let cursor = fields::render_fields(&mut typesetter, &mut frame, cursor, template, record, spec);

        stages.enter(Stage::Signatures);
        let block = match options.signatory_label.as_deref() {
            Some(label) => self.signatories.clone().with_counter_signatory(label),
            None => self.signatories.clone(),
        };
        let cursor = signature::compose(&mut typesetter, &mut frame, cursor, &block, spec);

        stages.enter(Stage::Footer);
        let footer = frame.ensure_space(cursor, spec.footer_height);
        self.render_footer(&mut typesetter, &mut frame, footer, options);

        stages.enter(Stage::VerificationCode);
        let qr_x = frame.right() - spec.qr_size;
        let qr_y = footer.y - spec.footer_height + (spec.footer_height - spec.qr_size) / 2;
        assets::embed_qr(&mut frame, footer.page_index, qr_x, qr_y, spec.qr_size, &options.qr_content)?;

        if self.page_numbers {
            stages.enter(Stage::PageNumbers);
            self.stamp_page_numbers(&mut typesetter, &mut frame);
        }

        Ok(LayoutResult {
            stats: typesetter.stats(),
            document: frame.finish(options.title.as_deref().map(sanitize)),
            logo_embedded,
        })
    }

    fn render_header(
        &self,
        typesetter: &mut Typesetter<'_>,
        frame: &mut Frame,
        cursor: Cursor,
        options: &Options,
    ) -> Cursor {
        let spec = &self.spec;
        let (left, width) = (frame.left(), frame.content_width());
        let title = options.title.as_deref().unwrap_or("Contract");
        let mut cursor = typesetter
            .wrap(frame, cursor, title, left, width, &spec.title_style())
            .cursor;
        let body = spec.body_style();
        let mut lines = vec![format!("Reference: {}", options.document_id)];
        lines.extend(
            options
                .identity
                .iter()
                .map(|(label, value)| format!("{label}: {value}")),
        );
        for line in &lines {
            cursor = typesetter.wrap(frame, cursor, line, left, width, &body).cursor;
        }
        frame.advance(cursor, spec.header_gap)
    }

    // Document id and the verification notice, left of the QR code. Lines
    // that do not fit in the band are left out.
    fn render_footer(
        &self,
        typesetter: &mut Typesetter<'_>,
        frame: &mut Frame,
        top: Cursor,
        options: &Options,
    ) {
        let spec = &self.spec;
        let style = spec.footer_style();
        let (left, right) = (frame.left(), frame.right());
        {
            let page = frame.page_mut(top.page_index);
            page.set_stroke_color(Color::GREY);
            page.set_line_width(Pt::from_f32(0.5));
            page.line(left, top.y, right, top.y);
            page.set_stroke_color(Color::BLACK);
        }
        let text_width = frame.content_width() - spec.qr_size - Pt::from_int(12);
        let id_line = format!("Document ID: {}", options.document_id);
        let mut lines = typesetter.layout_lines(&id_line, text_width, &style);
        lines.extend(typesetter.layout_lines(FOOTER_LABEL, text_width, &style));

        let floor = top.y - spec.footer_height;
        let mut band = Cursor {
            page_index: top.page_index,
            y: top.y - Pt::from_int(10),
        };
        frame.page_mut(top.page_index).set_fill_color(Color::GREY);
        for line in lines {
            if band.y - style.line_height < floor {
                break;
            }
            draw_text(frame, band, left, &style, &line.text);
            band.y -= style.line_height;
        }
        frame.page_mut(top.page_index).set_fill_color(Color::BLACK);
    }

    // "Page i of N", right-aligned inside the bottom margin of every page.
    fn stamp_page_numbers(&self, typesetter: &mut Typesetter<'_>, frame: &mut Frame) {
        let style = self.spec.footer_style();
        let total = frame.page_count();
        let right = frame.right();
        let baseline = self.spec.margins.bottom / 2;
        for index in 0..total {
            let label = typesetter.fit_text(&format!("Page {} of {}", index + 1, total), &style);
            let page = frame.page_mut(index);
            page.set_fill_color(Color::GREY);
            page.set_font(style.font, style.size);
            page.draw_string(right - label.width, baseline, label.text);
            page.set_fill_color(Color::BLACK);
        }
    }
}

fn emit_debug_summary(debug: Option<&DebugLogger>, context: &str) {
    if let Some(logger) = debug {
        logger.emit_summary(context);
        logger.flush();
    }
}

#[derive(Clone)]
pub struct ContractRendererBuilder {
    spec: DocumentSpec,
    empty_value_height: Option<Pt>,
    font_files: Vec<PathBuf>,
    font_bytes: Vec<(String, Vec<u8>)>,
    title_font: Option<String>,
    body_font: Option<String>,
    fetch_timeout: Duration,
    fetcher: Option<Arc<dyn AssetFetcher>>,
    signatories: SignatoryBlock,
    word_break: WordBreak,
    page_numbers: bool,
    debug_path: Option<PathBuf>,
}

impl ContractRendererBuilder {
    pub fn new() -> Self {
        Self {
            spec: DocumentSpec::default(),
            empty_value_height: None,
            font_files: Vec::new(),
            font_bytes: Vec::new(),
            title_font: None,
            body_font: None,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            fetcher: None,
            signatories: SignatoryBlock::default(),
            word_break: WordBreak::default(),
            page_numbers: true,
            debug_path: None,
        }
    }

    pub fn page_size(mut self, size: Size) -> Self {
        self.spec.page_size = size;
        self
    }

    pub fn margins(mut self, margins: Margins) -> Self {
        self.spec.margins = margins;
        self
    }

    pub fn margin_all(mut self, value: f32) -> Self {
        self.spec.margins = Margins::all(value);
        self
    }

    pub fn register_font_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.font_files.push(path.into());
        self
    }

    pub fn register_font_bytes(mut self, name: impl Into<String>, data: Vec<u8>) -> Self {
        self.font_bytes.push((name.into(), data));
        self
    }

    /// Font for the title, field labels and signature roles, by registered
    /// or PostScript name.
    pub fn title_font(mut self, name: impl Into<String>) -> Self {
        self.title_font = Some(name.into());
        self
    }

    pub fn body_font(mut self, name: impl Into<String>) -> Self {
        self.body_font = Some(name.into());
        self
    }

    pub fn title_size(mut self, size: f32, line_height: f32) -> Self {
        self.spec.title_size = Pt::from_f32(size);
        self.spec.title_line_height = Pt::from_f32(line_height);
        self
    }

    pub fn label_size(mut self, size: f32, line_height: f32) -> Self {
        self.spec.label_size = Pt::from_f32(size);
        self.spec.label_line_height = Pt::from_f32(line_height);
        self
    }

    pub fn body_size(mut self, size: f32, line_height: f32) -> Self {
        self.spec.body_size = Pt::from_f32(size);
        self.spec.body_line_height = Pt::from_f32(line_height);
        self
    }

    pub fn footer_size(mut self, size: f32) -> Self {
        self.spec.footer_size = Pt::from_f32(size);
        self
    }

    /// Height a blank value occupies. Defaults to the body line height.
    pub fn empty_value_height(mut self, height: f32) -> Self {
        self.empty_value_height = Some(Pt::from_f32(height));
        self
    }

    pub fn inter_field_gap(mut self, gap: f32) -> Self {
        self.spec.inter_field_gap = Pt::from_f32(gap);
        self
    }

    pub fn value_indent(mut self, indent: f32) -> Self {
        self.spec.value_indent = Pt::from_f32(indent);
        self
    }

    pub fn header_gap(mut self, gap: f32) -> Self {
        self.spec.header_gap = Pt::from_f32(gap);
        self
    }

    pub fn logo_height(mut self, height: f32) -> Self {
        self.spec.logo_height = Pt::from_f32(height);
        self
    }

    pub fn qr_size(mut self, size: f32) -> Self {
        self.spec.qr_size = Pt::from_f32(size);
        self
    }

    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Replaces the HTTP fetcher used for the logo.
    pub fn fetcher(mut self, fetcher: impl AssetFetcher + 'static) -> Self {
        self.fetcher = Some(Arc::new(fetcher));
        self
    }

    pub fn signatory_roles(mut self, senior: [&str; 2], third: &str) -> Self {
        self.signatories.senior_roles = senior.map(str::to_string);
        self.signatories.third_role = third.to_string();
        self
    }

    pub fn counter_signatory(mut self, label: impl Into<String>) -> Self {
        self.signatories.counter_signatory = label.into();
        self
    }

    pub fn word_break(mut self, mode: WordBreak) -> Self {
        self.word_break = mode;
        self
    }

    pub fn page_numbers(mut self, enabled: bool) -> Self {
        self.page_numbers = enabled;
        self
    }

    pub fn debug_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.debug_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<ContractRenderer, ContractError> {
        let mut spec = self.spec;
        spec.empty_value_height = self.empty_value_height.unwrap_or(spec.body_line_height);
        validate_spec(&spec)?;

        let mut registry = FontRegistry::new();
        for file in &self.font_files {
            registry.register_file(file)?;
        }
        for (name, data) in self.font_bytes {
            registry.register_bytes(data, Some(&name))?;
        }
        let resolve = |name: Option<&str>, fallback: FontHandle| match name {
            None => Ok(fallback),
            Some(name) => registry.resolve(name).ok_or_else(|| {
                ContractError::InvalidConfiguration(format!("font '{name}' is not registered"))
            }),
        };
        spec.title_font = resolve(self.title_font.as_deref(), spec.title_font)?;
        spec.body_font = resolve(self.body_font.as_deref(), spec.body_font)?;

        let fetcher: Arc<dyn AssetFetcher> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(HttpFetcher::new(self.fetch_timeout).map_err(|err| {
                ContractError::InvalidConfiguration(format!("http client: {err}"))
            })?),
        };
        let debug = match self.debug_path {
            Some(path) => Some(Arc::new(DebugLogger::new(path)?)),
            None => None,
        };
        Ok(ContractRenderer {
            spec,
            fonts: Arc::new(registry),
            fetcher,
            signatories: self.signatories,
            word_break: self.word_break,
            page_numbers: self.page_numbers,
            debug,
        })
    }
}

impl Default for ContractRendererBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_spec(spec: &DocumentSpec) -> Result<(), ContractError> {
    let invalid = |message: String| Err(ContractError::InvalidConfiguration(message));
    if spec.page_size.width <= Pt::ZERO || spec.page_size.height <= Pt::ZERO {
        return invalid("page size must be positive".to_string());
    }
    let margins = [
        spec.margins.top,
        spec.margins.right,
        spec.margins.bottom,
        spec.margins.left,
    ];
    if margins.iter().any(|m| *m < Pt::ZERO) {
        return invalid("margins must not be negative".to_string());
    }
    if spec.content_width() < MIN_CONTENT_WIDTH {
        return invalid(format!(
            "content width {}pt is below the minimum of {}pt",
            spec.content_width().to_f32(),
            MIN_CONTENT_WIDTH.to_f32()
        ));
    }
    let tallest = SIGNATURE_BLOCK_HEIGHT
        .max(spec.footer_height)
        .max(spec.logo_height + spec.header_gap);
    if spec.content_height() < tallest {
        return invalid(format!(
            "content height {}pt cannot hold the signature block ({}pt)",
            spec.content_height().to_f32(),
            tallest.to_f32()
        ));
    }
    let sizes = [
        ("title size", spec.title_size),
        ("label size", spec.label_size),
        ("body size", spec.body_size),
        ("footer size", spec.footer_size),
        ("title line height", spec.title_line_height),
        ("label line height", spec.label_line_height),
        ("body line height", spec.body_line_height),
        ("qr size", spec.qr_size),
    ];
    if let Some((name, _)) = sizes.iter().find(|(_, value)| *value <= Pt::ZERO) {
        return invalid(format!("{name} must be positive"));
    }
    if spec.qr_size > spec.footer_height {
        return invalid("qr size exceeds the footer band".to_string());
    }
    if spec.empty_value_height < Pt::ZERO || spec.empty_value_height > spec.body_line_height {
        return invalid("empty value height must lie between zero and the body line height".to_string());
    }
    if spec.value_indent < Pt::ZERO || spec.value_indent >= spec.content_width() {
        return invalid("value indent must lie inside the content area".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use std::time::{SystemTime, UNIX_EPOCH};

    struct UnreachableFetcher;

    impl AssetFetcher for UnreachableFetcher {
        fn fetch(&self, _url: &str) -> Result<Vec<u8>, FetchError> {
            Err(FetchError::Status(503))
        }
    }

    fn temp_log_path(tag: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!(
            "contract_pdf_{tag}_{}_{}.jsonl",
            std::process::id(),
            nanos
        ))
    }

    fn renderer() -> ContractRenderer {
        match ContractRenderer::builder().build() {
            Ok(renderer) => renderer,
            Err(err) => panic!("default renderer should build: {err}"),
        }
    }

    fn options() -> Options {
        Options::new("C-2024-0042", verification_url("https://verify.example.com", "C-2024-0042"))
            .with_title("Master Services Agreement")
    }

    fn field_template(count: usize) -> FieldTemplate {
        (0..count)
            .map(|i| FieldSpec::new(format!("Field {i}"), format!("f{i}"), FieldKind::Text))
            .collect()
    }

    fn page_count(bytes: &[u8]) -> usize {
        lopdf::Document::load_mem(bytes)
            .expect("renderer output parses")
            .get_pages()
            .len()
    }

    fn all_text(document: &Document) -> Vec<String> {
        document
            .pages
            .iter()
            .flat_map(|page| page.text_fragments().map(str::to_string))
            .collect()
    }

    fn tiny_png_data_uri() -> String {
        let img = image::RgbImage::from_pixel(3, 1, image::Rgb([10, 20, 30]));
        let mut out = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut out, image::ImageFormat::Png)
            .expect("encode png");
        format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(out.into_inner())
        )
    }

    #[test]
    fn renderer_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ContractRenderer>();
    }

    #[test]
    fn missing_record_keys_render_as_blank_fields() {
        let renderer = renderer();
        let template: FieldTemplate = vec![
            FieldSpec::new("Party", "party", FieldKind::Text),
            FieldSpec::new("Start date", "start", FieldKind::Date),
            FieldSpec::new("Scope", "scope", FieldKind::TextArea),
        ]
        .into_iter()
        .collect();
        let record: RecordData = [("start", "2024-05-01")].into_iter().collect();
        let document = renderer
            .render_to_document(&template, &record, &options())
            .expect("renders");
        let text = all_text(&document);
        for label in ["Party", "Start date", "Scope", "01/05/2024"] {
            assert!(text.iter().any(|t| t == label), "missing {label}");
        }
        let bytes = renderer.render(&template, &record, &options()).expect("renders");
        assert!(bytes.starts_with(b"%PDF-1.7"));
    }

    #[test]
    fn blank_and_short_values_paginate_identically() {
        let renderer = renderer();
        let template = field_template(30);
        let empty = renderer
            .render_with_metrics(&template, &RecordData::new(), &options())
            .expect("renders");
        let short: RecordData = (0..30).map(|i| (format!("f{i}"), "ok")).collect();
        let filled = renderer
            .render_with_metrics(&template, &short, &options())
            .expect("renders");
        assert_eq!(empty.metrics.page_count, filled.metrics.page_count);
        assert_eq!(page_count(&empty.bytes), page_count(&filled.bytes));

        let document = renderer
            .render_to_document(&template, &RecordData::new(), &options())
            .expect("renders");
        let labels = all_text(&document)
            .iter()
            .filter(|t| t.starts_with("Field "))
            .count();
        assert_eq!(labels, 30);
    }

    #[test]
    fn one_overlong_value_spills_onto_a_second_page() {
        let renderer = renderer();
        let template: FieldTemplate = [FieldSpec::new("Name", "n", FieldKind::Text)]
            .into_iter()
            .collect();
        let record: RecordData = [("n", "A".repeat(400))].into_iter().collect();
        let output = renderer
            .render_with_metrics(&template, &record, &options())
            .expect("renders");
        assert!(output.metrics.page_count >= 2);
        assert_eq!(page_count(&output.bytes), output.metrics.page_count);
    }

    #[test]
    fn overlong_value_keeps_a_single_line_without_word_break() {
        let renderer = ContractRenderer::builder()
            .word_break(WordBreak::Normal)
            .build()
            .expect("builds");
        let template: FieldTemplate = [FieldSpec::new("Name", "n", FieldKind::Text)]
            .into_iter()
            .collect();
        let value = "A".repeat(400);
        let record: RecordData = [("n", value.clone())].into_iter().collect();
        let document = renderer
            .render_to_document(&template, &record, &options())
            .expect("renders");
        assert!(all_text(&document).contains(&value));
    }

    #[test]
    fn empty_qr_content_is_fatal() {
        let renderer = renderer();
        let mut options = options();
        options.qr_content = "  ".to_string();
        let err = match renderer.render(&field_template(2), &RecordData::new(), &options) {
            Ok(_) => panic!("empty qr payload must fail"),
            Err(err) => err,
        };
        assert!(matches!(err, ContractError::QrGeneration(_)));
    }

    #[test]
    fn unreachable_logo_matches_no_logo_output() {
        let renderer = ContractRenderer::builder()
            .fetcher(UnreachableFetcher)
            .build()
            .expect("builds");
        let template = field_template(5);
        let record = RecordData::new();
        let without = renderer
            .render_with_metrics(&template, &record, &options())
            .expect("renders");
        let with_url = renderer
            .render_with_metrics(
                &template,
                &record,
                &options().with_logo_url("https://cdn.invalid/logo.png"),
            )
            .expect("logo failure is not fatal");
        assert!(!with_url.metrics.logo_embedded);
        assert_eq!(without.bytes, with_url.bytes);
    }

    #[test]
    fn data_uri_logo_is_embedded_and_shifts_layout() {
        let renderer = renderer();
        let template = field_template(1);
        let record = RecordData::new();
        let plain = renderer
            .render_to_document(&template, &record, &options())
            .expect("renders");
        let output = renderer
            .render_with_metrics(
                &template,
                &record,
                &options().with_logo_url(tiny_png_data_uri()),
            )
            .expect("renders");
        assert!(output.metrics.logo_embedded);
        let with_logo = renderer
            .render_to_document(
                &template,
                &record,
                &options().with_logo_url(tiny_png_data_uri()),
            )
            .expect("renders");
        // Logo plus QR code.
        assert_eq!(with_logo.images.len(), 2);
        assert_eq!(plain.images.len(), 1);
        let title_y = |doc: &Document| {
            doc.pages[0].commands().iter().find_map(|cmd| match cmd {
                Command::DrawString { y, text, .. } if text == "Master Services Agreement" => Some(*y),
                _ => None,
            })
        };
        let spec = renderer.spec();
        assert_eq!(
            title_y(&plain).map(|y| y - spec.logo_height),
            title_y(&with_logo)
        );
    }

    #[test]
    fn identical_inputs_give_identical_bytes() {
        let renderer = renderer();
        let template = field_template(12);
        let record: RecordData = (0..12).map(|i| (format!("f{i}"), format!("value {i}"))).collect();
        let options = options()
            .with_identity("Customer", "Acme Ltd")
            .with_identity("Supplier", "Widget Co");
        let first = renderer.render(&template, &record, &options).expect("renders");
        let second = renderer.render(&template, &record, &options).expect("renders");
        assert_eq!(first, second);
    }

    #[test]
    fn batch_results_keep_input_order() {
        let renderer = renderer();
        let template = field_template(3);
        let records: Vec<RecordData> = (0..6)
            .map(|i| [("f0", "x".repeat(i * 300))].into_iter().collect())
            .collect();
        let options: Vec<Options> = (0..6)
            .map(|i| Options::new(format!("DOC-{i}"), format!("https://verify.example.com/DOC-{i}")))
            .collect();
        let jobs: Vec<RenderJob<'_>> = records
            .iter()
            .zip(&options)
            .map(|(record, options)| RenderJob {
                template: &template,
                record,
                options,
            })
            .collect();
        let results = renderer.render_batch(&jobs);
        assert_eq!(results.len(), jobs.len());
        for (job, result) in jobs.iter().zip(results) {
            let batch = result.expect("renders");
            let single = renderer
                .render(job.template, job.record, job.options)
                .expect("renders");
            assert_eq!(batch.bytes, single);
        }
    }

    #[test]
    fn text_stays_above_the_bottom_margin() {
        let renderer = renderer();
        let spec = renderer.spec().clone();
        let template: FieldTemplate = (0..20)
            .map(|i| FieldSpec::new(format!("Clause {i}"), format!("c{i}"), FieldKind::TextArea))
            .collect();
        let record: RecordData = (0..20)
            .map(|i| (format!("c{i}"), "Terms and conditions apply. ".repeat(i * 3)))
            .collect();
        let document = renderer
            .render_to_document(&template, &record, &options())
            .expect("renders");
        assert!(document.pages.len() > 1);
        for page in &document.pages {
            for cmd in page.commands() {
                if let Command::DrawString { y, text, .. } = cmd {
                    if text.starts_with("Page ") {
                        assert!(*y < spec.margins.bottom);
                    } else {
                        assert!(*y >= spec.margins.bottom, "{text:?} below margin");
                    }
                }
            }
        }
    }

    #[test]
    fn every_page_is_numbered() {
        let renderer = renderer();
        let record: RecordData = [("f0", "word ".repeat(2000))].into_iter().collect();
        let document = renderer
            .render_to_document(&field_template(1), &record, &options())
            .expect("renders");
        let total = document.pages.len();
        assert!(total >= 2);
        for (index, page) in document.pages.iter().enumerate() {
            let expected = format!("Page {} of {}", index + 1, total);
            assert!(page.text_fragments().any(|t| t == expected));
        }

        let unnumbered = ContractRenderer::builder()
            .page_numbers(false)
            .build()
            .expect("builds")
            .render_to_document(&field_template(1), &record, &options())
            .expect("renders");
        assert!(!all_text(&unnumbered).iter().any(|t| t.starts_with("Page ")));
    }

    #[test]
    fn footer_and_signatures_follow_the_fields() {
        let renderer = renderer();
        let document = renderer
            .render_to_document(
                &field_template(2),
                &RecordData::new(),
                &options().with_signatory_label("Acme Ltd"),
            )
            .expect("renders");
        let text = all_text(&document);
        let position = |needle: &str| {
            text.iter()
                .position(|t| t == needle)
                .unwrap_or_else(|| panic!("{needle} not drawn"))
        };
        assert!(position("Field 1") < position("Signatures"));
        assert!(position("Signatures") < position("Acme Ltd"));
        assert!(position("Acme Ltd") < position("Document ID: C-2024-0042"));
        assert!(position("Document ID: C-2024-0042") < position(FOOTER_LABEL));
        assert!(!text.iter().any(|t| t == "Counterparty"));
    }

    #[test]
    fn metrics_describe_the_output() {
        let renderer = renderer();
        let record: RecordData = [("f0", "Caf\u{416} \u{1F4DD}")].into_iter().collect();
        let output = renderer
            .render_with_metrics(&field_template(1), &record, &options())
            .expect("renders");
        let metrics = &output.metrics;
        assert_eq!(metrics.total_bytes, output.bytes.len());
        assert_eq!(metrics.pages.len(), metrics.page_count);
        assert_eq!(metrics.repaired_tokens, 1);
        assert_eq!(metrics.dropped_tokens, 1);
        assert!(metrics.pages.iter().all(|page| page.content_bytes > 0));
        let haystack = String::from_utf8_lossy(&output.bytes);
        assert!(haystack.contains(&metrics.content_sha256));
    }

    #[test]
    fn latin1_values_render_without_repair() {
        let renderer = renderer();
        let record: RecordData = [("f0", "J\u{FC}rgen M\u{FC}ller Caf\u{E9}")].into_iter().collect();
        let options = options().with_identity("Gesch\u{E4}ftsf\u{FC}hrer", "Fran\u{E7}ois L\u{E9}vy");
        let output = renderer
            .render_with_metrics(&field_template(1), &record, &options)
            .expect("renders");
        assert_eq!(output.metrics.repaired_tokens, 0);
        assert_eq!(output.metrics.dropped_tokens, 0);
        let document = renderer
            .render_to_document(&field_template(1), &record, &options)
            .expect("renders");
        let text = all_text(&document);
        assert!(text.iter().any(|t| t == "J\u{FC}rgen M\u{FC}ller Caf\u{E9}"));
        assert!(text.iter().any(|t| t == "Gesch\u{E4}ftsf\u{FC}hrer: Fran\u{E7}ois L\u{E9}vy"));
    }

    #[test]
    fn long_title_and_identity_wrap_inside_the_margins() {
        let renderer = renderer();
        let spec = renderer.spec().clone();
        let right = spec.page_size.width - spec.margins.right;
        let options = options()
            .with_title("Framework Agreement for the Provision of Managed Infrastructure Services and Associated Support ".repeat(2))
            .with_identity("Registered office", "Unit 4, The Old Brewery, 17 Long Lane, Little Hampden, Great Missenden, Buckinghamshire, HP16 9PH, United Kingdom of Great Britain");
        let document = renderer
            .render_to_document(&field_template(1), &RecordData::new(), &options)
            .expect("renders");
        let mut title_lines = 0;
        for page in &document.pages {
            let mut font = (FontHandle::HELVETICA, Pt::ZERO);
            for cmd in page.commands() {
                match cmd {
                    Command::SetFont { font: handle, size } => font = (*handle, *size),
                    Command::DrawString { x, text, .. } => {
                        let width = renderer
                            .fonts
                            .measure(font.0, font.1, text)
                            .expect("drawn text is measurable");
                        assert!(*x + width <= right, "{text:?} crosses the right margin");
                        if font.1 == spec.title_size {
                            title_lines += 1;
                        }
                    }
                    _ => {}
                }
            }
        }
        assert!(title_lines >= 2);
        let text = all_text(&document);
        assert!(text.iter().any(|t| t.starts_with("Registered office: Unit 4")));
    }

    #[test]
    fn batch_jobs_get_separate_debug_summaries() {
        let path = temp_log_path("batch");
        let renderer = ContractRenderer::builder()
            .debug_log(&path)
            .build()
            .expect("builds");
        let template = field_template(1);
        let records: Vec<RecordData> = [1usize, 3000]
            .iter()
            .map(|n| [("f0", "word ".repeat(*n))].into_iter().collect())
            .collect();
        let options = options();
        let jobs: Vec<RenderJob<'_>> = records
            .iter()
            .map(|record| RenderJob {
                template: &template,
                record,
                options: &options,
            })
            .collect();
        let pages: Vec<u64> = renderer
            .render_batch(&jobs)
            .into_iter()
            .map(|result| result.expect("renders").metrics.page_count as u64)
            .collect();

        let log = std::fs::read_to_string(&path).expect("read log");
        let mut summarized: Vec<u64> = log
            .lines()
            .map(|line| serde_json::from_str::<serde_json::Value>(line).expect("json line"))
            .filter(|e| e["type"] == "debug.summary")
            .map(|e| {
                assert_eq!(e["counts"]["documents"], 1);
                e["counts"]["pages"].as_u64().unwrap_or(0)
            })
            .collect();
        summarized.sort_unstable();
        let mut expected = pages;
        expected.sort_unstable();
        assert_eq!(summarized, expected);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn stage_transitions_only_move_forward() {
        let idle = RenderStage::Idle;
        let fields = idle
            .transition(RenderStage::Rendering(Stage::Fields))
            .expect("idle can start");
        assert_eq!(fields.transition(RenderStage::Rendering(Stage::Logo)), None);
        assert_eq!(fields.transition(RenderStage::Rendering(Stage::Fields)), None);
        assert_eq!(
            fields.transition(RenderStage::Failed(Stage::Fields)),
            Some(RenderStage::Failed(Stage::Fields))
        );
        assert_eq!(fields.transition(RenderStage::Done), Some(RenderStage::Done));
        assert_eq!(RenderStage::Done.transition(RenderStage::Rendering(Stage::Logo)), None);
        assert_eq!(idle.transition(RenderStage::Done), None);
    }

    #[test]
    fn debug_log_records_stages_and_summary() {
        let path = temp_log_path("render");
        let renderer = ContractRenderer::builder()
            .debug_log(&path)
            .build()
            .expect("builds");
        let mut options = options();
        let _ = renderer.render(&field_template(2), &RecordData::new(), &options);
        options.qr_content.clear();
        let _ = renderer.render(&field_template(2), &RecordData::new(), &options);

        let log = std::fs::read_to_string(&path).expect("read log");
        let events: Vec<serde_json::Value> = log
            .lines()
            .map(|line| serde_json::from_str(line).expect("json line"))
            .collect();
        let statuses: Vec<&str> = events
            .iter()
            .filter(|e| e["type"] == "render.stage")
            .filter_map(|e| e["status"].as_str())
            .collect();
        assert!(statuses.contains(&"done"));
        assert!(statuses.contains(&"failed"));
        let failed = events
            .iter()
            .find(|e| e["status"] == "failed")
            .expect("failed stage logged");
        assert_eq!(failed["stage"], "verification_code");
        let summaries = events.iter().filter(|e| e["type"] == "debug.summary").count();
        assert_eq!(summaries, 2);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn builder_rejects_unusable_geometry() {
        let cases = [
            ContractRenderer::builder().page_size(Size::from_mm(50.0, 80.0)),
            ContractRenderer::builder().page_size(Size::from_mm(210.0, 120.0)),
            ContractRenderer::builder().margin_all(300.0),
            ContractRenderer::builder().body_size(0.0, 15.0),
        ];
        for builder in cases {
            let err = match builder.build() {
                Ok(_) => panic!("geometry should be rejected"),
                Err(err) => err,
            };
            assert!(matches!(err, ContractError::InvalidConfiguration(_)), "{err}");
        }
    }

    #[test]
    fn builder_rejects_unknown_fonts() {
        let err = match ContractRenderer::builder().body_font("Garamond").build() {
            Ok(_) => panic!("unregistered font"),
            Err(err) => err,
        };
        assert!(matches!(err, ContractError::InvalidConfiguration(_)));
        assert!(err.to_string().contains("Garamond"));

        let err = match ContractRenderer::builder()
            .register_font_bytes("Broken", vec![0; 16])
            .build()
        {
            Ok(_) => panic!("invalid font bytes"),
            Err(err) => err,
        };
        assert!(matches!(err, ContractError::FontEmbed(_)));
    }

    #[test]
    fn builder_rejects_blank_height_above_the_body_line() {
        let err = match ContractRenderer::builder().empty_value_height(40.0).build() {
            Ok(_) => panic!("blank fields would outgrow their reservation"),
            Err(err) => err,
        };
        assert!(matches!(err, ContractError::InvalidConfiguration(_)));
    }

    #[test]
    fn empty_value_height_defaults_to_body_line_height() {
        let renderer = ContractRenderer::builder()
            .body_size(12.0, 18.0)
            .build()
            .expect("builds");
        assert_eq!(renderer.spec().empty_value_height, Pt::from_int(18));
        let renderer = ContractRenderer::builder()
            .empty_value_height(9.0)
            .build()
            .expect("builds");
        assert_eq!(renderer.spec().empty_value_height, Pt::from_int(9));
    }
}
