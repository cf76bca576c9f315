#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageMetrics {
    pub page_number: usize,
    pub command_count: usize,
    pub text_fragments: usize,
    pub content_bytes: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderMetrics {
    pub page_count: usize,
    pub pages: Vec<PageMetrics>,
    pub total_bytes: usize,
    pub render_ms: f64,
    /// Hex SHA-256 of the page content streams; also the trailer `/ID`.
    pub content_sha256: String,
    pub repaired_tokens: u64,
    pub dropped_tokens: u64,
    pub logo_embedded: bool,
}
