#[derive(Debug, Clone, Default)]
pub struct PageCaptureMetrics {
    pub page_number: usize,
    pub capture_ms: f64,
    pub jpeg_bytes: usize,
    pub block_count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct GenerationMetrics {
    pub pages: Vec<PageCaptureMetrics>,
    pub total_ms: f64,
    pub thumbnails_rendered: usize,
    pub placeholders_substituted: usize,
    pub output_bytes: usize,
}
