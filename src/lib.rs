mod capture;
mod catalog;
mod compose;
mod debug;
mod element;
mod error;
mod font;
mod guards;
mod layout;
mod metrics;
mod overlay;
mod pdf;
mod raster;
mod resource;
mod snapshot;
mod stage;
mod types;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

pub use capture::CapturedPage;
pub use catalog::{config_number, Product, ReportMeta};
use debug::DebugLogger;
pub use element::{
    EditSet, Element, ElementKind, ImageRef, PointData, TextSpan, DEFAULT_ELEMENT_HEIGHT,
    DEFAULT_ELEMENT_WIDTH, DEFAULT_FONT_SIZE, LOGICAL_HEIGHT, LOGICAL_WIDTH,
};
pub use error::ProofsheetError;
pub use font::FontRegistry;
pub use guards::{
    clamp_zero_extents, image_ready, pattern_or_fill, resolve_images_in, safe_create_pattern,
    settle, surface_ready, surface_ready_min,
};
pub use layout::{
    Block, Cell, Fill, ImageSlot, PageLayout, PlacedBlock, TableBlock, PAGE_HEIGHT_PX,
    PAGE_WIDTH_PX,
};
pub use metrics::{GenerationMetrics, PageCaptureMetrics};
pub use overlay::{draw_element, ElementSpace};
pub use pdf::{suggested_filename, PdfBuilder};
pub use resource::{
    FetchedResource, FileFetcher, ImageOrigin, LoadedImage, ResourceFetcher, ResourceLoader,
    PLACEHOLDER_HEIGHT, PLACEHOLDER_WIDTH,
};
pub use snapshot::{Snapshot, SnapshotFormat};
pub use stage::{CaptureGuard, LiveSurface, Stage, SurfaceId};
pub use types::{Color, Gradient, GradientStop, Margins, Pt, Rect, Size};

/// The rendering and document-composition engine. Configure once through
/// [`ProofSheetBuilder`], then render live previews with
/// [`render_snapshot`](ProofSheet::render_snapshot) and produce proof-sheet
/// PDFs with [`generate`](ProofSheet::generate).
pub struct ProofSheet {
    page_size: Size,
    margin: Margins,
    thumb_width: u32,
    thumb_height: u32,
    capture_scale: f32,
    jpeg_quality: u8,
    image_wait: Duration,
    settle_passes: u32,
    filename_prefix: String,
    fonts: Arc<FontRegistry>,
    loader: ResourceLoader,
    debug: Option<DebugLogger>,
}

/// The finished artifact of one generation run.
#[derive(Debug, Clone)]
pub struct GeneratedDocument {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub page_count: usize,
    pub metrics: GenerationMetrics,
}

impl ProofSheet {
    pub fn builder() -> ProofSheetBuilder {
        ProofSheetBuilder::new()
    }

    /// Renders one product at an arbitrary output resolution. A baked
    /// snapshot on the product wins over re-rendering; resource failures
    /// degrade to placeholders and only surface through `degraded`.
    pub fn render_snapshot(
        &self,
        product: &Product,
        width: u32,
        height: u32,
        format: SnapshotFormat,
    ) -> Result<Snapshot, ProofsheetError> {
        snapshot::render_snapshot(product, width, height, format, &self.render_context())
    }

    /// Builds the two report page layouts (manifest and summary) without
    /// capturing them, for inspection. Thumbnails are pre-rendered.
    pub fn compose(
        &self,
        products: &[Product],
        meta: &ReportMeta,
    ) -> Result<Vec<PageLayout>, ProofsheetError> {
        let composed = compose::compose(
            products,
            meta,
            self.thumb_width,
            self.thumb_height,
            &self.render_context(),
        )?;
        Ok(composed.pages)
    }

    /// The full generation run: compose, capture every page under the
    /// capture guard, assemble the PDF. Surfaces detached from `stage` are
    /// restored on every exit path; on error no partial document escapes.
    pub fn generate(
        &self,
        products: &[Product],
        meta: &ReportMeta,
        stage: &mut Stage,
    ) -> Result<GeneratedDocument, ProofsheetError> {
        let started = Instant::now();
        if products.is_empty() {
            return Err(ProofsheetError::InvalidInput(
                "no products to generate a document for".to_string(),
            ));
        }
        self.emit_event(
            "generate.start",
            &[("products", products.len().to_string())],
        );

        let composed = compose::compose(
            products,
            meta,
            self.thumb_width,
            self.thumb_height,
            &self.render_context(),
        )?;
        let mut metrics = GenerationMetrics {
            thumbnails_rendered: composed.thumbnails_rendered,
            placeholders_substituted: composed.degraded_thumbnails,
            ..GenerationMetrics::default()
        };
        self.count("compose.thumbnail", composed.thumbnails_rendered as u64);
        self.count(
            "resource.placeholder",
            composed.degraded_thumbnails as u64,
        );

        let guard = CaptureGuard::acquire(stage);
        self.count("guard.detach", guard.detached_count() as u64);

        let mut builder = PdfBuilder::new(self.page_size);
        let mut pages = composed.pages;
        for (index, layout) in pages.iter_mut().enumerate() {
            let page_started = Instant::now();
            let block_count = layout.block_count();
            let ctx = capture::CaptureContext {
                fonts: &self.fonts,
                loader: &self.loader,
                stage: guard.stage(),
                settle_passes: self.settle_passes,
                image_wait: self.image_wait,
                capture_scale: self.capture_scale,
                jpeg_quality: self.jpeg_quality,
                page_size: self.page_size,
                margin: self.margin,
            };
            let captured = capture::capture_page(layout, &ctx)?;
            let capture_ms = page_started.elapsed().as_secs_f64() * 1000.0;
            metrics.placeholders_substituted += captured.placeholders;
            self.count("resource.placeholder", captured.placeholders as u64);
            self.emit_event(
                "capture.page",
                &[
                    ("page", layout.name.clone()),
                    ("ms", format!("{capture_ms:.1}")),
                    ("bytes", captured.jpeg.len().to_string()),
                ],
            );
            metrics.pages.push(PageCaptureMetrics {
                page_number: index + 1,
                capture_ms,
                jpeg_bytes: captured.jpeg.len(),
                block_count,
            });
            builder.append_page(&captured);
        }

        let page_count = builder.page_count();
        let bytes = builder.finish()?;
        drop(guard);

        metrics.total_ms = started.elapsed().as_secs_f64() * 1000.0;
        metrics.output_bytes = bytes.len();
        let filename = suggested_filename(&self.filename_prefix, SystemTime::now());
        self.emit_event(
            "generate.finish",
            &[
                ("filename", filename.clone()),
                ("bytes", bytes.len().to_string()),
            ],
        );
        self.emit_summary("generate");

        Ok(GeneratedDocument {
            bytes,
            filename,
            page_count,
            metrics,
        })
    }

    /// Generates and writes the artifact into `dir` under its suggested
    /// filename, returning the written path.
    pub fn generate_to_file(
        &self,
        products: &[Product],
        meta: &ReportMeta,
        stage: &mut Stage,
        dir: impl Into<PathBuf>,
    ) -> Result<PathBuf, ProofsheetError> {
        let document = self.generate(products, meta, stage)?;
        let path = dir.into().join(&document.filename);
        std::fs::write(&path, &document.bytes)?;
        Ok(path)
    }

    fn render_context(&self) -> snapshot::RenderContext<'_> {
        snapshot::RenderContext {
            loader: &self.loader,
            fonts: &self.fonts,
            jpeg_quality: self.jpeg_quality,
            image_wait: self.image_wait,
        }
    }

    fn emit_event(&self, kind: &str, fields: &[(&str, String)]) {
        if let Some(debug) = &self.debug {
            debug.event(kind, fields);
        }
    }

    fn count(&self, key: &str, amount: u64) {
        if amount == 0 {
            return;
        }
        if let Some(debug) = &self.debug {
            debug.increment(key, amount);
        }
    }

    fn emit_summary(&self, context: &str) {
        if let Some(debug) = &self.debug {
            debug.emit_summary(context);
            debug.flush();
        }
    }
}

pub struct ProofSheetBuilder {
    page_size: Size,
    margin: Margins,
    thumb_width: u32,
    thumb_height: u32,
    capture_scale: f32,
    jpeg_quality: u8,
    image_wait: Duration,
    settle_passes: u32,
    filename_prefix: String,
    font_dirs: Vec<PathBuf>,
    font_files: Vec<PathBuf>,
    system_font_fallback: bool,
    fetcher: Option<Arc<dyn ResourceFetcher>>,
    debug_path: Option<PathBuf>,
}

impl ProofSheetBuilder {
    pub fn new() -> Self {
        Self {
            page_size: Size::a4(),
            margin: Margins::all(36.0),
            thumb_width: 200,
            thumb_height: 150,
            capture_scale: 2.0,
            jpeg_quality: 85,
            image_wait: Duration::from_secs(15),
            settle_passes: 2,
            filename_prefix: "proof_sheet".to_string(),
            font_dirs: Vec::new(),
            font_files: Vec::new(),
            system_font_fallback: false,
            fetcher: None,
            debug_path: None,
        }
    }

    pub fn page_size(mut self, size: Size) -> Self {
        self.page_size = size;
        self
    }

    pub fn margin_all(mut self, value: f32) -> Self {
        self.margin = Margins::all(value);
        self
    }

    pub fn thumbnail_size(mut self, width: u32, height: u32) -> Self {
        self.thumb_width = width;
        self.thumb_height = height;
        self
    }

    pub fn capture_scale(mut self, scale: f32) -> Self {
        self.capture_scale = scale;
        self
    }

    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality;
        self
    }

    pub fn image_wait_timeout(mut self, timeout: Duration) -> Self {
        self.image_wait = timeout;
        self
    }

    pub fn settle_passes(mut self, passes: u32) -> Self {
        self.settle_passes = passes;
        self
    }

    pub fn filename_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.filename_prefix = prefix.into();
        self
    }

    pub fn register_font_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.font_dirs.push(path.into());
        self
    }

    pub fn register_font_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.font_files.push(path.into());
        self
    }

    /// Probe well-known OS font paths when nothing else registers a face.
    pub fn system_font_fallback(mut self, enabled: bool) -> Self {
        self.system_font_fallback = enabled;
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn ResourceFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn debug_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.debug_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<ProofSheet, ProofsheetError> {
        if !self.capture_scale.is_finite() || self.capture_scale <= 0.0 {
            return Err(ProofsheetError::InvalidInput(
                "capture_scale must be a positive finite number".to_string(),
            ));
        }
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err(ProofsheetError::InvalidInput(
                "jpeg_quality must be in 1..=100".to_string(),
            ));
        }
        if !guards::surface_ready(self.thumb_width, self.thumb_height) {
            return Err(ProofsheetError::InvalidInput(
                "thumbnail_size must be at least 1x1".to_string(),
            ));
        }

        let mut registry = FontRegistry::new();
        for dir in &self.font_dirs {
            registry.register_dir(dir);
        }
        for file in &self.font_files {
            registry.register_file(file);
        }
        if registry.is_empty() && self.system_font_fallback {
            registry.register_system_fallback();
        }
        let fonts = Arc::new(registry);

        let fetcher = self
            .fetcher
            .unwrap_or_else(|| Arc::new(FileFetcher::default()));
        let loader = ResourceLoader::new(fetcher, fonts.clone());

        let debug = match self.debug_path {
            Some(path) => Some(DebugLogger::new(path)?),
            None => None,
        };

        Ok(ProofSheet {
            page_size: self.page_size,
            margin: self.margin,
            thumb_width: self.thumb_width,
            thumb_height: self.thumb_height,
            capture_scale: self.capture_scale,
            jpeg_quality: self.jpeg_quality,
            image_wait: self.image_wait,
            settle_passes: self.settle_passes.max(1),
            filename_prefix: self.filename_prefix,
            fonts,
            loader,
            debug,
        })
    }
}

impl Default for ProofSheetBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::tests::{tiny_png, MapFetcher};
    use std::collections::HashMap;
    use std::fs;

    fn engine_with(entries: HashMap<String, Vec<u8>>) -> ProofSheet {
        ProofSheet::builder()
            .fetcher(Arc::new(MapFetcher::new(entries)))
            .capture_scale(1.0)
            .build()
            .unwrap()
    }

    fn base_entries() -> HashMap<String, Vec<u8>> {
        let mut entries = HashMap::new();
        entries.insert("base.png".to_string(), tiny_png(4, 3, [120, 40, 40, 255]));
        entries
    }

    fn product_with_base(id: &str) -> Product {
        let mut product = Product::new(id, format!("Product {id}"));
        product.description = "Ceramic mug, 330 ml".to_string();
        product.base_image_url = Some("base.png".to_string());
        product
    }

    #[test]
    fn build_rejects_bad_configuration() {
        assert!(matches!(
            ProofSheet::builder().capture_scale(0.0).build(),
            Err(ProofsheetError::InvalidInput(_))
        ));
        assert!(matches!(
            ProofSheet::builder().jpeg_quality(0).build(),
            Err(ProofsheetError::InvalidInput(_))
        ));
        assert!(matches!(
            ProofSheet::builder().jpeg_quality(101).build(),
            Err(ProofsheetError::InvalidInput(_))
        ));
        assert!(matches!(
            ProofSheet::builder().thumbnail_size(0, 10).build(),
            Err(ProofsheetError::InvalidInput(_))
        ));
    }

    #[test]
    fn generate_produces_a_two_page_pdf() {
        let engine = engine_with(base_entries());
        let mut stage = Stage::new();
        let meta = ReportMeta {
            project_name: "Autumn Merch".to_string(),
            customer_name: "North Prints".to_string(),
            customer_contact: "orders@example.com".to_string(),
            date: "2024-11-02".to_string(),
            config_number: None,
        };
        let document = engine
            .generate(&[product_with_base("p1")], &meta, &mut stage)
            .unwrap();

        assert_eq!(document.page_count, 2);
        assert!(document.bytes.starts_with(b"%PDF-"));
        assert!(document.filename.starts_with("proof_sheet_"));
        assert!(document.filename.ends_with(".pdf"));
        let pdf = lopdf::Document::load_mem(&document.bytes).unwrap();
        assert_eq!(pdf.get_pages().len(), 2);

        assert_eq!(document.metrics.pages.len(), 2);
        assert_eq!(document.metrics.thumbnails_rendered, 1);
        assert_eq!(document.metrics.placeholders_substituted, 0);
        assert_eq!(document.metrics.output_bytes, document.bytes.len());
        assert_eq!(document.metrics.pages[0].page_number, 1);
        assert!(document.metrics.pages[0].jpeg_bytes > 0);
    }

    #[test]
    fn page_count_is_fixed_across_batch_sizes() {
        let engine = engine_with(base_entries());
        for count in [1usize, 4, 9] {
            let products: Vec<Product> = (0..count)
                .map(|i| product_with_base(&format!("p{i}")))
                .collect();
            let mut stage = Stage::new();
            let document = engine
                .generate(&products, &ReportMeta::default(), &mut stage)
                .unwrap();
            assert_eq!(document.page_count, 2, "count={count}");
            assert_eq!(document.metrics.thumbnails_rendered, count);
        }
    }

    #[test]
    fn missing_base_image_still_generates() {
        let engine = engine_with(HashMap::new());
        let mut product = Product::new("p1", "Mug");
        product.base_image_url = None;
        let mut stage = Stage::new();
        let document = engine
            .generate(&[product], &ReportMeta::default(), &mut stage)
            .unwrap();
        assert_eq!(document.page_count, 2);
        assert!(document.metrics.placeholders_substituted >= 1);
    }

    #[test]
    fn degenerate_rectangle_element_is_harmless() {
        let mut rect = Element::new("r0", ElementKind::Rectangle)
            .at(50.0, 50.0)
            .sized(0.0, 0.0);
        rect.fill = Some(Color::BLACK);
        let mut product = product_with_base("p1");
        product.edit_set = Some(EditSet::new(vec![rect]));

        let engine = engine_with(base_entries());
        let mut stage = Stage::new();
        let document = engine
            .generate(&[product], &ReportMeta::default(), &mut stage)
            .unwrap();
        assert_eq!(document.page_count, 2);
    }

    #[test]
    fn overlay_heavy_product_generates_with_a_zero_size_surface_attached() {
        let mut arrow = Element::new("a1", ElementKind::Arrow(PointData::Commands(
            "M 10 10 L 90 10 L 50 60".to_string(),
        )))
        .at(100.0, 80.0)
        .sized(120.0, 90.0);
        arrow.rotation = 30.0;
        arrow.fill = Some(Color::rgb(0.8, 0.1, 0.1));
        let broken_image = Element::new("i1", ElementKind::Image(ImageRef::new("gone.png")))
            .at(200.0, 200.0)
            .sized(0.0, 40.0);
        let mut product = product_with_base("p1");
        product.edit_set = Some(EditSet::new(vec![arrow, broken_image]));

        let engine = engine_with(base_entries());
        let mut stage = Stage::new();
        let a = stage.attach(0, 0);
        let document = engine
            .generate(&[product], &ReportMeta::default(), &mut stage)
            .unwrap();
        assert_eq!(document.page_count, 2);
        assert!(document.bytes.starts_with(b"%PDF-"));
        assert_eq!(stage.len(), 1);
        assert_eq!(stage.attached()[0].id, a);
    }

    #[test]
    fn empty_product_list_fails_before_touching_the_stage() {
        let engine = engine_with(HashMap::new());
        let mut stage = Stage::new();
        let a = stage.attach(10, 10);
        let b = stage.attach(0, 0);

        let err = engine
            .generate(&[], &ReportMeta::default(), &mut stage)
            .unwrap_err();
        assert!(matches!(err, ProofsheetError::InvalidInput(_)));
        let ids: Vec<SurfaceId> = stage.attached().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![a, b]);
    }

    #[test]
    fn stage_surfaces_are_restored_after_generation() {
        let engine = engine_with(base_entries());
        let mut stage = Stage::new();
        let a = stage.attach(30, 30);
        // A zero-size surface elsewhere on the stage must not break capture.
        let b = stage.attach(0, 40);

        let document = engine
            .generate(&[product_with_base("p1")], &ReportMeta::default(), &mut stage)
            .unwrap();
        assert_eq!(document.page_count, 2);
        let ids: Vec<SurfaceId> = stage.attached().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![a, b]);
    }

    #[test]
    fn compose_exposes_the_manifest_layout() {
        let engine = engine_with(base_entries());
        let pages = engine
            .compose(&[product_with_base("p1")], &ReportMeta::default())
            .unwrap();
        assert_eq!(pages.len(), 2);
        let table = pages[0]
            .blocks
            .iter()
            .find_map(|block| match block {
                Block::Table(table) => Some(table),
                _ => None,
            })
            .unwrap();
        assert_eq!(table.rows.len(), 1);
        let Cell::Image(slot) = &table.rows[0][0] else {
            panic!("manifest row starts with the thumbnail");
        };
        assert!(!slot.resolved.as_ref().unwrap().is_placeholder());
    }

    #[test]
    fn render_snapshot_is_available_for_live_preview() {
        let engine = engine_with(base_entries());
        let snapshot = engine
            .render_snapshot(&product_with_base("p1"), 400, 300, SnapshotFormat::Png)
            .unwrap();
        assert_eq!((snapshot.width, snapshot.height), (400, 300));
        assert!(!snapshot.degraded);
        let decoded = image::load_from_memory(&snapshot.data).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (400, 300));
    }

    #[test]
    fn generate_to_file_writes_under_the_suggested_name() {
        let engine = ProofSheet::builder()
            .fetcher(Arc::new(MapFetcher::new(base_entries())))
            .capture_scale(1.0)
            .filename_prefix("acme_proofs")
            .build()
            .unwrap();
        let dir = std::env::temp_dir().join(format!("proofsheet_out_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        let mut stage = Stage::new();
        let path = engine
            .generate_to_file(
                &[product_with_base("p1")],
                &ReportMeta::default(),
                &mut stage,
                &dir,
            )
            .unwrap();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("acme_proofs_"));
        assert!(name.ends_with(".pdf"));
        let bytes = fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"%PDF-"));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn debug_log_records_the_run() {
        let log_path = std::env::temp_dir().join(format!(
            "proofsheet_generate_{}.jsonl",
            std::process::id()
        ));
        let engine = ProofSheet::builder()
            .fetcher(Arc::new(MapFetcher::empty()))
            .capture_scale(1.0)
            .debug_log(&log_path)
            .build()
            .unwrap();

        let mut stage = Stage::new();
        stage.attach(10, 10);
        let product = Product::new("p1", "Mug");
        engine
            .generate(&[product], &ReportMeta::default(), &mut stage)
            .unwrap();

        let content = fs::read_to_string(&log_path).unwrap();
        assert!(content.contains("\"type\":\"generate.start\""));
        assert!(content.contains("\"type\":\"capture.page\""));
        assert!(content.contains("\"type\":\"summary\""));
        assert!(content.contains("\"guard.detach\":1"));
        let _ = fs::remove_file(&log_path);
    }
}
