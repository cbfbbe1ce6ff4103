//! Image resource loading with placeholder degradation.
//!
//! `ResourceLoader` turns source strings (data URLs, file paths, anything a
//! pluggable fetcher understands) into ready-to-draw pixmaps. A load fails
//! fast only on an empty source; every other failure is absorbed into the
//! deterministic placeholder so one bad resource never aborts a document.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Instant;

use rayon::prelude::*;
use tiny_skia::{PathBuilder, Pixmap, Stroke, Transform};

use crate::error::ProofsheetError;
use crate::font::FontRegistry;
use crate::guards;
use crate::raster;
use crate::types::{Color, Pt};

pub const PLACEHOLDER_WIDTH: u32 = 200;
pub const PLACEHOLDER_HEIGHT: u32 = 150;

/// Result of fetching an external resource.
#[derive(Debug, Clone)]
pub struct FetchedResource {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

impl FetchedResource {
    pub fn new(bytes: Vec<u8>, content_type: Option<String>) -> Self {
        Self {
            bytes,
            content_type,
        }
    }
}

/// Fetches resource bytes for non-data sources. Implementations must fetch
/// anonymously, without ambient credentials, and be shareable across the
/// loader's worker threads.
pub trait ResourceFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<FetchedResource, ProofsheetError>;
}

impl<T: ResourceFetcher + ?Sized> ResourceFetcher for Arc<T> {
    fn fetch(&self, url: &str) -> Result<FetchedResource, ProofsheetError> {
        (**self).fetch(url)
    }
}

/// Default fetcher: plain paths and `file://` URLs. Remote schemes are the
/// integrator's concern and are rejected here.
#[derive(Debug, Default, Clone)]
pub struct FileFetcher;

impl ResourceFetcher for FileFetcher {
    fn fetch(&self, url: &str) -> Result<FetchedResource, ProofsheetError> {
        if url.starts_with("http://") || url.starts_with("https://") {
            return Err(ProofsheetError::InvalidInput(format!(
                "no fetcher configured for remote source: {url}"
            )));
        }
        let path = url.strip_prefix("file://").unwrap_or(url);
        let bytes = std::fs::read(path)?;
        Ok(FetchedResource::new(bytes, guess_content_type(path)))
    }
}

fn guess_content_type(path: &str) -> Option<String> {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())?;
    let mime = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        _ => return None,
    };
    Some(mime.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageOrigin {
    Fetched,
    Placeholder,
}

/// A usable image, always. `origin` records whether the source actually
/// resolved or the placeholder was substituted.
#[derive(Debug)]
pub struct LoadedImage {
    pub pixmap: Pixmap,
    pub origin: ImageOrigin,
}

impl LoadedImage {
    pub fn is_placeholder(&self) -> bool {
        self.origin == ImageOrigin::Placeholder
    }
}

pub struct ResourceLoader {
    fetcher: Arc<dyn ResourceFetcher>,
    fonts: Arc<FontRegistry>,
    cache: Mutex<HashMap<String, Arc<LoadedImage>>>,
    placeholder: OnceLock<Arc<LoadedImage>>,
}

impl ResourceLoader {
    pub fn new(fetcher: Arc<dyn ResourceFetcher>, fonts: Arc<FontRegistry>) -> Self {
        Self {
            fetcher,
            fonts,
            cache: Mutex::new(HashMap::new()),
            placeholder: OnceLock::new(),
        }
    }

    /// Loads one source. Fails only on an empty source string; fetch and
    /// decode failures come back as the placeholder.
    pub fn load(&self, src: &str) -> Result<Arc<LoadedImage>, ProofsheetError> {
        let trimmed = src.trim();
        if trimmed.is_empty() {
            return Err(ProofsheetError::InvalidInput(
                "empty image source".to_string(),
            ));
        }
        if let Some(hit) = self.cache_get(trimmed) {
            return Ok(hit);
        }
        let loaded = match self.resolve_pixmap(trimmed) {
            Some(pixmap) => Arc::new(LoadedImage {
                pixmap,
                origin: ImageOrigin::Fetched,
            }),
            None => self.placeholder(),
        };
        self.cache_put(trimmed, loaded.clone());
        Ok(loaded)
    }

    /// Resolves distinct sources concurrently into a source-keyed image set.
    /// Sources reached after the deadline resolve to the placeholder; empty
    /// sources are skipped.
    pub fn load_all(
        &self,
        sources: &[String],
        deadline: Instant,
    ) -> HashMap<String, Arc<LoadedImage>> {
        let distinct: Vec<&str> = sources
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        distinct
            .par_iter()
            .map(|src| {
                let loaded = if Instant::now() >= deadline {
                    self.placeholder()
                } else {
                    match self.load(src) {
                        Ok(loaded) => loaded,
                        Err(_) => self.placeholder(),
                    }
                };
                (src.to_string(), loaded)
            })
            .collect()
    }

    /// The shared deterministic placeholder card.
    pub fn placeholder(&self) -> Arc<LoadedImage> {
        self.placeholder
            .get_or_init(|| {
                Arc::new(LoadedImage {
                    pixmap: synth_placeholder(&self.fonts),
                    origin: ImageOrigin::Placeholder,
                })
            })
            .clone()
    }

    fn resolve_pixmap(&self, src: &str) -> Option<Pixmap> {
        let pixmap = if let Some((mime, data)) = raster::parse_data_url(src) {
            raster::decode_image_to_pixmap(&data, Some(&mime))?
        } else {
            let fetched = self.fetcher.fetch(src).ok()?;
            raster::decode_image_to_pixmap(&fetched.bytes, fetched.content_type.as_deref())?
        };
        guards::image_ready(&pixmap).then_some(pixmap)
    }

    fn cache_get(&self, src: &str) -> Option<Arc<LoadedImage>> {
        let cache = self.cache.lock().ok()?;
        cache.get(src).cloned()
    }

    fn cache_put(&self, src: &str, loaded: Arc<LoadedImage>) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(src.to_string(), loaded);
        }
    }
}

fn synth_placeholder(fonts: &FontRegistry) -> Pixmap {
    let Some(mut pixmap) = Pixmap::new(PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT) else {
        unreachable!("placeholder dimensions are fixed and non-zero");
    };
    let w = PLACEHOLDER_WIDTH as f32;
    let h = PLACEHOLDER_HEIGHT as f32;
    pixmap.fill(raster::to_sk_color(Color::from_rgb8(0xEC, 0xEC, 0xEC), 1.0));

    let frame_color = Color::from_rgb8(0xC8, 0xC8, 0xC8);
    let paint = raster::fill_paint(frame_color, 1.0);
    let mut stroke = Stroke::default();
    stroke.width = 2.0;

    if let Some(rect) = tiny_skia::Rect::from_xywh(1.0, 1.0, w - 2.0, h - 2.0) {
        let frame = PathBuilder::from_rect(rect);
        pixmap.stroke_path(&frame, &paint, &stroke, Transform::identity(), None);
    }

    let mut cross = PathBuilder::new();
    cross.move_to(0.0, 0.0);
    cross.line_to(w, h);
    cross.move_to(w, 0.0);
    cross.line_to(0.0, h);
    if let Some(path) = cross.finish() {
        pixmap.stroke_path(&path, &paint, &stroke, Transform::identity(), None);
    }

    if !fonts.is_empty() {
        let label = "image not available";
        let font_size = 12.0;
        let text_width = fonts
            .measure_text("sans-serif", 400, Pt::from_f32(font_size), label)
            .to_f32();
        let baseline_x = ((w - text_width) / 2.0).max(2.0);
        let baseline_y = h / 2.0 + font_size / 2.0;
        raster::draw_text_run(
            &mut pixmap,
            fonts,
            "sans-serif",
            400,
            label,
            baseline_x,
            baseline_y,
            font_size,
            Color::from_rgb8(0x66, 0x66, 0x66),
            Transform::identity(),
        );
    }

    pixmap
}
