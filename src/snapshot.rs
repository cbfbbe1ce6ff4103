//! Product snapshot rendering: the pixel-accurate re-render of what the
//! editor showed, at an arbitrary output resolution.
//!
//! A product with a baked snapshot (`edited_image`) short-circuits the
//! whole pipeline: that bitmap is authoritative. Everything else renders
//! base image plus overlay elements onto a fresh surface.

use std::time::{Duration, Instant};

use tiny_skia::{FilterQuality, Pixmap, PixmapPaint, Transform};

use crate::catalog::Product;
use crate::element::EditSet;
use crate::error::ProofsheetError;
use crate::font::FontRegistry;
use crate::guards;
use crate::overlay::{self, ElementSpace};
use crate::raster;
use crate::resource::ResourceLoader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotFormat {
    Jpeg,
    Png,
}

impl SnapshotFormat {
    pub fn mime(self) -> &'static str {
        match self {
            SnapshotFormat::Jpeg => "image/jpeg",
            SnapshotFormat::Png => "image/png",
        }
    }
}

/// An encoded product render. `degraded` is set when any resource was
/// substituted with the placeholder.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub data: Vec<u8>,
    pub format: SnapshotFormat,
    pub width: u32,
    pub height: u32,
    pub degraded: bool,
}

impl Snapshot {
    pub fn to_data_url(&self) -> String {
        raster::to_data_url(self.format.mime(), &self.data)
    }
}

pub(crate) struct RenderContext<'a> {
    pub(crate) loader: &'a ResourceLoader,
    pub(crate) fonts: &'a FontRegistry,
    pub(crate) jpeg_quality: u8,
    pub(crate) image_wait: Duration,
}

pub(crate) fn render_snapshot(
    product: &Product,
    width: u32,
    height: u32,
    format: SnapshotFormat,
    ctx: &RenderContext<'_>,
) -> Result<Snapshot, ProofsheetError> {
    if product.has_baked_snapshot() {
        if let Some(snapshot) = verbatim_baked(product) {
            return Ok(snapshot);
        }
    }
    let (pixmap, degraded) = render_product_pixmap(product, width, height, ctx)?;
    let data = match format {
        SnapshotFormat::Jpeg => raster::encode_jpeg(&pixmap, ctx.jpeg_quality)?,
        SnapshotFormat::Png => raster::encode_png(&pixmap)?,
    };
    Ok(Snapshot {
        data,
        format,
        width,
        height,
        degraded,
    })
}

/// Renders a product to a raw surface of exactly `(width, height)`. The
/// bool reports placeholder degradation. Baked snapshots are scaled to
/// fill; an unusable baked bitmap falls back to the live render path.
pub(crate) fn render_product_pixmap(
    product: &Product,
    width: u32,
    height: u32,
    ctx: &RenderContext<'_>,
) -> Result<(Pixmap, bool), ProofsheetError> {
    if !guards::surface_ready(width, height) {
        return Err(surface_error(product, width, height));
    }

    if let Some(baked) = baked_source(product) {
        if baked.starts_with("data:") {
            if let Some((mime, payload)) = raster::parse_data_url(baked) {
                if let Some(decoded) = raster::decode_image_to_pixmap(&payload, Some(&mime)) {
                    let mut pixmap = blank_surface(product, width, height)?;
                    draw_to_fill(&mut pixmap, &decoded, width, height);
                    return Ok((pixmap, false));
                }
            }
        } else {
            let loaded = ctx.loader.load(baked)?;
            if !loaded.is_placeholder() {
                let mut pixmap = blank_surface(product, width, height)?;
                draw_to_fill(&mut pixmap, &loaded.pixmap, width, height);
                return Ok((pixmap, false));
            }
        }
        // Baked bitmap unusable; re-render from the edit state below.
    }

    let mut pixmap = blank_surface(product, width, height)?;
    let mut degraded = false;

    let base = match product.base_image_url.as_deref().map(str::trim) {
        Some(src) if !src.is_empty() => ctx.loader.load(src)?,
        _ => ctx.loader.placeholder(),
    };
    if base.is_placeholder() {
        degraded = true;
    }
    draw_to_fill(&mut pixmap, &base.pixmap, width, height);

    if let Some(edit_set) = &product.edit_set {
        degraded |= draw_edit_set(&mut pixmap, edit_set, width, height, ctx);
    }
    Ok((pixmap, degraded))
}

/// The verbatim short-circuit: a baked data URL is decoded only to prove it
/// is a real bitmap, then its payload is passed through untouched.
fn verbatim_baked(product: &Product) -> Option<Snapshot> {
    let baked = baked_source(product)?;
    if !baked.starts_with("data:") {
        return None;
    }
    let (mime, payload) = raster::parse_data_url(baked)?;
    let decoded = raster::decode_image_to_pixmap(&payload, Some(&mime))?;
    let format = if mime.contains("jpeg") || mime.contains("jpg") {
        SnapshotFormat::Jpeg
    } else {
        SnapshotFormat::Png
    };
    Some(Snapshot {
        data: payload,
        format,
        width: decoded.width(),
        height: decoded.height(),
        degraded: false,
    })
}

fn baked_source(product: &Product) -> Option<&str> {
    let baked = product.edited_image.as_deref()?.trim();
    if baked.is_empty() {
        return None;
    }
    Some(baked)
}

fn blank_surface(
    product: &Product,
    width: u32,
    height: u32,
) -> Result<Pixmap, ProofsheetError> {
    let Some(mut pixmap) = Pixmap::new(width, height) else {
        return Err(surface_error(product, width, height));
    };
    pixmap.fill(tiny_skia::Color::WHITE);
    Ok(pixmap)
}

fn surface_error(product: &Product, width: u32, height: u32) -> ProofsheetError {
    ProofsheetError::SurfaceInit {
        context: format!("snapshot of product {}", product.id),
        width,
        height,
    }
}

/// Draws every element of the edit set in array order. Returns whether any
/// overlay image degraded to the placeholder.
fn draw_edit_set(
    pixmap: &mut Pixmap,
    edit_set: &EditSet,
    width: u32,
    height: u32,
    ctx: &RenderContext<'_>,
) -> bool {
    if edit_set.is_empty() {
        return false;
    }
    let sources = edit_set.image_sources();
    let deadline = Instant::now() + ctx.image_wait;
    let resolved = ctx.loader.load_all(&sources, deadline);
    let degraded = resolved.values().any(|loaded| loaded.is_placeholder());

    let space = ElementSpace::for_output(width, height);
    for element in &edit_set.elements {
        overlay::draw_element(pixmap, element, &resolved, ctx.fonts, space);
    }
    degraded
}

fn draw_to_fill(pixmap: &mut Pixmap, source: &Pixmap, width: u32, height: u32) {
    if source.width() == 0 || source.height() == 0 {
        return;
    }
    let transform = Transform::from_scale(
        width as f32 / source.width() as f32,
        height as f32 / source.height() as f32,
    );
    let paint = PixmapPaint {
        quality: FilterQuality::Bilinear,
        ..PixmapPaint::default()
    };
    pixmap.draw_pixmap(0, 0, source.as_ref(), &paint, transform, None);
}
