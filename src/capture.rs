//! Page capture: one composed page layout to one raster page image.
//!
//! The pipeline is settle, resolve images, clamp extents, sanitize a clone,
//! rasterize, encode. Rasterization refuses to run while any live surface is
//! attached to the stage; the capture guard is the sanctioned way to clear
//! them for the duration of a run.

use std::time::Duration;

use tiny_skia::{FilterQuality, LinearGradient, Pixmap, Point, SpreadMode, Transform};

use crate::error::ProofsheetError;
use crate::font::FontRegistry;
use crate::guards;
use crate::layout::{
    self, Block, Cell, Fill, ImageSlot, PageLayout, BODY_FONT_SIZE, CELL_PAD,
    HEADING_FONT_SIZE, LAYOUT_FAMILY, TABLE_FONT_SIZE,
};
use crate::raster;
use crate::resource::ResourceLoader;
use crate::stage::Stage;
use crate::types::{Color, Margins, Pt, Rect, Size};

const HEADING_COLOR: Color = Color {
    r: 0.07,
    g: 0.07,
    b: 0.07,
};
const BODY_COLOR: Color = Color {
    r: 0.2,
    g: 0.2,
    b: 0.2,
};
const RULE_COLOR: Color = Color {
    r: 0.78,
    g: 0.78,
    b: 0.78,
};
const HEADER_ROW_COLOR: Color = Color {
    r: 0.94,
    g: 0.94,
    b: 0.94,
};
const SLOT_FALLBACK_COLOR: Color = Color {
    r: 0.93,
    g: 0.93,
    b: 0.93,
};

pub(crate) struct CaptureContext<'a> {
    pub(crate) fonts: &'a FontRegistry,
    pub(crate) loader: &'a ResourceLoader,
    pub(crate) stage: &'a Stage,
    pub(crate) settle_passes: u32,
    pub(crate) image_wait: Duration,
    pub(crate) capture_scale: f32,
    pub(crate) jpeg_quality: u8,
    pub(crate) page_size: Size,
    pub(crate) margin: Margins,
}

/// One captured page, ready for PDF embedding.
#[derive(Debug, Clone)]
pub struct CapturedPage {
    pub jpeg: Vec<u8>,
    pub px_width: u32,
    pub px_height: u32,
    /// Placement on the output page, in points.
    pub placement: Rect,
    /// Placeholder substitutions made while resolving this page's images.
    pub placeholders: usize,
}

pub(crate) fn capture_page(
    layout: &mut PageLayout,
    ctx: &CaptureContext<'_>,
) -> Result<CapturedPage, ProofsheetError> {
    guards::settle(layout, ctx.fonts, ctx.settle_passes);
    let placeholders = guards::resolve_images_in(layout, ctx.loader, ctx.image_wait);
    guards::clamp_zero_extents(layout);

    if let Some(surface) = ctx.stage.attached().first() {
        return Err(ProofsheetError::Capture(format!(
            "live surface {} still attached during capture of page '{}'",
            surface.id, layout.name
        )));
    }

    let mut clone = layout.sanitized_for_capture();
    guards::settle(&mut clone, ctx.fonts, 1);

    let pixmap = rasterize(&clone, ctx.fonts, ctx.capture_scale)?;
    if !guards::image_ready(&pixmap) {
        return Err(ProofsheetError::Capture(format!(
            "capture of page '{}' produced an empty raster",
            clone.name
        )));
    }
    let jpeg = raster::encode_jpeg(&pixmap, ctx.jpeg_quality)?;
    let placement = placement_rect(
        pixmap.width(),
        pixmap.height(),
        ctx.page_size,
        ctx.margin,
    );

    Ok(CapturedPage {
        jpeg,
        px_width: pixmap.width(),
        px_height: pixmap.height(),
        placement,
        placeholders,
    })
}

/// Scales the captured bitmap to the content width, capping at the content
/// height with aspect preserved (height-capped pages are centered).
fn placement_rect(px_width: u32, px_height: u32, page: Size, margin: Margins) -> Rect {
    let content_w = (page.width - margin.left - margin.right).max(Pt::ZERO);
    let content_h = (page.height - margin.top - margin.bottom).max(Pt::ZERO);
    let ratio = px_height as f32 / px_width.max(1) as f32;

    let mut width = content_w;
    let mut height = content_w * ratio;
    let mut x = margin.left;
    if height > content_h && content_h > Pt::ZERO {
        let shrink = content_h.to_f32() / height.to_f32();
        width = width * shrink;
        height = content_h;
        x = margin.left + (content_w - width) / 2;
    }
    Rect::new(x, margin.top, width, height)
}

fn rasterize(
    layout: &PageLayout,
    fonts: &FontRegistry,
    scale: f32,
) -> Result<Pixmap, ProofsheetError> {
    let px_width = (layout.width as f32 * scale).round() as u32;
    let px_height = (layout.height as f32 * scale).round() as u32;
    if !guards::surface_ready(px_width, px_height) {
        return Err(ProofsheetError::SurfaceInit {
            context: format!("capture of page '{}'", layout.name),
            width: px_width,
            height: px_height,
        });
    }
    let Some(mut pixmap) = Pixmap::new(px_width, px_height) else {
        return Err(ProofsheetError::SurfaceInit {
            context: format!("capture of page '{}'", layout.name),
            width: px_width,
            height: px_height,
        });
    };

    paint_background(&mut pixmap, layout, scale);
    let device = Transform::from_scale(scale, scale);
    for placed in &layout.placed {
        let Some(block) = layout.blocks.get(placed.index) else {
            continue;
        };
        paint_block(&mut pixmap, block, placed.rect, fonts, scale, device);
    }
    Ok(pixmap)
}

fn paint_background(pixmap: &mut Pixmap, layout: &PageLayout, scale: f32) {
    match &layout.background {
        Fill::Solid(color) => pixmap.fill(raster::to_sk_color(*color, 1.0)),
        Fill::Gradient(gradient) => {
            let stops: Vec<tiny_skia::GradientStop> = gradient
                .stops
                .iter()
                .map(|stop| {
                    tiny_skia::GradientStop::new(
                        stop.offset.clamp(0.0, 1.0),
                        raster::to_sk_color(stop.color, 1.0),
                    )
                })
                .collect();
            let shader = LinearGradient::new(
                Point::from_xy(gradient.x0 * scale, gradient.y0 * scale),
                Point::from_xy(gradient.x1 * scale, gradient.y1 * scale),
                stops,
                SpreadMode::Pad,
                Transform::identity(),
            );
            match shader {
                Some(shader) => {
                    let mut paint = tiny_skia::Paint::default();
                    paint.shader = shader;
                    let Some(rect) = tiny_skia::Rect::from_xywh(
                        0.0,
                        0.0,
                        pixmap.width() as f32,
                        pixmap.height() as f32,
                    ) else {
                        return;
                    };
                    pixmap.fill_rect(rect, &paint, Transform::identity(), None);
                }
                None => pixmap.fill(raster::to_sk_color(gradient.solid_equivalent(), 1.0)),
            }
        }
    }
}

fn paint_block(
    pixmap: &mut Pixmap,
    block: &Block,
    rect: Rect,
    fonts: &FontRegistry,
    scale: f32,
    device: Transform,
) {
    match block {
        Block::Heading(text) => {
            paint_lines(
                pixmap, fonts, 700, HEADING_FONT_SIZE, text, rect, HEADING_COLOR, device,
            );
        }
        Block::Text(text) => {
            paint_lines(
                pixmap, fonts, 400, BODY_FONT_SIZE, text, rect, BODY_COLOR, device,
            );
        }
        Block::FieldRow { label, value } => {
            let x = rect.x.to_f32();
            let baseline = rect.y.to_f32() + BODY_FONT_SIZE;
            raster::draw_text_run(
                pixmap,
                fonts,
                LAYOUT_FAMILY,
                700,
                label,
                x,
                baseline,
                BODY_FONT_SIZE,
                HEADING_COLOR,
                device,
            );
            let label_w = fonts
                .measure_text(LAYOUT_FAMILY, 700, Pt::from_f32(BODY_FONT_SIZE), label)
                .to_f32();
            raster::draw_text_run(
                pixmap,
                fonts,
                LAYOUT_FAMILY,
                400,
                value,
                x + label_w + 8.0,
                baseline,
                BODY_FONT_SIZE,
                BODY_COLOR,
                device,
            );
        }
        Block::Spacer(_) | Block::Surface(_) => {}
        Block::Divider => {
            fill_px_rect(
                pixmap,
                rect.x.to_f32(),
                rect.y.to_f32() + 4.0,
                rect.width.to_f32(),
                1.0,
                RULE_COLOR,
                device,
            );
        }
        Block::Table(table) => paint_table(pixmap, table, rect, fonts, scale, device),
        Block::Image(slot) => {
            paint_image_slot(pixmap, slot, rect.x.to_f32(), rect.y.to_f32(), device);
        }
    }
}

fn paint_lines(
    pixmap: &mut Pixmap,
    fonts: &FontRegistry,
    weight: u16,
    font_size: f32,
    text: &str,
    rect: Rect,
    color: Color,
    device: Transform,
) {
    let line_h = layout::line_height(fonts, weight, font_size).to_f32();
    let lines = layout::wrap_text(fonts, weight, font_size, text, rect.width);
    let x = rect.x.to_f32();
    let mut baseline = rect.y.to_f32() + font_size;
    for line in &lines {
        if !line.is_empty() {
            raster::draw_text_run(
                pixmap, fonts, LAYOUT_FAMILY, weight, line, x, baseline, font_size, color,
                device,
            );
        }
        baseline += line_h;
    }
}

fn paint_table(
    pixmap: &mut Pixmap,
    table: &layout::TableBlock,
    rect: Rect,
    fonts: &FontRegistry,
    scale: f32,
    device: Transform,
) {
    let widths = table.column_widths(rect.width);
    let mut y = rect.y;

    let header_h = table.header_height(fonts);
    if header_h > Pt::ZERO {
        fill_px_rect(
            pixmap,
            rect.x.to_f32(),
            y.to_f32(),
            rect.width.to_f32(),
            header_h.to_f32(),
            HEADER_ROW_COLOR,
            device,
        );
        let mut x = rect.x;
        for (title, width) in table.header.iter().zip(widths.iter()) {
            raster::draw_text_run(
                pixmap,
                fonts,
                LAYOUT_FAMILY,
                700,
                title,
                (x + Pt::from_f32(CELL_PAD)).to_f32(),
                (y + Pt::from_f32(CELL_PAD)).to_f32() + TABLE_FONT_SIZE,
                TABLE_FONT_SIZE,
                HEADING_COLOR,
                device,
            );
            x = x + *width;
        }
        y = y + header_h;
    }

    let row_heights = table.row_heights(fonts, rect.width);
    for (row, row_h) in table.rows.iter().zip(row_heights.iter()) {
        let mut x = rect.x;
        for (cell, width) in row.iter().zip(widths.iter()) {
            let inner_x = x + Pt::from_f32(CELL_PAD);
            let inner_y = y + Pt::from_f32(CELL_PAD);
            let inner_w = (*width - Pt::from_f32(2.0 * CELL_PAD)).max(Pt::ZERO);
            match cell {
                Cell::Text(text) => {
                    let cell_rect = Rect::new(inner_x, inner_y, inner_w, *row_h);
                    // Table cells reuse the body painter at the table size.
                    let line_h = layout::line_height(fonts, 400, TABLE_FONT_SIZE).to_f32();
                    let lines = layout::wrap_text(fonts, 400, TABLE_FONT_SIZE, text, inner_w);
                    let mut baseline = cell_rect.y.to_f32() + TABLE_FONT_SIZE;
                    for line in &lines {
                        if !line.is_empty() {
                            raster::draw_text_run(
                                pixmap,
                                fonts,
                                LAYOUT_FAMILY,
                                400,
                                line,
                                cell_rect.x.to_f32(),
                                baseline,
                                TABLE_FONT_SIZE,
                                BODY_COLOR,
                                device,
                            );
                        }
                        baseline += line_h;
                    }
                }
                Cell::Image(slot) => {
                    paint_image_slot(
                        pixmap,
                        slot,
                        inner_x.to_f32(),
                        inner_y.to_f32(),
                        device,
                    );
                }
            }
            x = x + *width;
        }
        y = y + *row_h;
        fill_px_rect(
            pixmap,
            rect.x.to_f32(),
            y.to_f32(),
            rect.width.to_f32(),
            scale.max(1.0) / scale,
            RULE_COLOR,
            device,
        );
    }
}

/// Paints a resolved image slot as a validated pattern fill; unresolved or
/// unusable sources fall back to a flat swatch.
fn paint_image_slot(
    pixmap: &mut Pixmap,
    slot: &ImageSlot,
    x: f32,
    y: f32,
    device: Transform,
) {
    if slot.width == 0 || slot.height == 0 {
        return;
    }
    let source = slot.resolved.as_ref().map(|loaded| &loaded.pixmap);
    let pattern_transform = source
        .map(|img| {
            Transform::from_translate(x, y).pre_scale(
                slot.width as f32 / img.width().max(1) as f32,
                slot.height as f32 / img.height().max(1) as f32,
            )
        })
        .unwrap_or_default();
    let shader = guards::pattern_or_fill(
        source,
        SpreadMode::Pad,
        FilterQuality::Bilinear,
        1.0,
        pattern_transform,
        SLOT_FALLBACK_COLOR,
    );
    let mut paint = tiny_skia::Paint::default();
    paint.shader = shader;
    let Some(rect) =
        tiny_skia::Rect::from_xywh(x, y, slot.width as f32, slot.height as f32)
    else {
        return;
    };
    pixmap.fill_rect(rect, &paint, device, None);
}

fn fill_px_rect(
    pixmap: &mut Pixmap,
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    color: Color,
    device: Transform,
) {
    let Some(rect) = tiny_skia::Rect::from_xywh(x, y, width, height) else {
        return;
    };
    pixmap.fill_rect(rect, &raster::fill_paint(color, 1.0), device, None);
}
