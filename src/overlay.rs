//! Renders a single overlay element onto a raster surface.
//!
//! Elements carry geometry in the logical 800x600 canvas space; the
//! `ElementSpace` transform maps that space onto the output surface. The
//! renderer never errors: an element that cannot be drawn (degenerate
//! geometry, unresolved image, no usable font face) is skipped.

use std::collections::HashMap;
use std::sync::Arc;

use tiny_skia::{
    FillRule, FilterQuality, LineCap, LineJoin, PathBuilder, Pixmap, PixmapPaint, Stroke,
    Transform,
};

use crate::element::{Element, ElementKind, PointData, TextSpan, LOGICAL_HEIGHT, LOGICAL_WIDTH};
use crate::font::FontRegistry;
use crate::raster;
use crate::resource::LoadedImage;

/// The affine bridge between logical canvas units and output pixels,
/// computed once per render and threaded through every draw call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElementSpace {
    pub scale_x: f32,
    pub scale_y: f32,
}

impl ElementSpace {
    pub fn for_output(width: u32, height: u32) -> Self {
        Self {
            scale_x: width as f32 / LOGICAL_WIDTH,
            scale_y: height as f32 / LOGICAL_HEIGHT,
        }
    }

    pub fn identity() -> Self {
        Self {
            scale_x: 1.0,
            scale_y: 1.0,
        }
    }

    /// Device transform for one element: rotation about the element's own
    /// top-left corner in logical space, then the logical-to-output scale.
    fn device_transform(&self, element: &Element) -> Transform {
        let base = Transform::from_scale(self.scale_x, self.scale_y);
        if element.rotation == 0.0 {
            return base;
        }
        base.pre_concat(Transform::from_rotate_at(
            element.rotation,
            element.x,
            element.y,
        ))
    }
}

/// Draws one element. Geometry and stroke widths are in logical units and
/// scale with the element space.
pub fn draw_element(
    pixmap: &mut Pixmap,
    element: &Element,
    resolved: &HashMap<String, Arc<LoadedImage>>,
    fonts: &FontRegistry,
    space: ElementSpace,
) {
    let transform = space.device_transform(element);
    match &element.kind {
        ElementKind::Rectangle => draw_rectangle(pixmap, element, transform),
        ElementKind::Circle => draw_circle(pixmap, element, transform),
        ElementKind::Line => draw_line(pixmap, element, transform),
        ElementKind::Arrow(points) => draw_arrow(pixmap, element, points, transform),
        ElementKind::Pen(points) | ElementKind::Path(points) => {
            draw_freehand(pixmap, element, points, transform)
        }
        ElementKind::Text(span) | ElementKind::Icon(span) | ElementKind::Sticker(span) => {
            draw_text(pixmap, element, span, fonts, transform)
        }
        ElementKind::Image(image) => draw_image(pixmap, element, &image.src, resolved, transform),
    }
}

fn draw_rectangle(pixmap: &mut Pixmap, element: &Element, transform: Transform) {
    if element.width <= 0.0 || element.height <= 0.0 {
        return;
    }
    let Some(rect) =
        tiny_skia::Rect::from_xywh(element.x, element.y, element.width, element.height)
    else {
        return;
    };
    let paint = raster::fill_paint(element.resolved_fill(), 1.0);
    pixmap.fill_rect(rect, &paint, transform, None);

    if element.stroke.is_some() {
        let path = PathBuilder::from_rect(rect);
        let paint = raster::fill_paint(element.resolved_stroke(), 1.0);
        let stroke = line_stroke(element.resolved_stroke_width());
        pixmap.stroke_path(&path, &paint, &stroke, transform, None);
    }
}

fn draw_circle(pixmap: &mut Pixmap, element: &Element, transform: Transform) {
    let radius = element.width.min(element.height) / 2.0;
    if radius <= 0.0 {
        return;
    }
    let mut builder = PathBuilder::new();
    builder.push_circle(element.x + radius, element.y + radius, radius);
    let Some(path) = builder.finish() else {
        return;
    };
    let paint = raster::fill_paint(element.resolved_fill(), 1.0);
    pixmap.fill_path(&path, &paint, FillRule::Winding, transform, None);

    if element.stroke.is_some() {
        let paint = raster::fill_paint(element.resolved_stroke(), 1.0);
        let stroke = line_stroke(element.resolved_stroke_width());
        pixmap.stroke_path(&path, &paint, &stroke, transform, None);
    }
}

fn draw_line(pixmap: &mut Pixmap, element: &Element, transform: Transform) {
    let mut builder = PathBuilder::new();
    builder.move_to(element.x, element.y);
    builder.line_to(element.x + element.width, element.y + element.height);
    let Some(path) = builder.finish() else {
        return;
    };
    let paint = raster::fill_paint(element.resolved_stroke(), 1.0);
    let stroke = line_stroke(element.resolved_stroke_width());
    pixmap.stroke_path(&path, &paint, &stroke, transform, None);
}

fn draw_arrow(pixmap: &mut Pixmap, element: &Element, points: &PointData, transform: Transform) {
    let Some(path) = polyline_path(points, true) else {
        return;
    };
    let fill = raster::fill_paint(element.resolved_fill(), 1.0);
    pixmap.fill_path(&path, &fill, FillRule::Winding, transform, None);

    let paint = raster::fill_paint(element.resolved_stroke(), 1.0);
    let stroke = round_stroke(element.resolved_stroke_width());
    pixmap.stroke_path(&path, &paint, &stroke, transform, None);
}

fn draw_freehand(pixmap: &mut Pixmap, element: &Element, points: &PointData, transform: Transform) {
    let Some(path) = polyline_path(points, false) else {
        return;
    };
    let paint = raster::fill_paint(element.resolved_stroke(), 1.0);
    let stroke = round_stroke(element.resolved_stroke_width());
    pixmap.stroke_path(&path, &paint, &stroke, transform, None);
}

fn draw_text(
    pixmap: &mut Pixmap,
    element: &Element,
    span: &TextSpan,
    fonts: &FontRegistry,
    transform: Transform,
) {
    if span.content.is_empty() || span.font_size <= 0.0 {
        return;
    }
    raster::draw_text_run(
        pixmap,
        fonts,
        &span.font_family,
        span.font_weight,
        &span.content,
        element.x,
        element.y + span.font_size,
        span.font_size,
        element.resolved_text_color(),
        transform,
    );
}

fn draw_image(
    pixmap: &mut Pixmap,
    element: &Element,
    src: &str,
    resolved: &HashMap<String, Arc<LoadedImage>>,
    transform: Transform,
) {
    if element.width <= 0.0 || element.height <= 0.0 {
        return;
    }
    // Only pre-resolved sources draw; substitution happened in the loader.
    let Some(loaded) = resolved.get(src.trim()) else {
        return;
    };
    let source = &loaded.pixmap;
    if source.width() == 0 || source.height() == 0 {
        return;
    }
    let fit = Transform::from_scale(
        element.width / source.width() as f32,
        element.height / source.height() as f32,
    );
    let placed = transform
        .pre_concat(Transform::from_translate(element.x, element.y))
        .pre_concat(fit);
    let paint = PixmapPaint {
        quality: FilterQuality::Bilinear,
        ..PixmapPaint::default()
    };
    pixmap.draw_pixmap(0, 0, source.as_ref(), &paint, placed, None);
}

fn polyline_path(points: &PointData, close: bool) -> Option<tiny_skia::Path> {
    let vertices = points.polyline();
    if vertices.len() < 2 {
        return None;
    }
    let mut builder = PathBuilder::new();
    builder.move_to(vertices[0].0, vertices[0].1);
    for &(x, y) in &vertices[1..] {
        builder.line_to(x, y);
    }
    if close {
        builder.close();
    }
    builder.finish()
}

fn line_stroke(width: f32) -> Stroke {
    let mut stroke = Stroke::default();
    stroke.width = width;
    stroke
}

fn round_stroke(width: f32) -> Stroke {
    let mut stroke = Stroke::default();
    stroke.width = width;
    stroke.line_cap = LineCap::Round;
    stroke.line_join = LineJoin::Round;
    stroke
}
