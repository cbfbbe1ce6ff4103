//! Pre-flight guards for the zero-dimension surface defect class: a raster
//! surface, image, or tiling pattern with a zero extent must never reach the
//! drawing layer. Every guard is pure and total; invalid input yields a
//! `false`/`None`/fallback, never a panic.

use std::time::{Duration, Instant};

use tiny_skia::{FilterQuality, Pattern, Pixmap, Shader, SpreadMode, Transform};

use crate::font::FontRegistry;
use crate::layout::PageLayout;
use crate::raster;
use crate::resource::ResourceLoader;
use crate::types::Color;

pub fn surface_ready(width: u32, height: u32) -> bool {
    surface_ready_min(width, height, 1, 1)
}

pub fn surface_ready_min(width: u32, height: u32, min_width: u32, min_height: u32) -> bool {
    width >= min_width.max(1) && height >= min_height.max(1)
}

/// A decoded image is usable only with both natural dimensions non-zero.
pub fn image_ready(pixmap: &Pixmap) -> bool {
    pixmap.width() > 0 && pixmap.height() > 0
}

/// Builds a tiling pattern shader only after validating its source. `None`
/// signals the caller to fall back to a plain fill.
pub fn safe_create_pattern<'a>(
    source: Option<&'a Pixmap>,
    spread: SpreadMode,
    quality: FilterQuality,
    opacity: f32,
    transform: Transform,
) -> Option<Shader<'a>> {
    let pixmap = source?;
    if !image_ready(pixmap) {
        return None;
    }
    let opacity = if opacity.is_finite() {
        opacity.clamp(0.0, 1.0)
    } else {
        1.0
    };
    Some(Pattern::new(
        pixmap.as_ref(),
        spread,
        quality,
        opacity,
        transform,
    ))
}

pub fn pattern_or_fill<'a>(
    source: Option<&'a Pixmap>,
    spread: SpreadMode,
    quality: FilterQuality,
    opacity: f32,
    transform: Transform,
    fallback: Color,
) -> Shader<'a> {
    safe_create_pattern(source, spread, quality, opacity, transform)
        .unwrap_or(Shader::SolidColor(raster::to_sk_color(fallback, 1.0)))
}

/// Runs the measurement pass `passes` times (at least once) so derived
/// geometry is committed before anything reads it.
pub fn settle(layout: &mut PageLayout, fonts: &FontRegistry, passes: u32) {
    for _ in 0..passes.max(1) {
        layout.measure(fonts);
    }
}

/// Resolves every unresolved image slot of the layout under one shared
/// deadline. Sources that miss the deadline, fail to load, or are empty all
/// resolve to the placeholder. Returns the number of placeholder
/// substitutions.
pub fn resolve_images_in(
    layout: &mut PageLayout,
    loader: &ResourceLoader,
    timeout: Duration,
) -> usize {
    let deadline = Instant::now() + timeout;
    let sources: Vec<String> = layout
        .image_slots()
        .iter()
        .filter(|slot| slot.resolved.is_none())
        .map(|slot| slot.source.clone())
        .collect();
    let resolved = loader.load_all(&sources, deadline);

    let mut placeholders = 0;
    for slot in layout.image_slots_mut() {
        if slot.resolved.is_some() {
            continue;
        }
        let loaded = match resolved.get(slot.source.trim()) {
            Some(loaded) => loaded.clone(),
            None => loader.placeholder(),
        };
        if loaded.is_placeholder() {
            placeholders += 1;
        }
        slot.resolved = Some(loaded);
    }
    placeholders
}

/// Last-resort scan before capture: forces zero image-slot extents to 1 so
/// no zero-dimension pattern source can be constructed. Returns the number
/// of clamps applied.
pub fn clamp_zero_extents(layout: &mut PageLayout) -> usize {
    let mut clamps = 0;
    for slot in layout.image_slots_mut() {
        if slot.width == 0 {
            slot.width = 1;
            clamps += 1;
        }
        if slot.height == 0 {
            slot.height = 1;
            clamps += 1;
        }
    }
    clamps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{Block, Cell, ImageSlot, TableBlock};
    use crate::resource::tests::{tiny_png, MapFetcher};
    use std::collections::HashMap;
    use std::sync::Arc;

    #[test]
    fn surface_ready_rejects_zero_dimensions() {
        assert!(!surface_ready(0, 100));
        assert!(!surface_ready(100, 0));
        assert!(!surface_ready(0, 0));
        assert!(surface_ready(1, 1));
        assert!(surface_ready(794, 1123));
    }

    #[test]
    fn surface_ready_min_applies_thresholds() {
        assert!(surface_ready_min(200, 150, 200, 150));
        assert!(!surface_ready_min(199, 150, 200, 150));
        // A zero minimum still means "at least one pixel".
        assert!(!surface_ready_min(0, 5, 0, 0));
    }

    #[test]
    fn pattern_requires_a_ready_source() {
        assert!(safe_create_pattern(
            None,
            SpreadMode::Pad,
            FilterQuality::Bilinear,
            1.0,
            Transform::identity(),
        )
        .is_none());

        let pixmap = Pixmap::new(4, 4).unwrap();
        let shader = safe_create_pattern(
            Some(&pixmap),
            SpreadMode::Pad,
            FilterQuality::Bilinear,
            1.0,
            Transform::identity(),
        );
        assert!(matches!(shader, Some(Shader::Pattern(_))));
    }

    #[test]
    fn pattern_or_fill_falls_back_to_solid() {
        let shader = pattern_or_fill(
            None,
            SpreadMode::Pad,
            FilterQuality::Bilinear,
            1.0,
            Transform::identity(),
            Color::rgb(1.0, 0.0, 0.0),
        );
        assert!(matches!(shader, Shader::SolidColor(_)));
    }

    #[test]
    fn settle_measures_at_least_once() {
        let fonts = FontRegistry::new();
        let mut layout = PageLayout::new("p");
        layout.push(Block::Spacer(12.0));
        settle(&mut layout, &fonts, 0);
        assert_eq!(layout.placed.len(), 1);
    }

    fn loader_with(entries: HashMap<String, Vec<u8>>) -> ResourceLoader {
        ResourceLoader::new(Arc::new(MapFetcher::new(entries)), Arc::new(FontRegistry::new()))
    }

    #[test]
    fn resolve_fills_every_slot_and_counts_placeholders() {
        let mut entries = HashMap::new();
        entries.insert("ok.png".to_string(), tiny_png(2, 2, [0, 0, 255, 255]));
        let loader = loader_with(entries);

        let mut layout = PageLayout::new("p");
        layout.push(Block::Image(ImageSlot::new("ok.png", 50, 50)));
        layout.push(Block::Image(ImageSlot::new("", 50, 50)));
        let mut table = TableBlock::new(vec![1.0], Vec::new());
        table.push_row(vec![Cell::Image(ImageSlot::new("missing.png", 40, 40))]);
        layout.push(Block::Table(table));

        let placeholders =
            resolve_images_in(&mut layout, &loader, Duration::from_secs(15));
        assert_eq!(placeholders, 2);
        let slots = layout.image_slots();
        assert!(slots.iter().all(|slot| slot.resolved.is_some()));
        assert!(!slots[0].resolved.as_ref().unwrap().is_placeholder());
        assert!(slots[1].resolved.as_ref().unwrap().is_placeholder());
        assert!(slots[2].resolved.as_ref().unwrap().is_placeholder());
    }

    #[test]
    fn resolve_skips_already_resolved_slots() {
        let mut entries = HashMap::new();
        entries.insert("ok.png".to_string(), tiny_png(2, 2, [0, 255, 0, 255]));
        let loader = loader_with(entries);

        let mut layout = PageLayout::new("p");
        layout.push(Block::Image(ImageSlot::new("ok.png", 50, 50)));
        resolve_images_in(&mut layout, &loader, Duration::from_secs(15));
        let first = layout.image_slots()[0].resolved.clone().unwrap();

        resolve_images_in(&mut layout, &loader, Duration::from_secs(15));
        let second = layout.image_slots()[0].resolved.clone().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn expired_deadline_degrades_to_placeholders() {
        let mut entries = HashMap::new();
        entries.insert("ok.png".to_string(), tiny_png(2, 2, [0, 0, 255, 255]));
        let loader = loader_with(entries);

        let mut layout = PageLayout::new("p");
        layout.push(Block::Image(ImageSlot::new("ok.png", 50, 50)));
        let placeholders = resolve_images_in(&mut layout, &loader, Duration::ZERO);
        assert_eq!(placeholders, 1);
        assert!(layout.image_slots()[0].resolved.as_ref().unwrap().is_placeholder());
    }

    #[test]
    fn clamp_restores_minimum_extents() {
        let mut layout = PageLayout::new("p");
        layout.push(Block::Image(ImageSlot::new("a.png", 0, 50)));
        layout.push(Block::Image(ImageSlot::new("b.png", 0, 0)));
        let clamps = clamp_zero_extents(&mut layout);
        assert_eq!(clamps, 3);
        let slots = layout.image_slots();
        assert_eq!((slots[0].width, slots[0].height), (1, 50));
        assert_eq!((slots[1].width, slots[1].height), (1, 1));
        assert_eq!(clamp_zero_extents(&mut layout), 0);
    }

    #[test]
    fn image_ready_accepts_any_allocated_pixmap() {
        let pixmap = Pixmap::new(1, 1).unwrap();
        assert!(image_ready(&pixmap));
    }
}
