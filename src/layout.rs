//! Off-screen page model the composer builds and the capture pipeline
//! rasterizes. A `PageLayout` is a vertical flow of blocks on a fixed
//! printable page; `measure` commits block geometry into `placed` using
//! fixed-point arithmetic so results are identical with or without
//! registered fonts.

use std::sync::Arc;

use crate::font::FontRegistry;
use crate::resource::LoadedImage;
use crate::stage::SurfaceId;
use crate::types::{Color, Gradient, Margins, Pt, Rect};

/// A4 at 96 px/in.
pub const PAGE_WIDTH_PX: u32 = 794;
pub const PAGE_HEIGHT_PX: u32 = 1123;

pub(crate) const LAYOUT_FAMILY: &str = "sans-serif";
pub(crate) const HEADING_FONT_SIZE: f32 = 20.0;
pub(crate) const BODY_FONT_SIZE: f32 = 11.0;
pub(crate) const TABLE_FONT_SIZE: f32 = 10.0;
pub(crate) const LINE_FACTOR: f32 = 1.3;
pub(crate) const BLOCK_GAP: f32 = 6.0;
pub(crate) const CELL_PAD: f32 = 4.0;
pub(crate) const DIVIDER_HEIGHT: f32 = 9.0;
const HEADING_PAD_BELOW: f32 = 4.0;

#[derive(Debug, Clone, PartialEq)]
pub enum Fill {
    Solid(Color),
    Gradient(Gradient),
}

impl Fill {
    /// The color capture sanitization substitutes for this fill.
    pub fn solid_equivalent(&self) -> Color {
        match self {
            Fill::Solid(color) => *color,
            Fill::Gradient(gradient) => gradient.solid_equivalent(),
        }
    }
}

/// An image placed by the layout. `resolved` is populated by the image
/// resolution pass; an unresolved slot rasterizes as its fallback fill.
#[derive(Debug, Clone)]
pub struct ImageSlot {
    pub source: String,
    pub width: u32,
    pub height: u32,
    pub resolved: Option<Arc<LoadedImage>>,
}

impl ImageSlot {
    pub fn new(source: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            source: source.into(),
            width,
            height,
            resolved: None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Cell {
    Text(String),
    Image(ImageSlot),
}

/// Fixed-fraction column table. Fractions are normalized against their sum,
/// so `[2.0, 1.0, 1.0]` gives a half-width first column.
#[derive(Debug, Clone)]
pub struct TableBlock {
    pub fractions: Vec<f32>,
    pub header: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl TableBlock {
    pub fn new(fractions: Vec<f32>, header: Vec<String>) -> Self {
        Self {
            fractions,
            header,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<Cell>) {
        self.rows.push(row);
    }

    pub(crate) fn column_widths(&self, total: Pt) -> Vec<Pt> {
        let sum: f32 = self.fractions.iter().copied().filter(|f| *f > 0.0).sum();
        if sum <= 0.0 || self.fractions.is_empty() {
            let count = self.fractions.len().max(1) as i32;
            return vec![total / count; self.fractions.len().max(1)];
        }
        self.fractions
            .iter()
            .map(|f| total * (f.max(0.0) / sum))
            .collect()
    }

    pub(crate) fn header_height(&self, fonts: &FontRegistry) -> Pt {
        if self.header.is_empty() {
            return Pt::ZERO;
        }
        table_line_height(fonts, 700) + Pt::from_f32(2.0 * CELL_PAD)
    }

    pub(crate) fn row_heights(&self, fonts: &FontRegistry, total: Pt) -> Vec<Pt> {
        let widths = self.column_widths(total);
        let line_h = table_line_height(fonts, 400);
        self.rows
            .iter()
            .map(|row| {
                let mut tallest = line_h;
                for (cell, width) in row.iter().zip(widths.iter()) {
                    let inner = (*width - Pt::from_f32(2.0 * CELL_PAD)).max(Pt::ZERO);
                    let h = match cell {
                        Cell::Text(text) => {
                            let lines =
                                wrap_text(fonts, 400, TABLE_FONT_SIZE, text, inner);
                            line_h * lines.len() as i32
                        }
                        Cell::Image(slot) => Pt::from_f32(slot.height as f32),
                    };
                    tallest = tallest.max(h);
                }
                tallest + Pt::from_f32(2.0 * CELL_PAD)
            })
            .collect()
    }

    fn height(&self, fonts: &FontRegistry, total: Pt) -> Pt {
        let rows: Pt = self.row_heights(fonts, total).into_iter().sum();
        self.header_height(fonts) + rows
    }
}

#[derive(Debug, Clone)]
pub enum Block {
    Heading(String),
    FieldRow { label: String, value: String },
    Text(String),
    Spacer(f32),
    Divider,
    Table(TableBlock),
    Image(ImageSlot),
    /// A live drawing surface embedded in the layout. Never rasterized;
    /// capture sanitization strips these from the clone.
    Surface(SurfaceId),
}

/// Geometry committed by `measure`, indexed back into `blocks`.
#[derive(Debug, Clone, Copy)]
pub struct PlacedBlock {
    pub index: usize,
    pub rect: Rect,
}

#[derive(Debug)]
pub struct PageLayout {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub background: Fill,
    pub margin: Margins,
    pub blocks: Vec<Block>,
    /// Valid after `measure`.
    pub placed: Vec<PlacedBlock>,
}

impl PageLayout {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            width: PAGE_WIDTH_PX,
            height: PAGE_HEIGHT_PX,
            background: Fill::Solid(Color::WHITE),
            margin: Margins::all(28.0),
            blocks: Vec::new(),
            placed: Vec::new(),
        }
    }

    pub fn push(&mut self, block: Block) {
        self.blocks.push(block);
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn content_width(&self) -> Pt {
        (Pt::from_f32(self.width as f32) - self.margin.left - self.margin.right).max(Pt::ZERO)
    }

    /// Commits block geometry into `placed`. Deterministic for a given font
    /// registry; rerunning replaces the previous result.
    pub fn measure(&mut self, fonts: &FontRegistry) {
        let width = self.content_width();
        let gap = Pt::from_f32(BLOCK_GAP);
        let mut cursor = self.margin.top;
        let mut placed = Vec::with_capacity(self.blocks.len());
        for (index, block) in self.blocks.iter().enumerate() {
            let height = block_height(block, fonts, width);
            placed.push(PlacedBlock {
                index,
                rect: Rect::new(self.margin.left, cursor, width, height),
            });
            cursor = cursor + height + gap;
        }
        self.placed = placed;
    }

    /// Bottom edge of the last placed block. Zero before `measure`.
    pub fn content_height(&self) -> Pt {
        self.placed
            .last()
            .map(|p| p.rect.y + p.rect.height)
            .unwrap_or(Pt::ZERO)
    }

    pub fn image_slots(&self) -> Vec<&ImageSlot> {
        let mut slots = Vec::new();
        for block in &self.blocks {
            match block {
                Block::Image(slot) => slots.push(slot),
                Block::Table(table) => {
                    for row in &table.rows {
                        for cell in row {
                            if let Cell::Image(slot) = cell {
                                slots.push(slot);
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        slots
    }

    pub fn image_slots_mut(&mut self) -> Vec<&mut ImageSlot> {
        let mut slots = Vec::new();
        for block in &mut self.blocks {
            match block {
                Block::Image(slot) => slots.push(slot),
                Block::Table(table) => {
                    for row in &mut table.rows {
                        for cell in row {
                            if let Cell::Image(slot) = cell {
                                slots.push(slot);
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        slots
    }

    /// The clone the capture pipeline rasterizes: gradient backgrounds are
    /// reduced to their solid equivalent and live surface blocks are removed.
    /// `placed` is left empty; the caller re-measures the clone.
    pub fn sanitized_for_capture(&self) -> PageLayout {
        let background = Fill::Solid(self.background.solid_equivalent());
        let blocks = self
            .blocks
            .iter()
            .filter(|block| !matches!(block, Block::Surface(_)))
            .cloned()
            .collect();
        PageLayout {
            name: self.name.clone(),
            width: self.width,
            height: self.height,
            background,
            margin: self.margin,
            blocks,
            placed: Vec::new(),
        }
    }
}

fn block_height(block: &Block, fonts: &FontRegistry, width: Pt) -> Pt {
    match block {
        Block::Heading(text) => {
            let line_h = line_height(fonts, 700, HEADING_FONT_SIZE);
            let lines = wrap_text(fonts, 700, HEADING_FONT_SIZE, text, width);
            line_h * lines.len() as i32 + Pt::from_f32(HEADING_PAD_BELOW)
        }
        Block::FieldRow { .. } => line_height(fonts, 400, BODY_FONT_SIZE),
        Block::Text(text) => {
            let line_h = line_height(fonts, 400, BODY_FONT_SIZE);
            let lines = wrap_text(fonts, 400, BODY_FONT_SIZE, text, width);
            line_h * lines.len() as i32
        }
        Block::Spacer(px) => Pt::from_f32(px.max(0.0)),
        Block::Divider => Pt::from_f32(DIVIDER_HEIGHT),
        Block::Table(table) => table.height(fonts, width),
        Block::Image(slot) => Pt::from_f32(slot.height as f32),
        Block::Surface(_) => Pt::ZERO,
    }
}

pub(crate) fn line_height(fonts: &FontRegistry, weight: u16, font_size: f32) -> Pt {
    let size = Pt::from_f32(font_size);
    fonts.line_height(LAYOUT_FAMILY, weight, size, size * LINE_FACTOR)
}

fn table_line_height(fonts: &FontRegistry, weight: u16) -> Pt {
    line_height(fonts, weight, TABLE_FONT_SIZE)
}

/// Greedy word wrap against measured advances. Never breaks inside a word:
/// an overlong word gets its own line. Embedded newlines are respected and
/// blank lines preserved.
pub(crate) fn wrap_text(
    fonts: &FontRegistry,
    weight: u16,
    font_size: f32,
    text: &str,
    max_width: Pt,
) -> Vec<String> {
    let size = Pt::from_f32(font_size);
    let mut lines = Vec::new();
    for raw in text.split('\n') {
        let mut current = String::new();
        for word in raw.split_whitespace() {
            if current.is_empty() {
                current.push_str(word);
                continue;
            }
            let mut candidate = current.clone();
            candidate.push(' ');
            candidate.push_str(word);
            if fonts.measure_text(LAYOUT_FAMILY, weight, size, &candidate) > max_width {
                lines.push(std::mem::take(&mut current));
                current.push_str(word);
            } else {
                current = candidate;
            }
        }
        lines.push(current);
    }
    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GradientStop;

    fn empty_fonts() -> FontRegistry {
        FontRegistry::new()
    }

    #[test]
    fn wrap_breaks_on_measured_width() {
        let fonts = empty_fonts();
        // Flat fallback: 0.5em per char at 10 px = 5 px per char.
        let lines = wrap_text(&fonts, 400, 10.0, "aa bb cc", Pt::from_f32(25.0));
        assert_eq!(lines, vec!["aa bb".to_string(), "cc".to_string()]);
    }

    #[test]
    fn wrap_keeps_overlong_word_whole() {
        let fonts = empty_fonts();
        let lines = wrap_text(&fonts, 400, 10.0, "tiny enormousword", Pt::from_f32(30.0));
        assert_eq!(lines, vec!["tiny".to_string(), "enormousword".to_string()]);
    }

    #[test]
    fn wrap_preserves_blank_lines() {
        let fonts = empty_fonts();
        let lines = wrap_text(&fonts, 400, 10.0, "a\n\nb", Pt::from_f32(100.0));
        assert_eq!(lines.len(), 3);
        assert!(lines[1].is_empty());
    }

    #[test]
    fn measure_stacks_blocks_with_gap() {
        let fonts = empty_fonts();
        let mut layout = PageLayout::new("p");
        layout.push(Block::Spacer(10.0));
        layout.push(Block::Spacer(20.0));
        layout.measure(&fonts);

        assert_eq!(layout.placed.len(), 2);
        assert_eq!(layout.placed[0].rect.y, layout.margin.top);
        assert_eq!(layout.placed[0].rect.height, Pt::from_f32(10.0));
        let expected_y = layout.margin.top + Pt::from_f32(10.0) + Pt::from_f32(BLOCK_GAP);
        assert_eq!(layout.placed[1].rect.y, expected_y);
        assert_eq!(layout.content_height(), expected_y + Pt::from_f32(20.0));
    }

    #[test]
    fn measure_is_stable_across_passes() {
        let fonts = empty_fonts();
        let mut layout = PageLayout::new("p");
        layout.push(Block::Heading("Order proof".to_string()));
        layout.push(Block::Text("several words that will wrap".to_string()));
        layout.measure(&fonts);
        let first: Vec<Rect> = layout.placed.iter().map(|p| p.rect).collect();
        layout.measure(&fonts);
        let second: Vec<Rect> = layout.placed.iter().map(|p| p.rect).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn image_slots_cover_blocks_and_table_cells() {
        let mut layout = PageLayout::new("p");
        layout.push(Block::Image(ImageSlot::new("a.png", 200, 150)));
        let mut table = TableBlock::new(vec![1.0, 1.0], vec!["x".into(), "y".into()]);
        table.push_row(vec![
            Cell::Text("t".to_string()),
            Cell::Image(ImageSlot::new("b.png", 40, 40)),
        ]);
        layout.push(Block::Table(table));

        let sources: Vec<&str> = layout
            .image_slots()
            .iter()
            .map(|s| s.source.as_str())
            .collect();
        assert_eq!(sources, vec!["a.png", "b.png"]);
        assert_eq!(layout.image_slots_mut().len(), 2);
    }

    #[test]
    fn table_row_height_tracks_tallest_cell() {
        let fonts = empty_fonts();
        let mut table = TableBlock::new(vec![1.0, 1.0], Vec::new());
        table.push_row(vec![
            Cell::Text("short".to_string()),
            Cell::Image(ImageSlot::new("i.png", 50, 60)),
        ]);
        let heights = table.row_heights(&fonts, Pt::from_f32(400.0));
        assert_eq!(heights.len(), 1);
        assert_eq!(heights[0], Pt::from_f32(60.0 + 2.0 * CELL_PAD));
    }

    #[test]
    fn column_widths_normalize_fractions() {
        let table = TableBlock::new(vec![2.0, 1.0, 1.0], Vec::new());
        let widths = table.column_widths(Pt::from_f32(400.0));
        assert_eq!(widths[0], Pt::from_f32(200.0));
        assert_eq!(widths[1], Pt::from_f32(100.0));
        assert_eq!(widths[2], Pt::from_f32(100.0));
    }

    #[test]
    fn sanitize_solidifies_gradient_and_strips_surfaces() {
        let mut layout = PageLayout::new("p");
        layout.background = Fill::Gradient(Gradient::vertical(
            100.0,
            vec![
                GradientStop {
                    offset: 0.0,
                    color: Color::rgb(1.0, 0.0, 0.0),
                },
                GradientStop {
                    offset: 1.0,
                    color: Color::rgb(0.0, 0.0, 1.0),
                },
            ],
        ));
        layout.push(Block::Surface(SurfaceId(7)));
        layout.push(Block::Text("kept".to_string()));
        layout.measure(&FontRegistry::new());

        let clone = layout.sanitized_for_capture();
        assert_eq!(clone.background, Fill::Solid(Color::rgb(1.0, 0.0, 0.0)));
        assert_eq!(clone.blocks.len(), 1);
        assert!(matches!(clone.blocks[0], Block::Text(_)));
        assert!(clone.placed.is_empty());
        // Source layout is untouched.
        assert_eq!(layout.blocks.len(), 2);
    }
}
