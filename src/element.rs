use std::collections::BTreeMap;

use crate::types::Color;

/// Width of the logical canvas space all element geometry is expressed in.
pub const LOGICAL_WIDTH: f32 = 800.0;
/// Height of the logical canvas space.
pub const LOGICAL_HEIGHT: f32 = 600.0;

pub const DEFAULT_ELEMENT_WIDTH: f32 = 100.0;
pub const DEFAULT_ELEMENT_HEIGHT: f32 = 50.0;
pub const DEFAULT_FONT_SIZE: f32 = 16.0;

/// One overlay primitive placed on the logical 800x600 canvas.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub id: String,
    pub kind: ElementKind,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Degrees, clockwise, pivoting at the element's own (x, y) corner.
    pub rotation: f32,
    pub fill: Option<Color>,
    pub stroke: Option<Color>,
    pub stroke_width: f32,
}

impl Element {
    pub fn new(id: impl Into<String>, kind: ElementKind) -> Self {
        Self {
            id: id.into(),
            kind,
            x: 0.0,
            y: 0.0,
            width: DEFAULT_ELEMENT_WIDTH,
            height: DEFAULT_ELEMENT_HEIGHT,
            rotation: 0.0,
            fill: None,
            stroke: None,
            stroke_width: 1.0,
        }
    }

    pub fn at(mut self, x: f32, y: f32) -> Self {
        self.x = x;
        self.y = y;
        self
    }

    pub fn sized(mut self, width: f32, height: f32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Shape fill color; defaults to black like an untouched canvas fill.
    pub fn resolved_fill(&self) -> Color {
        self.fill.unwrap_or(Color::BLACK)
    }

    /// Stroke color with the fallback chain: stroke, then fill, then a
    /// visible red so a mis-styled element is never invisible.
    pub fn resolved_stroke(&self) -> Color {
        self.stroke
            .or(self.fill)
            .unwrap_or(Color::from_rgb8(0xCC, 0x00, 0x00))
    }

    /// Stroke width is never allowed below 1 logical unit.
    pub fn resolved_stroke_width(&self) -> f32 {
        self.stroke_width.max(1.0)
    }

    /// Text color fallback chain: span color, then element fill, then black.
    pub fn resolved_text_color(&self) -> Color {
        let span_color = match &self.kind {
            ElementKind::Text(span) | ElementKind::Icon(span) | ElementKind::Sticker(span) => {
                span.color
            }
            _ => None,
        };
        span_color.or(self.fill).unwrap_or(Color::BLACK)
    }
}

/// Closed set of element kinds. Adding a kind is a source-level change;
/// every renderer match is exhaustive on purpose.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementKind {
    Text(TextSpan),
    Icon(TextSpan),
    Sticker(TextSpan),
    Image(ImageRef),
    Rectangle,
    Circle,
    Line,
    Arrow(PointData),
    Pen(PointData),
    Path(PointData),
}

impl ElementKind {
    pub fn tag(&self) -> &'static str {
        match self {
            ElementKind::Text(_) => "text",
            ElementKind::Icon(_) => "icon",
            ElementKind::Sticker(_) => "sticker",
            ElementKind::Image(_) => "image",
            ElementKind::Rectangle => "rectangle",
            ElementKind::Circle => "circle",
            ElementKind::Line => "line",
            ElementKind::Arrow(_) => "arrow",
            ElementKind::Pen(_) => "pen",
            ElementKind::Path(_) => "path",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextSpan {
    pub content: String,
    pub font_size: f32,
    pub font_family: String,
    pub font_weight: u16,
    pub color: Option<Color>,
}

impl TextSpan {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            font_size: DEFAULT_FONT_SIZE,
            font_family: "sans-serif".to_string(),
            font_weight: 400,
            color: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageRef {
    pub src: String,
}

impl ImageRef {
    pub fn new(src: impl Into<String>) -> Self {
        Self { src: src.into() }
    }
}

/// Vertex payload for arrow, pen and path elements. Either a flat
/// coordinate array (x0 y0 x1 y1 ...) or a command string in a minimal
/// grammar recognizing only `M x y` and `L x y`.
#[derive(Debug, Clone, PartialEq)]
pub enum PointData {
    Flat(Vec<f32>),
    Commands(String),
}

impl PointData {
    /// Resolves either form to an ordered vertex list. A flat array with
    /// fewer than 4 numbers resolves to an empty polyline; unrecognized
    /// command tokens are skipped.
    pub fn polyline(&self) -> Vec<(f32, f32)> {
        match self {
            PointData::Flat(values) => {
                if values.len() < 4 {
                    return Vec::new();
                }
                values
                    .chunks_exact(2)
                    .map(|pair| (pair[0], pair[1]))
                    .collect()
            }
            PointData::Commands(text) => parse_commands(text),
        }
    }
}

fn parse_commands(text: &str) -> Vec<(f32, f32)> {
    let mut points = Vec::new();
    let mut tokens = text
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .peekable();
    while let Some(token) = tokens.next() {
        if !token.eq_ignore_ascii_case("m") && !token.eq_ignore_ascii_case("l") {
            continue;
        }
        let Some(x) = tokens.peek().and_then(|t| t.parse::<f32>().ok()) else {
            continue;
        };
        tokens.next();
        let Some(y) = tokens.peek().and_then(|t| t.parse::<f32>().ok()) else {
            continue;
        };
        tokens.next();
        points.push((x, y));
    }
    points
}

/// An ordered overlay: index order is paint order, first element at the
/// bottom. May be empty.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EditSet {
    pub elements: Vec<Element>,
    pub configuration: BTreeMap<String, String>,
}

impl EditSet {
    pub fn new(elements: Vec<Element>) -> Self {
        Self {
            elements,
            configuration: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Distinct, non-empty image sources referenced by image elements, in
    /// first-appearance order.
    pub fn image_sources(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for element in &self.elements {
            if let ElementKind::Image(image) = &element.kind {
                let src = image.src.trim();
                if src.is_empty() || seen.iter().any(|s: &String| s == src) {
                    continue;
                }
                seen.push(src.to_string());
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_element_gets_default_frame() {
        let element = Element::new("e1", ElementKind::Rectangle);
        assert_eq!(element.width, 100.0);
        assert_eq!(element.height, 50.0);
        assert_eq!(element.rotation, 0.0);
    }

    #[test]
    fn flat_points_resolve_in_pairs() {
        let data = PointData::Flat(vec![10.0, 20.0, 30.0, 40.0, 50.0, 60.0]);
        assert_eq!(
            data.polyline(),
            vec![(10.0, 20.0), (30.0, 40.0), (50.0, 60.0)]
        );
    }

    #[test]
    fn short_flat_array_resolves_empty() {
        assert!(PointData::Flat(vec![10.0, 20.0]).polyline().is_empty());
        assert!(PointData::Flat(vec![10.0, 20.0, 30.0]).polyline().is_empty());
    }

    #[test]
    fn command_grammar_reads_moves_and_lines() {
        let data = PointData::Commands("M 10 20 L 30 40 L 50 60".to_string());
        assert_eq!(
            data.polyline(),
            vec![(10.0, 20.0), (30.0, 40.0), (50.0, 60.0)]
        );
    }

    #[test]
    fn command_grammar_skips_unknown_tokens() {
        let data = PointData::Commands("M 0 0 C 1 2 3 4 5 6 L 10 10 Z".to_string());
        assert_eq!(data.polyline(), vec![(0.0, 0.0), (10.0, 10.0)]);
    }

    #[test]
    fn command_grammar_tolerates_commas() {
        let data = PointData::Commands("M 5,5 L 7,9".to_string());
        assert_eq!(data.polyline(), vec![(5.0, 5.0), (7.0, 9.0)]);
    }

    #[test]
    fn stroke_resolution_falls_back_to_fill_then_red() {
        let mut element = Element::new("e1", ElementKind::Line);
        assert_eq!(element.resolved_stroke(), Color::from_rgb8(0xCC, 0x00, 0x00));
        element.fill = Some(Color::rgb(0.0, 1.0, 0.0));
        assert_eq!(element.resolved_stroke(), Color::rgb(0.0, 1.0, 0.0));
        element.stroke = Some(Color::rgb(0.0, 0.0, 1.0));
        assert_eq!(element.resolved_stroke(), Color::rgb(0.0, 0.0, 1.0));
    }

    #[test]
    fn stroke_width_never_drops_below_one() {
        let mut element = Element::new("e1", ElementKind::Line);
        element.stroke_width = 0.25;
        assert_eq!(element.resolved_stroke_width(), 1.0);
        element.stroke_width = 4.0;
        assert_eq!(element.resolved_stroke_width(), 4.0);
    }

    #[test]
    fn text_color_resolution_prefers_span_color() {
        let mut span = TextSpan::new("hi");
        span.color = Some(Color::rgb(1.0, 0.0, 0.0));
        let mut element = Element::new("t1", ElementKind::Text(span));
        element.fill = Some(Color::rgb(0.0, 1.0, 0.0));
        assert_eq!(element.resolved_text_color(), Color::rgb(1.0, 0.0, 0.0));

        let plain = Element::new("t2", ElementKind::Text(TextSpan::new("hi")));
        assert_eq!(plain.resolved_text_color(), Color::BLACK);
    }
}
