//! Product and report records consumed by the engine. These arrive from
//! the caller fully formed; the crate never stores or mutates them.

use sha2::{Digest, Sha256};

use crate::element::{EditSet, ElementKind};

/// One customized product to render and report on.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub description: String,
    pub base_image_url: Option<String>,
    pub images: Vec<String>,
    pub edit_set: Option<EditSet>,
    /// Baked snapshot captured by the editor at save time (data URL or
    /// fetchable URL). When present it is authoritative and used verbatim;
    /// the edit set is only consulted when it is absent.
    pub edited_image: Option<String>,
}

impl Product {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn has_baked_snapshot(&self) -> bool {
        self.edited_image
            .as_deref()
            .map(|s| !s.trim().is_empty())
            .unwrap_or(false)
    }

    pub fn element_count(&self) -> usize {
        self.edit_set
            .as_ref()
            .map(|edit_set| edit_set.elements.len())
            .unwrap_or(0)
    }
}

/// Report header metadata. `date` arrives preformatted by the caller.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReportMeta {
    pub project_name: String,
    pub customer_name: String,
    pub customer_contact: String,
    pub date: String,
    pub config_number: Option<String>,
}

impl ReportMeta {
    /// The configuration number printed on the report: the caller-supplied
    /// one, or a deterministic serial derived from the product set.
    pub fn resolved_config_number(&self, products: &[Product]) -> String {
        match &self.config_number {
            Some(number) if !number.trim().is_empty() => number.clone(),
            _ => config_number(products),
        }
    }
}

/// Deterministic `CFG-XXXXXXXXXX` serial over product ids and edit
/// fingerprints. Identical inputs always map to the same serial.
pub fn config_number(products: &[Product]) -> String {
    let mut hasher = Sha256::new();
    for product in products {
        hasher.update(product.id.as_bytes());
        hasher.update([0u8]);
        if let Some(baked) = &product.edited_image {
            hasher.update(baked.as_bytes());
            hasher.update([0u8]);
        }
        if let Some(edit_set) = &product.edit_set {
            hash_edit_set(&mut hasher, edit_set);
        }
    }
    let digest = hasher.finalize();
    let mut serial = String::with_capacity(4 + 10);
    serial.push_str("CFG-");
    for b in digest.iter().take(5) {
        use std::fmt::Write;
        let _ = write!(&mut serial, "{:02X}", b);
    }
    serial
}

fn hash_edit_set(hasher: &mut Sha256, edit_set: &EditSet) {
    for element in &edit_set.elements {
        hasher.update(element.id.as_bytes());
        hasher.update(element.kind.tag().as_bytes());
        for value in [
            element.x,
            element.y,
            element.width,
            element.height,
            element.rotation,
        ] {
            hasher.update(milli(value).to_le_bytes());
        }
        match &element.kind {
            ElementKind::Text(span) | ElementKind::Icon(span) | ElementKind::Sticker(span) => {
                hasher.update(span.content.as_bytes());
            }
            ElementKind::Image(image) => hasher.update(image.src.as_bytes()),
            ElementKind::Arrow(points) | ElementKind::Pen(points) | ElementKind::Path(points) => {
                for (x, y) in points.polyline() {
                    hasher.update(milli(x).to_le_bytes());
                    hasher.update(milli(y).to_le_bytes());
                }
            }
            ElementKind::Rectangle | ElementKind::Circle | ElementKind::Line => {}
        }
        hasher.update([0u8]);
    }
    for (key, value) in &edit_set.configuration {
        hasher.update(key.as_bytes());
        hasher.update([1u8]);
        hasher.update(value.as_bytes());
        hasher.update([0u8]);
    }
}

fn milli(value: f32) -> i64 {
    if !value.is_finite() {
        return 0;
    }
    (value as f64 * 1000.0).round() as i64
}
