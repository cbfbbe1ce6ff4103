use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::error::ProofsheetError;
use crate::types::Pt;

/// Faces registered for text rendering and layout measurement. Resolution
/// is by normalized family name with nearest-weight selection; an unknown
/// family (including the generic "sans-serif") falls back to whatever is
/// registered. With nothing registered, measurement degrades to a flat
/// 0.5 em advance per character so layout stays deterministic and raster
/// text is silently skipped.
#[derive(Debug, Default)]
pub struct FontRegistry {
    faces: Vec<RegisteredFace>,
    families: HashMap<String, Vec<usize>>,
}

#[derive(Debug)]
pub(crate) struct RegisteredFace {
    pub(crate) family: String,
    pub(crate) weight: u16,
    pub(crate) data: Arc<Vec<u8>>,
}

impl FontRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_dir(&mut self, path: impl AsRef<Path>) {
        let Ok(entries) = fs::read_dir(path.as_ref()) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() {
                self.register_file(path);
            }
        }
    }

    pub fn register_file(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let Some(ext) = path.extension().and_then(|v| v.to_str()) else {
            return;
        };
        let ext = ext.to_ascii_lowercase();
        if ext != "ttf" && ext != "otf" {
            return;
        }
        let Ok(data) = fs::read(path) else {
            return;
        };
        let stem = path.file_stem().and_then(|v| v.to_str());
        let _ = self.register_bytes(data, stem);
    }

    pub fn register_bytes(
        &mut self,
        data: Vec<u8>,
        family_hint: Option<&str>,
    ) -> Result<String, ProofsheetError> {
        let Ok(face) = ttf_parser::Face::parse(&data, 0) else {
            return Err(ProofsheetError::InvalidInput(format!(
                "invalid font data for {}",
                family_hint.unwrap_or("embedded font")
            )));
        };
        let family = face_family(&face)
            .or_else(|| family_hint.map(|s| s.to_string()))
            .unwrap_or_else(|| "EmbeddedFont".to_string());
        let weight = face.weight().to_number();
        let index = self.faces.len();
        self.faces.push(RegisteredFace {
            family: family.clone(),
            weight,
            data: Arc::new(data),
        });
        self.families
            .entry(normalize_name(&family))
            .or_default()
            .push(index);
        Ok(family)
    }

    /// Probes well-known OS font locations and registers the first face
    /// found. Returns whether anything was registered.
    pub fn register_system_fallback(&mut self) -> bool {
        const CANDIDATES: &[&str] = &[
            "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
            "/usr/share/fonts/TTF/DejaVuSans.ttf",
            "/usr/share/fonts/dejavu/DejaVuSans.ttf",
            "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
            "/System/Library/Fonts/Supplemental/Arial.ttf",
            "/Library/Fonts/Arial.ttf",
            "C:\\Windows\\Fonts\\arial.ttf",
        ];
        for candidate in CANDIDATES {
            let path = Path::new(candidate);
            if !path.is_file() {
                continue;
            }
            let Ok(data) = fs::read(path) else {
                continue;
            };
            if self.register_bytes(data, path.file_stem().and_then(|v| v.to_str())).is_ok() {
                return true;
            }
        }
        false
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    pub(crate) fn resolve(&self, family: &str, weight: u16) -> Option<&RegisteredFace> {
        let key = normalize_name(family);
        match self.families.get(&key) {
            Some(indices) => self.nearest_weight(indices, weight),
            // Unknown and generic families resolve against everything.
            None => {
                let all: Vec<usize> = (0..self.faces.len()).collect();
                self.nearest_weight(&all, weight)
            }
        }
    }

    fn nearest_weight(&self, candidates: &[usize], weight: u16) -> Option<&RegisteredFace> {
        candidates
            .iter()
            .filter_map(|&index| self.faces.get(index))
            .min_by_key(|face| (face.weight as i32 - weight as i32).abs())
    }

    /// Shaped text width at the given size. Tiers: rustybuzz shaping, then
    /// per-character ttf-parser advances, then the flat fallback advance.
    pub fn measure_text(&self, family: &str, weight: u16, font_size: Pt, text: &str) -> Pt {
        let Some(face) = self.resolve(family, weight) else {
            return fallback_advance(font_size) * (text.chars().count() as i32);
        };
        shaped_width(&face.data, font_size, text)
            .or_else(|| unshaped_width(&face.data, font_size, text))
            .unwrap_or_else(|| fallback_advance(font_size) * (text.chars().count() as i32))
    }

    pub fn line_height(&self, family: &str, weight: u16, font_size: Pt, fallback: Pt) -> Pt {
        let Some(registered) = self.resolve(family, weight) else {
            return fallback;
        };
        let Ok(face) = ttf_parser::Face::parse(&registered.data, 0) else {
            return fallback;
        };
        let units = face.units_per_em().max(1) as i32;
        let height = face.ascender() as i32 - face.descender() as i32 + face.line_gap() as i32;
        if height <= 0 {
            return fallback;
        }
        font_size.mul_ratio(height, units).max(fallback)
    }
}

/// The advance charged for a character no registered face can shape.
pub(crate) fn fallback_advance(font_size: Pt) -> Pt {
    (font_size * 0.5).max(Pt::from_f32(1.0))
}

fn shaped_width(data: &[u8], font_size: Pt, text: &str) -> Option<Pt> {
    let face = rustybuzz::Face::from_slice(data, 0)?;
    let units = face.units_per_em().max(1) as i64;
    let mut buffer = rustybuzz::UnicodeBuffer::new();
    buffer.push_str(text);
    let glyphs = rustybuzz::shape(&face, &[], buffer);
    if glyphs.glyph_infos().is_empty() && !text.is_empty() {
        return None;
    }
    let mut shaped_units: i64 = 0;
    let mut missing: i32 = 0;
    for (info, pos) in glyphs.glyph_infos().iter().zip(glyphs.glyph_positions()) {
        if info.glyph_id == 0 {
            missing = missing.saturating_add(1);
        } else {
            shaped_units = shaped_units.saturating_add(pos.x_advance as i64);
        }
    }
    let shaped_units = shaped_units.clamp(0, i32::MAX as i64) as i32;
    let mut width = font_size.mul_ratio(shaped_units, units.clamp(1, i32::MAX as i64) as i32);
    if missing > 0 {
        width += fallback_advance(font_size) * missing;
    }
    Some(width)
}

fn unshaped_width(data: &[u8], font_size: Pt, text: &str) -> Option<Pt> {
    let face = ttf_parser::Face::parse(data, 0).ok()?;
    let units = face.units_per_em().max(1) as i32;
    let mut width = Pt::ZERO;
    for ch in text.chars() {
        let advance = face
            .glyph_index(ch)
            .and_then(|gid| face.glyph_hor_advance(gid));
        match advance {
            Some(units_advance) => {
                width += font_size.mul_ratio(units_advance as i32, units);
            }
            None => width += fallback_advance(font_size),
        }
    }
    Some(width)
}

fn face_family(face: &ttf_parser::Face<'_>) -> Option<String> {
    use ttf_parser::name::name_id;
    let mut family = None;
    for entry in face.names() {
        if entry.name_id == name_id::TYPOGRAPHIC_FAMILY || entry.name_id == name_id::FAMILY {
            if let Some(name) = entry.to_string() {
                family.get_or_insert(name);
            }
        }
    }
    family
}

fn normalize_name(name: &str) -> String {
    name.trim()
        .trim_matches('"')
        .trim_matches('\'')
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_registry_measures_with_flat_advance() {
        let registry = FontRegistry::new();
        let width = registry.measure_text("sans-serif", 400, Pt::from_f32(16.0), "abcd");
        assert_eq!(width.to_milli_i64(), 32_000);
    }

    #[test]
    fn fallback_advance_has_a_floor() {
        assert_eq!(fallback_advance(Pt::from_f32(1.0)).to_milli_i64(), 1_000);
        assert_eq!(fallback_advance(Pt::from_f32(16.0)).to_milli_i64(), 8_000);
    }

    #[test]
    fn empty_registry_resolves_nothing() {
        let registry = FontRegistry::new();
        assert!(registry.resolve("sans-serif", 400).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn garbage_bytes_are_rejected() {
        let mut registry = FontRegistry::new();
        let result = registry.register_bytes(vec![0x00, 0x01, 0x02, 0x03], Some("bogus"));
        assert!(result.is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn line_height_falls_back_without_faces() {
        let registry = FontRegistry::new();
        let fallback = Pt::from_f32(19.2);
        assert_eq!(
            registry.line_height("sans-serif", 400, Pt::from_f32(16.0), fallback),
            fallback
        );
    }
}
