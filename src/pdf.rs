//! Final artifact assembly with lopdf: one output page per captured page,
//! each holding its JPEG as a DCTDecode image XObject painted by a short
//! `cm` / `Do` content stream at the computed placement.

use std::time::{SystemTime, UNIX_EPOCH};

use lopdf::{dictionary, Document, Object, ObjectId, Stream};

use crate::capture::CapturedPage;
use crate::error::ProofsheetError;
use crate::types::Size;

pub struct PdfBuilder {
    doc: Document,
    pages_id: ObjectId,
    page_ids: Vec<ObjectId>,
    page_size: Size,
}

impl PdfBuilder {
    pub fn new(page_size: Size) -> Self {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        Self {
            doc,
            pages_id,
            page_ids: Vec::new(),
            page_size,
        }
    }

    pub fn page_count(&self) -> usize {
        self.page_ids.len()
    }

    /// Appends one captured page. The JPEG payload is embedded as-is; the
    /// placement rect is in points with the origin at the top-left.
    pub fn append_page(&mut self, page: &CapturedPage) {
        let index = self.page_ids.len() + 1;
        let image = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => page.px_width as i64,
                "Height" => page.px_height as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            page.jpeg.clone(),
        );
        let image_id = self.doc.add_object(image);
        let name = format!("Im{index}");

        let w = page.placement.width.to_f32();
        let h = page.placement.height.to_f32();
        let x = page.placement.x.to_f32();
        // PDF space is y-up; the placement rect is top-down.
        let y = self.page_size.height.to_f32() - page.placement.y.to_f32() - h;
        let ops = format!("q {w} 0 0 {h} {x} {y} cm /{name} Do Q\n");
        let content_id = self
            .doc
            .add_object(Stream::new(dictionary! {}, ops.into_bytes()));

        let resources = dictionary! {
            "XObject" => Object::Dictionary(dictionary! {
                name => Object::Reference(image_id),
            }),
        };
        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => Object::Reference(self.pages_id),
            "MediaBox" => vec![
                0.into(),
                0.into(),
                self.page_size.width.to_f32().into(),
                self.page_size.height.to_f32().into(),
            ],
            "Resources" => Object::Dictionary(resources),
            "Contents" => Object::Reference(content_id),
        });
        self.page_ids.push(page_id);
    }

    pub fn finish(mut self) -> Result<Vec<u8>, ProofsheetError> {
        let kids: Vec<Object> = self
            .page_ids
            .iter()
            .map(|id| Object::Reference(*id))
            .collect();
        let count = kids.len() as i64;
        self.doc.objects.insert(
            self.pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );
        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => Object::Reference(self.pages_id),
        });
        self.doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        self.doc
            .save_to(&mut bytes)
            .map_err(|e| ProofsheetError::Pdf(e.to_string()))?;
        Ok(bytes)
    }
}

/// `<prefix>_<yyyymmddHHMMSS>.pdf`, UTC. The prefix is reduced to filename
/// safe characters; an empty prefix falls back to `proof_sheet`.
pub fn suggested_filename(prefix: &str, at: SystemTime) -> String {
    let secs = at
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    let days = secs.div_euclid(86_400);
    let tod = secs.rem_euclid(86_400);
    let (year, month, day) = civil_from_days(days);
    let (hour, minute, second) = (tod / 3600, (tod % 3600) / 60, tod % 60);
    format!(
        "{}_{year:04}{month:02}{day:02}{hour:02}{minute:02}{second:02}.pdf",
        sanitize_prefix(prefix)
    )
}

fn sanitize_prefix(prefix: &str) -> String {
    let cleaned: String = prefix
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "proof_sheet".to_string()
    } else {
        cleaned
    }
}

// Gregorian date from days since 1970-01-01 (proleptic, era-based).
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let year = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if month <= 2 { year + 1 } else { year }, month, day)
}
