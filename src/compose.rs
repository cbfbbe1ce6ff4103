//! Document composition: products plus report metadata to page layouts.
//! The document is always exactly two pages, a manifest page with one row
//! per product and a tabular summary page. Product thumbnails are rendered
//! up front, in parallel, so the capture pass never waits on them.

use std::collections::BTreeMap;
use std::sync::Arc;

use rayon::prelude::*;

use crate::catalog::{Product, ReportMeta};
use crate::error::ProofsheetError;
use crate::layout::{Block, Cell, ImageSlot, PageLayout, TableBlock};
use crate::resource::{ImageOrigin, LoadedImage};
use crate::snapshot::{self, RenderContext};

#[derive(Debug)]
pub(crate) struct ComposedDocument {
    pub(crate) pages: Vec<PageLayout>,
    pub(crate) thumbnails_rendered: usize,
    pub(crate) degraded_thumbnails: usize,
}

pub(crate) fn compose(
    products: &[Product],
    meta: &ReportMeta,
    thumb_width: u32,
    thumb_height: u32,
    ctx: &RenderContext<'_>,
) -> Result<ComposedDocument, ProofsheetError> {
    if products.is_empty() {
        return Err(ProofsheetError::InvalidInput(
            "no products to compose".to_string(),
        ));
    }

    let thumbnails = render_thumbnails(products, thumb_width, thumb_height, ctx)?;
    let degraded_thumbnails = thumbnails.iter().filter(|t| t.is_placeholder()).count();

    let pages = vec![
        manifest_page(products, meta, &thumbnails, thumb_width, thumb_height),
        summary_page(products, &thumbnails),
    ];
    Ok(ComposedDocument {
        pages,
        thumbnails_rendered: thumbnails.len(),
        degraded_thumbnails,
    })
}

/// Pre-renders one thumbnail per product, in product order. A degraded
/// render is kept as-is; its origin marks it for the counters.
fn render_thumbnails(
    products: &[Product],
    width: u32,
    height: u32,
    ctx: &RenderContext<'_>,
) -> Result<Vec<Arc<LoadedImage>>, ProofsheetError> {
    products
        .par_iter()
        .map(|product| {
            let (pixmap, degraded) =
                snapshot::render_product_pixmap(product, width, height, ctx)?;
            let origin = if degraded {
                ImageOrigin::Placeholder
            } else {
                ImageOrigin::Fetched
            };
            Ok(Arc::new(LoadedImage { pixmap, origin }))
        })
        .collect()
}

fn manifest_page(
    products: &[Product],
    meta: &ReportMeta,
    thumbnails: &[Arc<LoadedImage>],
    thumb_width: u32,
    thumb_height: u32,
) -> PageLayout {
    let mut page = PageLayout::new("manifest");

    let title = match meta.project_name.trim() {
        "" => "Order Proof Sheet".to_string(),
        name => name.to_string(),
    };
    page.push(Block::Heading(title));
    push_field(&mut page, "Customer", &meta.customer_name);
    push_field(&mut page, "Contact", &meta.customer_contact);
    push_field(&mut page, "Date", &meta.date);
    page.push(Block::FieldRow {
        label: "Configuration".to_string(),
        value: meta.resolved_config_number(products),
    });
    page.push(Block::Divider);
    page.push(Block::Spacer(6.0));

    let mut table = TableBlock::new(vec![0.32, 0.68], Vec::new());
    for (product, thumbnail) in products.iter().zip(thumbnails.iter()) {
        let mut slot = ImageSlot::new(
            format!("thumbnail:{}", product.id),
            thumb_width,
            thumb_height,
        );
        slot.resolved = Some(thumbnail.clone());
        table.push_row(vec![Cell::Image(slot), Cell::Text(product_text(product))]);
    }
    page.push(Block::Table(table));
    page
}

fn summary_page(products: &[Product], thumbnails: &[Arc<LoadedImage>]) -> PageLayout {
    let mut page = PageLayout::new("summary");
    page.push(Block::Heading("Product Summary".to_string()));
    page.push(Block::Divider);
    page.push(Block::Spacer(4.0));

    let mut table = TableBlock::new(
        vec![0.06, 0.18, 0.34, 0.14, 0.12, 0.16],
        vec![
            "#".to_string(),
            "Product".to_string(),
            "Description".to_string(),
            "Base image".to_string(),
            "Elements".to_string(),
            "Snapshot".to_string(),
        ],
    );
    for (index, (product, thumbnail)) in products.iter().zip(thumbnails.iter()).enumerate() {
        table.push_row(vec![
            Cell::Text((index + 1).to_string()),
            Cell::Text(product.name.clone()),
            Cell::Text(product.description.trim().to_string()),
            Cell::Text(base_state(product)),
            Cell::Text(product.element_count().to_string()),
            Cell::Text(snapshot_state(product, thumbnail).to_string()),
        ]);
    }
    page.push(Block::Table(table));
    page
}

fn push_field(page: &mut PageLayout, label: &str, value: &str) {
    if value.trim().is_empty() {
        return;
    }
    page.push(Block::FieldRow {
        label: label.to_string(),
        value: value.trim().to_string(),
    });
}

fn product_text(product: &Product) -> String {
    let mut text = product.name.clone();
    let description = product.description.trim();
    if !description.is_empty() {
        text.push('\n');
        text.push_str(description);
    }
    text.push('\n');
    text.push_str(&customization_summary(product));
    text
}

/// Short human summary of the edit set, e.g. "3 customizations: 2 text,
/// 1 image". Counts are grouped by element kind, kinds sorted by name.
fn customization_summary(product: &Product) -> String {
    let elements = product
        .edit_set
        .as_ref()
        .map(|edit_set| edit_set.elements.as_slice())
        .unwrap_or(&[]);
    if elements.is_empty() {
        return "No customizations".to_string();
    }
    let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
    for element in elements {
        *counts.entry(element.kind.tag()).or_default() += 1;
    }
    let parts: Vec<String> = counts
        .iter()
        .map(|(tag, count)| format!("{count} {tag}"))
        .collect();
    let total = elements.len();
    let plural = if total == 1 { "" } else { "s" };
    format!("{total} customization{plural}: {}", parts.join(", "))
}

/// Base image column text; alternate gallery views are counted alongside.
fn base_state(product: &Product) -> String {
    let linked = matches!(
        product.base_image_url.as_deref().map(str::trim),
        Some(src) if !src.is_empty()
    );
    let views = product
        .images
        .iter()
        .filter(|src| !src.trim().is_empty())
        .count();
    match (linked, views) {
        (true, 0) => "linked".to_string(),
        (true, n) => format!("linked (+{n} views)"),
        (false, 0) => "none".to_string(),
        (false, n) => format!("none (+{n} views)"),
    }
}

fn snapshot_state(product: &Product, thumbnail: &LoadedImage) -> &'static str {
    if thumbnail.is_placeholder() {
        "placeholder"
    } else if product.has_baked_snapshot() {
        "baked"
    } else {
        "rendered"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{EditSet, Element, ElementKind, TextSpan};
    use crate::font::FontRegistry;
    use crate::resource::tests::{tiny_png, MapFetcher};
    use crate::resource::ResourceLoader;
    use std::collections::HashMap;
    use std::time::Duration;

    struct Fixture {
        loader: ResourceLoader,
        fonts: Arc<FontRegistry>,
    }

    impl Fixture {
        fn new(entries: HashMap<String, Vec<u8>>) -> Self {
            let fonts = Arc::new(FontRegistry::new());
            Self {
                loader: ResourceLoader::new(Arc::new(MapFetcher::new(entries)), fonts.clone()),
                fonts,
            }
        }

        fn ctx(&self) -> RenderContext<'_> {
            RenderContext {
                loader: &self.loader,
                fonts: &self.fonts,
                jpeg_quality: 85,
                image_wait: Duration::from_secs(15),
            }
        }
    }

    fn first_table(page: &PageLayout) -> &TableBlock {
        page.blocks
            .iter()
            .find_map(|block| match block {
                Block::Table(table) => Some(table),
                _ => None,
            })
            .expect("page has a table")
    }

    fn field_value<'a>(page: &'a PageLayout, wanted: &str) -> Option<&'a str> {
        page.blocks.iter().find_map(|block| match block {
            Block::FieldRow { label, value } if label == wanted => Some(value.as_str()),
            _ => None,
        })
    }

    fn products(count: usize) -> Vec<Product> {
        (0..count)
            .map(|i| Product::new(format!("p{i}"), format!("Product {i}")))
            .collect()
    }

    #[test]
    fn always_composes_exactly_two_pages() {
        let fixture = Fixture::new(HashMap::new());
        for count in [1, 3, 12] {
            let doc = compose(&products(count), &ReportMeta::default(), 200, 150, &fixture.ctx())
                .unwrap();
            assert_eq!(doc.pages.len(), 2, "count={count}");
            assert_eq!(doc.pages[0].name, "manifest");
            assert_eq!(doc.pages[1].name, "summary");
        }
    }

    #[test]
    fn empty_product_list_is_invalid_input() {
        let fixture = Fixture::new(HashMap::new());
        let err = compose(&[], &ReportMeta::default(), 200, 150, &fixture.ctx()).unwrap_err();
        assert!(matches!(err, ProofsheetError::InvalidInput(_)));
    }

    #[test]
    fn manifest_holds_one_row_per_product_with_resolved_thumbnails() {
        let mut entries = HashMap::new();
        entries.insert("base.png".to_string(), tiny_png(2, 2, [50, 60, 70, 255]));
        let fixture = Fixture::new(entries);

        let mut list = products(3);
        for product in &mut list {
            product.base_image_url = Some("base.png".to_string());
        }
        let doc = compose(&list, &ReportMeta::default(), 200, 150, &fixture.ctx()).unwrap();
        assert_eq!(doc.thumbnails_rendered, 3);
        assert_eq!(doc.degraded_thumbnails, 0);

        let table = first_table(&doc.pages[0]);
        assert_eq!(table.rows.len(), 3);
        for row in &table.rows {
            let Cell::Image(slot) = &row[0] else {
                panic!("first cell is the thumbnail");
            };
            let resolved = slot.resolved.as_ref().expect("pre-resolved");
            assert!(!resolved.is_placeholder());
            assert_eq!(resolved.pixmap.width(), 200);
            assert_eq!(resolved.pixmap.height(), 150);
        }
    }

    #[test]
    fn missing_base_yields_degraded_thumbnail_not_error() {
        let fixture = Fixture::new(HashMap::new());
        let doc = compose(&products(2), &ReportMeta::default(), 200, 150, &fixture.ctx())
            .unwrap();
        assert_eq!(doc.degraded_thumbnails, 2);
        let table = first_table(&doc.pages[0]);
        let Cell::Image(slot) = &table.rows[0][0] else {
            panic!("first cell is the thumbnail");
        };
        assert!(slot.resolved.as_ref().unwrap().is_placeholder());
    }

    #[test]
    fn manifest_header_carries_meta_and_config_number() {
        let fixture = Fixture::new(HashMap::new());
        let meta = ReportMeta {
            project_name: "Autumn Merch".to_string(),
            customer_name: "North Prints".to_string(),
            customer_contact: "".to_string(),
            date: "2024-11-02".to_string(),
            config_number: None,
        };
        let doc = compose(&products(1), &meta, 200, 150, &fixture.ctx()).unwrap();
        let page = &doc.pages[0];
        assert!(matches!(
            &page.blocks[0],
            Block::Heading(title) if title == "Autumn Merch"
        ));
        assert_eq!(field_value(page, "Customer"), Some("North Prints"));
        // Empty contact field is dropped.
        assert_eq!(field_value(page, "Contact"), None);
        let config = field_value(page, "Configuration").unwrap();
        assert!(config.starts_with("CFG-"));
    }

    #[test]
    fn summary_table_reports_per_product_state() {
        let mut entries = HashMap::new();
        entries.insert("base.png".to_string(), tiny_png(2, 2, [50, 60, 70, 255]));
        let fixture = Fixture::new(entries);

        let mut with_base = Product::new("a", "Mug");
        with_base.base_image_url = Some("base.png".to_string());
        with_base.edit_set = Some(EditSet::new(vec![
            Element::new("e1", ElementKind::Text(TextSpan::new("hi"))),
            Element::new("e2", ElementKind::Rectangle),
        ]));
        let bare = Product::new("b", "Cap");

        let doc = compose(
            &[with_base, bare],
            &ReportMeta::default(),
            200,
            150,
            &fixture.ctx(),
        )
        .unwrap();
        let table = first_table(&doc.pages[1]);
        assert_eq!(table.header.len(), 6);
        assert_eq!(table.rows.len(), 2);

        let row_text = |row: usize, col: usize| match &table.rows[row][col] {
            Cell::Text(text) => text.as_str(),
            Cell::Image(_) => panic!("summary cells are text"),
        };
        assert_eq!(row_text(0, 0), "1");
        assert_eq!(row_text(0, 1), "Mug");
        assert_eq!(row_text(0, 3), "linked");
        assert_eq!(row_text(0, 4), "2");
        assert_eq!(row_text(0, 5), "rendered");
        assert_eq!(row_text(1, 3), "none");
        assert_eq!(row_text(1, 5), "placeholder");
    }

    #[test]
    fn summary_counts_alternate_gallery_views() {
        let mut entries = HashMap::new();
        entries.insert("base.png".to_string(), tiny_png(2, 2, [50, 60, 70, 255]));
        let fixture = Fixture::new(entries);

        let mut product = Product::new("a", "Mug");
        product.base_image_url = Some("base.png".to_string());
        product.images = vec![
            "side.png".to_string(),
            "   ".to_string(),
            "back.png".to_string(),
        ];

        let doc = compose(&[product], &ReportMeta::default(), 200, 150, &fixture.ctx()).unwrap();
        let table = first_table(&doc.pages[1]);
        let Cell::Text(base) = &table.rows[0][3] else {
            panic!("base image cell is text");
        };
        assert_eq!(base, "linked (+2 views)");
    }

    #[test]
    fn customization_summary_groups_by_kind() {
        let mut product = Product::new("p", "Mug");
        assert_eq!(customization_summary(&product), "No customizations");

        product.edit_set = Some(EditSet::new(vec![
            Element::new("e1", ElementKind::Text(TextSpan::new("a"))),
            Element::new("e2", ElementKind::Text(TextSpan::new("b"))),
            Element::new("e3", ElementKind::Circle),
        ]));
        assert_eq!(
            customization_summary(&product),
            "3 customizations: 1 circle, 2 text"
        );
    }

    #[test]
    fn baked_snapshot_reports_baked_state() {
        let png = tiny_png(2, 2, [9, 9, 9, 255]);
        let mut product = Product::new("p", "Mug");
        product.edited_image = Some(crate::raster::to_data_url("image/png", &png));

        let fixture = Fixture::new(HashMap::new());
        let doc = compose(&[product], &ReportMeta::default(), 200, 150, &fixture.ctx())
            .unwrap();
        let table = first_table(&doc.pages[1]);
        let Cell::Text(state) = &table.rows[0][5] else {
            panic!("snapshot state is text");
        };
        assert_eq!(state, "baked");
    }
}
