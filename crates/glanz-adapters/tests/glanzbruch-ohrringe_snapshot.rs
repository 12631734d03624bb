use std::path::{Path, PathBuf};

use glanz_adapters::{glanzbruch_ohrringe_adapter, load_listing_page, ListingAdapter, GLANZBRUCH_LISTING_URL};
use glanz_core::NewProduct;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Snapshot {
    listings_found: usize,
    products: Vec<NewProduct>,
    rejected_positions: Vec<usize>,
}

fn fixture_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../fixtures/glanzbruch-ohrringe/sample")
}

#[test]
fn glanzbruch_ohrringe_listing_matches_snapshot() {
    let dir = fixture_dir();
    let page = load_listing_page(dir.join("raw/listing.html"), GLANZBRUCH_LISTING_URL).unwrap();
    let expected: Snapshot =
        serde_json::from_str(&std::fs::read_to_string(dir.join("snapshot.json")).unwrap()).unwrap();

    let parsed = glanzbruch_ohrringe_adapter().parse_listing(&page).unwrap();

    assert_eq!(parsed.listings_found, expected.listings_found);
    assert_eq!(parsed.products, expected.products);
    assert_eq!(
        parsed.rejected.iter().map(|r| r.position).collect::<Vec<_>>(),
        expected.rejected_positions
    );
}

#[test]
fn glanzbruch_ohrringe_drafts_keep_detail_links() {
    let dir = fixture_dir();
    let page = load_listing_page(dir.join("raw/listing.html"), GLANZBRUCH_LISTING_URL).unwrap();
    let drafts = glanzbruch_ohrringe_adapter().extract_drafts(&page).unwrap();

    assert_eq!(
        drafts[0].product_url.value.as_deref(),
        Some("https://www.glanzbruch.ch/produkt/ohrring-mond/")
    );
    assert!(drafts.iter().all(|d| d.product_url.is_present()));
    assert!(drafts.iter().all(|d| d.listing_url == GLANZBRUCH_LISTING_URL));
}
