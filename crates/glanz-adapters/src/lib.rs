//! Listing page adapters: fetch a category page and turn its product cards into records.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use glanz_core::{
    EvidenceRef, Field, ListingDraft, NewProduct, DEFAULT_CATEGORY, DEFAULT_PRICE,
    PLACEHOLDER_DESCRIPTION, PLACEHOLDER_NAME,
};
use glanz_storage::{FetchError, FetchedResponse, HttpFetcher};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

pub const CRATE_NAME: &str = "glanz-adapters";

pub const GLANZBRUCH_SOURCE_ID: &str = "glanzbruch-ohrringe";
pub const GLANZBRUCH_LISTING_URL: &str = "https://www.glanzbruch.ch/onlineshop/ohrringe/";

const SNIPPET_MAX_CHARS: usize = 160;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedPage {
    pub url: String,
    pub final_url: String,
    pub content_type: Option<String>,
    pub body: String,
    pub content_hash: String,
    pub fetched_at: DateTime<Utc>,
}

impl FetchedPage {
    pub fn from_response(requested_url: &str, resp: FetchedResponse) -> Self {
        Self {
            url: requested_url.to_string(),
            final_url: resp.final_url,
            content_type: resp.content_type,
            body: String::from_utf8_lossy(&resp.body).into_owned(),
            content_hash: resp.content_hash,
            fetched_at: resp.fetched_at,
        }
    }

    /// Wrap markup that did not come over the network (fixtures, saved pages).
    pub fn from_html(url: &str, html: impl Into<String>, fetched_at: DateTime<Utc>) -> Self {
        let body = html.into();
        Self {
            url: url.to_string(),
            final_url: url.to_string(),
            content_type: Some("text/html".to_string()),
            content_hash: glanz_storage::sha256_hex(body.as_bytes()),
            body,
            fetched_at,
        }
    }
}

/// Read a saved listing page from disk.
pub fn load_listing_page(path: impl AsRef<Path>, url: &str) -> Result<FetchedPage> {
    let path = path.as_ref();
    let html = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(FetchedPage::from_html(url, html, Utc::now()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterContext {
    pub run_id: Uuid,
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid selector `{selector}`: {message}")]
    Selector { selector: String, message: String },
    #[error("price `{raw}` is not a number")]
    InvalidPrice { raw: String },
    #[error("price `{raw}` is out of range")]
    PriceOutOfRange { raw: String },
}

/// CSS selectors locating one product card and its fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingSelectors {
    pub listing: String,
    pub name: String,
    pub price: String,
    pub link: String,
    pub image: String,
}

impl Default for ListingSelectors {
    fn default() -> Self {
        Self {
            listing: "li.product".to_string(),
            name: "h2".to_string(),
            price: "span.woocommerce-Price-amount".to_string(),
            link: "a[href]".to_string(),
            image: "img[src]".to_string(),
        }
    }
}

struct CompiledSelectors {
    listing: Selector,
    name: Selector,
    price: Selector,
    link: Selector,
    image: Selector,
}

impl CompiledSelectors {
    fn compile(selectors: &ListingSelectors) -> Result<Self, ParseError> {
        Ok(Self {
            listing: compile_selector(&selectors.listing)?,
            name: compile_selector(&selectors.name)?,
            price: compile_selector(&selectors.price)?,
            link: compile_selector(&selectors.link)?,
            image: compile_selector(&selectors.image)?,
        })
    }
}

fn compile_selector(selector: &str) -> Result<Selector, ParseError> {
    Selector::parse(selector).map_err(|e| ParseError::Selector {
        selector: selector.to_string(),
        message: e.to_string(),
    })
}

#[derive(Debug)]
pub struct RejectedListing {
    pub position: usize,
    pub name: Option<String>,
    pub error: ParseError,
}

/// Outcome of parsing one listing page. Rejected listings never abort the rest.
#[derive(Debug, Default)]
pub struct ListingParse {
    pub listings_found: usize,
    pub products: Vec<NewProduct>,
    pub rejected: Vec<RejectedListing>,
}

#[async_trait]
pub trait ListingAdapter: Send + Sync {
    fn source_id(&self) -> &str;
    fn listing_url(&self) -> &str;

    async fn fetch_listing(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
    ) -> Result<FetchedPage, FetchError>;

    fn extract_drafts(&self, page: &FetchedPage) -> Result<Vec<ListingDraft>, ParseError>;

    fn normalize(&self, draft: &ListingDraft) -> Result<NewProduct, ParseError>;

    fn parse_listing(&self, page: &FetchedPage) -> Result<ListingParse, ParseError> {
        let drafts = self.extract_drafts(page)?;
        let mut parsed = ListingParse {
            listings_found: drafts.len(),
            ..Default::default()
        };
        for draft in &drafts {
            match self.normalize(draft) {
                Ok(product) => parsed.products.push(product),
                Err(error) => parsed.rejected.push(RejectedListing {
                    position: draft.position,
                    name: draft.name.value.clone(),
                    error,
                }),
            }
        }
        Ok(parsed)
    }
}

/// Adapter for a single WooCommerce category page.
#[derive(Debug, Clone)]
pub struct CategoryListingAdapter {
    source_id: String,
    listing_url: String,
    category: String,
    selectors: ListingSelectors,
}

impl CategoryListingAdapter {
    pub fn new(
        source_id: impl Into<String>,
        listing_url: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            listing_url: listing_url.into(),
            category: category.into(),
            selectors: ListingSelectors::default(),
        }
    }

    pub fn with_selectors(mut self, selectors: ListingSelectors) -> Self {
        self.selectors = selectors;
        self
    }

    pub fn category(&self) -> &str {
        &self.category
    }
}

pub fn glanzbruch_ohrringe_adapter() -> CategoryListingAdapter {
    CategoryListingAdapter::new(GLANZBRUCH_SOURCE_ID, GLANZBRUCH_LISTING_URL, DEFAULT_CATEGORY)
}

fn text_or_none(value: &str) -> Option<String> {
    let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

fn snippet(element: &ElementRef<'_>) -> String {
    element.html().chars().take(SNIPPET_MAX_CHARS).collect()
}

fn evidence(page: &FetchedPage, selector: &str, element: &ElementRef<'_>) -> EvidenceRef {
    EvidenceRef {
        source_url: page.final_url.clone(),
        selector: selector.to_string(),
        snippet: snippet(element),
        fetched_at: page.fetched_at,
    }
}

fn first_text(
    node: &ElementRef<'_>,
    sel: &Selector,
    selector: &str,
    page: &FetchedPage,
) -> Field<String> {
    node.select(sel)
        .next()
        .and_then(|el| {
            text_or_none(&el.text().collect::<String>())
                .map(|text| Field::with_value_and_evidence(text, evidence(page, selector, &el)))
        })
        .unwrap_or_default()
}

/// Like `first_text`, but a matched node with blank text still counts as present.
fn first_raw_text(
    node: &ElementRef<'_>,
    sel: &Selector,
    selector: &str,
    page: &FetchedPage,
) -> Field<String> {
    node.select(sel)
        .next()
        .map(|el| {
            let text = text_or_none(&el.text().collect::<String>()).unwrap_or_default();
            Field::with_value_and_evidence(text, evidence(page, selector, &el))
        })
        .unwrap_or_default()
}

fn first_attr(
    node: &ElementRef<'_>,
    sel: &Selector,
    selector: &str,
    attr: &str,
    page: &FetchedPage,
) -> Field<String> {
    node.select(sel)
        .next()
        .and_then(|el| {
            el.value()
                .attr(attr)
                .and_then(text_or_none)
                .map(|value| Field::with_value_and_evidence(value, evidence(page, selector, &el)))
        })
        .unwrap_or_default()
}

/// Parse a Swiss-formatted price such as `CHF 24,90` or `CHF 1'250.00`.
pub fn parse_chf_price(raw: &str) -> Result<f64, ParseError> {
    let cleaned = raw
        .replace("CHF", "")
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\'' && *c != '\u{2019}')
        .map(|c| if c == ',' { '.' } else { c })
        .collect::<String>();
    let value = cleaned
        .parse::<f64>()
        .map_err(|_| ParseError::InvalidPrice {
            raw: raw.to_string(),
        })?;
    if !value.is_finite() || value < 0.0 {
        return Err(ParseError::PriceOutOfRange {
            raw: raw.to_string(),
        });
    }
    Ok(value)
}

#[async_trait]
impl ListingAdapter for CategoryListingAdapter {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn listing_url(&self) -> &str {
        &self.listing_url
    }

    async fn fetch_listing(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
    ) -> Result<FetchedPage, FetchError> {
        let resp = http.fetch_bytes(ctx.run_id, &self.listing_url).await?;
        Ok(FetchedPage::from_response(&self.listing_url, resp))
    }

    fn extract_drafts(&self, page: &FetchedPage) -> Result<Vec<ListingDraft>, ParseError> {
        let sels = CompiledSelectors::compile(&self.selectors)?;
        let document = Html::parse_document(&page.body);

        let drafts = document
            .select(&sels.listing)
            .enumerate()
            .map(|(position, node)| ListingDraft {
                source_id: self.source_id.clone(),
                position,
                listing_url: page.url.clone(),
                fetched_at: page.fetched_at,
                name: first_text(&node, &sels.name, &self.selectors.name, page),
                price_text: first_raw_text(&node, &sels.price, &self.selectors.price, page),
                product_url: first_attr(&node, &sels.link, &self.selectors.link, "href", page),
                image_url: first_attr(&node, &sels.image, &self.selectors.image, "src", page),
            })
            .collect::<Vec<_>>();

        debug!(source_id = %self.source_id, listings = drafts.len(), "extracted listing drafts");
        Ok(drafts)
    }

    fn normalize(&self, draft: &ListingDraft) -> Result<NewProduct, ParseError> {
        let price = match draft.price_text.get() {
            Some(raw) => parse_chf_price(raw)?,
            None => DEFAULT_PRICE,
        };
        Ok(NewProduct {
            name: draft.name.value_or(PLACEHOLDER_NAME.to_string()),
            description: PLACEHOLDER_DESCRIPTION.to_string(),
            price,
            category: self.category.clone(),
            image_urls: draft.image_url.value.iter().cloned().collect(),
            sku: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(html: &str) -> FetchedPage {
        FetchedPage::from_html(GLANZBRUCH_LISTING_URL, html, Utc::now())
    }

    fn parse(html: &str) -> ListingParse {
        glanzbruch_ohrringe_adapter().parse_listing(&page(html)).unwrap()
    }

    #[test]
    fn swiss_prices_normalize() {
        assert_eq!(parse_chf_price("CHF 12,50").unwrap(), 12.50);
        assert_eq!(parse_chf_price("CHF\u{a0}24,90").unwrap(), 24.90);
        assert_eq!(parse_chf_price("CHF 1'250,00").unwrap(), 1250.0);
        assert_eq!(parse_chf_price("88.00").unwrap(), 88.0);
    }

    #[test]
    fn non_numeric_price_is_a_parse_error() {
        assert!(matches!(
            parse_chf_price("CHF abc"),
            Err(ParseError::InvalidPrice { .. })
        ));
        assert!(matches!(parse_chf_price(""), Err(ParseError::InvalidPrice { .. })));
        assert!(matches!(
            parse_chf_price("CHF -5,00"),
            Err(ParseError::PriceOutOfRange { .. })
        ));
        assert!(matches!(
            parse_chf_price("inf"),
            Err(ParseError::PriceOutOfRange { .. })
        ));
    }

    #[test]
    fn single_listing_maps_to_full_record() {
        let parsed = parse(
            r#"<ul class="products">
                 <li class="product">
                   <a href="/product/mond"><img src="/img/mond.jpg"><h2>Ohrring Mond</h2></a>
                   <span class="woocommerce-Price-amount amount">CHF 24,90</span>
                 </li>
               </ul>"#,
        );
        assert_eq!(parsed.listings_found, 1);
        assert!(parsed.rejected.is_empty());
        assert_eq!(
            parsed.products,
            vec![NewProduct {
                name: "Ohrring Mond".to_string(),
                description: "Produktbeschreibung wird nachgetragen".to_string(),
                price: 24.90,
                category: "Ohrringe".to_string(),
                image_urls: vec!["/img/mond.jpg".to_string()],
                sku: None,
            }]
        );
    }

    #[test]
    fn drafts_capture_product_url_with_evidence() {
        let adapter = glanzbruch_ohrringe_adapter();
        let drafts = adapter
            .extract_drafts(&page(
                r#"<li class="product"><a href="/product/mond"><h2>Ohrring Mond</h2></a></li>"#,
            ))
            .unwrap();
        let draft = &drafts[0];
        assert_eq!(draft.product_url.value.as_deref(), Some("/product/mond"));
        let evidence = draft.name.evidence.as_ref().unwrap();
        assert_eq!(evidence.selector, "h2");
        assert!(evidence.snippet.contains("Ohrring Mond"));
        assert!(!draft.price_text.is_present());
    }

    #[test]
    fn missing_nodes_fall_back_to_placeholders() {
        let parsed = parse(r#"<ul><li class="product"><a href="/product/x">x</a></li></ul>"#);
        let product = &parsed.products[0];
        assert_eq!(product.name, "Unbekannt");
        assert_eq!(product.price, 0.0);
        assert!(product.image_urls.is_empty());
        assert_eq!(product.sku, None);
    }

    #[test]
    fn empty_heading_counts_as_missing() {
        let parsed = parse(r#"<li class="product"><h2>   </h2></li>"#);
        assert_eq!(parsed.products[0].name, PLACEHOLDER_NAME);
    }

    #[test]
    fn whitespace_in_names_is_collapsed() {
        let parsed = parse("<li class=\"product\"><h2>\n  Ohrring\n   Stern </h2></li>");
        assert_eq!(parsed.products[0].name, "Ohrring Stern");
    }

    #[test]
    fn no_listing_nodes_is_empty_not_error() {
        let parsed = parse("");
        assert_eq!(parsed.listings_found, 0);
        assert!(parsed.products.is_empty());
        assert!(parsed.rejected.is_empty());
    }

    #[test]
    fn bad_price_rejects_only_that_listing() {
        let parsed = parse(
            r#"<li class="product"><h2>Ohrring Sonne</h2><span class="woocommerce-Price-amount">CHF abc</span></li>
               <li class="product"><h2>Ohrring Mond</h2><span class="woocommerce-Price-amount">CHF 24,90</span></li>"#,
        );
        assert_eq!(parsed.listings_found, 2);
        assert_eq!(parsed.products.len(), 1);
        assert_eq!(parsed.products[0].name, "Ohrring Mond");
        let rejected = &parsed.rejected[0];
        assert_eq!(rejected.position, 0);
        assert_eq!(rejected.name.as_deref(), Some("Ohrring Sonne"));
        assert!(matches!(rejected.error, ParseError::InvalidPrice { .. }));
    }

    #[test]
    fn blank_price_node_is_rejected_not_defaulted() {
        let parsed = parse(
            r#"<li class="product"><h2>Ohrring Leer</h2><span class="woocommerce-Price-amount"> </span></li>"#,
        );
        assert_eq!(parsed.listings_found, 1);
        assert!(parsed.products.is_empty());
        assert_eq!(parsed.rejected.len(), 1);
        assert_eq!(parsed.rejected[0].name.as_deref(), Some("Ohrring Leer"));
        assert!(matches!(parsed.rejected[0].error, ParseError::InvalidPrice { .. }));
    }

    #[test]
    fn sale_listing_uses_first_price_node() {
        let parsed = parse(
            r#"<li class="product"><h2>Ohrring Blatt</h2>
                 <del><span class="woocommerce-Price-amount">CHF 60,00</span></del>
                 <ins><span class="woocommerce-Price-amount">CHF 45,00</span></ins>
               </li>"#,
        );
        assert_eq!(parsed.products[0].price, 60.0);
    }

    #[test]
    fn invalid_selector_is_reported() {
        let adapter = glanzbruch_ohrringe_adapter().with_selectors(ListingSelectors {
            listing: "li[".to_string(),
            ..ListingSelectors::default()
        });
        let err = adapter.parse_listing(&page("<li></li>")).unwrap_err();
        assert!(matches!(err, ParseError::Selector { ref selector, .. } if selector == "li["));
    }

    #[test]
    fn category_comes_from_adapter() {
        let adapter = CategoryListingAdapter::new("glanzbruch-ringe", "https://example.test/", "Fingerringe");
        let parsed = adapter
            .parse_listing(&page(r#"<li class="product"><h2>Ring</h2></li>"#))
            .unwrap();
        assert_eq!(parsed.products[0].category, "Fingerringe");
        assert_eq!(adapter.category(), "Fingerringe");
    }
}
