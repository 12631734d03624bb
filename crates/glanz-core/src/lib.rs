//! Core domain model and provenance types for the Glanzbruch importer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "glanz-core";

/// Name used when a listing has no heading node.
pub const PLACEHOLDER_NAME: &str = "Unbekannt";

/// Listing pages carry no description; every record gets this text.
pub const PLACEHOLDER_DESCRIPTION: &str = "Produktbeschreibung wird nachgetragen";

/// Price used when a listing has no price node.
pub const DEFAULT_PRICE: f64 = 0.0;

pub const DEFAULT_CATEGORY: &str = "Ohrringe";

/// Provenance pointer attached to extracted values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRef {
    pub source_url: String,
    pub selector: String,
    pub snippet: String,
    pub fetched_at: DateTime<Utc>,
}

/// Result of one per-field lookup: either a value with evidence, or nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field<T> {
    pub value: Option<T>,
    pub evidence: Option<EvidenceRef>,
}

impl<T> Default for Field<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> Field<T> {
    pub fn empty() -> Self {
        Self {
            value: None,
            evidence: None,
        }
    }

    pub fn with_value_and_evidence(value: T, evidence: EvidenceRef) -> Self {
        Self {
            value: Some(value),
            evidence: Some(evidence),
        }
    }

    pub fn is_present(&self) -> bool {
        self.value.is_some()
    }

    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }
}

impl<T: Clone> Field<T> {
    /// Extracted value, or `fallback` when the node was missing.
    pub fn value_or(&self, fallback: T) -> T {
        self.value.clone().unwrap_or(fallback)
    }
}

/// Raw per-listing extraction handed from adapters to normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingDraft {
    pub source_id: String,
    /// Zero-based index of the listing node in document order.
    pub position: usize,
    pub listing_url: String,
    pub fetched_at: DateTime<Utc>,
    pub name: Field<String>,
    pub price_text: Field<String>,
    /// Detail page link. Captured for diagnostics; never persisted.
    pub product_url: Field<String>,
    pub image_url: Field<String>,
}

/// Normalized product record that has not been assigned an id yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub description: String,
    pub price: f64,
    pub category: String,
    pub image_urls: Vec<String>,
    pub sku: Option<String>,
}

/// Persisted product row. Only sinks construct these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub price: f64,
    pub category: String,
    pub image_urls: Vec<String>,
    pub sku: Option<String>,
}

impl Product {
    /// Attach a freshly generated id to a normalized record.
    pub fn assign_id(record: NewProduct) -> Self {
        Self::with_id(Uuid::new_v4(), record)
    }

    pub fn with_id(id: Uuid, record: NewProduct) -> Self {
        Self {
            id,
            name: record.name,
            description: record.description,
            price: record.price,
            category: record.category,
            image_urls: record.image_urls,
            sku: record.sku,
        }
    }
}
