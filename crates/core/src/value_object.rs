//! Value objects: equality by value, not identity.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**. A product
/// reference is one: two references with the same sku, weight and value
/// describe the same thing.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}

/// A product placed in a consignment.
///
/// Carries the attributes a courier selection policy may look at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductRef {
    pub sku: String,
    pub weight_grams: u32,
    /// Declared value in smallest currency unit (e.g., pence).
    pub value_cents: u64,
}

impl ValueObject for ProductRef {}

impl ProductRef {
    pub fn new(sku: impl Into<String>, weight_grams: u32, value_cents: u64) -> Self {
        Self {
            sku: sku.into(),
            weight_grams,
            value_cents,
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.sku.trim().is_empty() {
            return Err(DomainError::invalid_product("product sku must not be empty"));
        }
        if self.weight_grams == 0 {
            return Err(DomainError::invalid_product(format!(
                "product '{}' must have a positive weight",
                self.sku
            )));
        }
        Ok(())
    }

    /// Validate a consignment's product list: non-empty, every entry valid.
    pub fn validate_all(products: &[ProductRef]) -> DomainResult<()> {
        if products.is_empty() {
            return Err(DomainError::invalid_product(
                "a consignment needs at least one product",
            ));
        }
        products.iter().try_for_each(ProductRef::validate)
    }

    /// Combined weight of a product list, saturating on overflow.
    pub fn total_weight(products: &[ProductRef]) -> u64 {
        products
            .iter()
            .fold(0u64, |acc, p| acc.saturating_add(u64::from(p.weight_grams)))
    }
}
