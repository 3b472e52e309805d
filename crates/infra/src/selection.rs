use serde::{Deserialize, Serialize};

use consign_core::{CourierId, ProductRef};
use consign_dispatch::CourierSelector;

use crate::config::SelectionConfig;

/// Parcels up to `max_grams` (inclusive) go to `courier`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightBand {
    pub max_grams: u64,
    pub courier: CourierId,
}

impl WeightBand {
    pub fn new(max_grams: u64, courier: CourierId) -> Self {
        Self { max_grams, courier }
    }
}

/// Picks a courier from the total weight of a consignment.
///
/// Bands are checked lightest first; anything heavier than every band goes to
/// the fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightBandSelector {
    bands: Vec<WeightBand>,
    fallback: CourierId,
}

impl WeightBandSelector {
    pub fn new(mut bands: Vec<WeightBand>, fallback: CourierId) -> Self {
        bands.sort_by_key(|b| b.max_grams);
        Self { bands, fallback }
    }

    pub fn from_config(config: &SelectionConfig) -> Self {
        Self::new(config.weight_bands.clone(), config.fallback)
    }

    /// Always the fallback.
    pub fn single(courier: CourierId) -> Self {
        Self::new(Vec::new(), courier)
    }

    pub fn courier_for_weight(&self, grams: u64) -> CourierId {
        self.bands
            .iter()
            .find(|b| grams <= b.max_grams)
            .map(|b| b.courier)
            .unwrap_or(self.fallback)
    }
}

impl CourierSelector for WeightBandSelector {
    fn select_courier(&self, products: &[ProductRef]) -> CourierId {
        self.courier_for_weight(ProductRef::total_weight(products))
    }
}
