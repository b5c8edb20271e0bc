use boxoffice_core::{SeatCategory, SeatId, ShowLayout};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::RwLock;
use tracing::info;

/// Seat price per category, in minor currency units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceList {
    pub currency: String,
    pub prices: BTreeMap<SeatCategory, i64>,
}

impl Default for PriceList {
    fn default() -> Self {
        Self {
            currency: "EUR".to_string(),
            prices: {
                let mut m = BTreeMap::new();
                m.insert(SeatCategory::Standard, 900);
                m.insert(SeatCategory::Premium, 1200);
                m.insert(SeatCategory::Vip, 1800);
                m
            },
        }
    }
}

impl PriceList {
    pub fn validate(&self) -> Result<(), PricingError> {
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(PricingError::InvalidCurrency(self.currency.clone()));
        }
        for category in [SeatCategory::Standard, SeatCategory::Premium, SeatCategory::Vip] {
            match self.prices.get(&category) {
                None => return Err(PricingError::MissingCategory(category)),
                Some(price) if *price < 0 => {
                    return Err(PricingError::NegativePrice { category, price: *price })
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// Deterministic category pricing.
///
/// The list can be swapped at runtime; callers stamp prices onto locks at
/// acquisition so a later change never alters an existing hold.
pub struct PricingEngine {
    prices: RwLock<PriceList>,
}

impl PricingEngine {
    pub fn new(prices: PriceList) -> Result<Self, PricingError> {
        prices.validate()?;
        Ok(Self { prices: RwLock::new(prices) })
    }

    pub fn currency(&self) -> String {
        self.snapshot().currency
    }

    pub fn snapshot(&self) -> PriceList {
        self.prices
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn price_of(&self, category: SeatCategory) -> i64 {
        self.prices
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .prices
            .get(&category)
            .copied()
            .unwrap_or(0)
    }

    /// Prices each seat from one consistent view of the list.
    pub fn quote(&self, layout: &ShowLayout, seats: &[SeatId]) -> Vec<(SeatId, i64)> {
        let prices = self.prices.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        seats
            .iter()
            .map(|seat| {
                let category = layout.category_of(seat);
                (seat.clone(), prices.prices.get(&category).copied().unwrap_or(0))
            })
            .collect()
    }

    pub fn update(&self, prices: PriceList) -> Result<(), PricingError> {
        prices.validate()?;
        let mut current = self.prices.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        info!("Price list updated: {:?}", prices.prices);
        *current = prices;
        Ok(())
    }
}

impl Default for PricingEngine {
    fn default() -> Self {
        Self { prices: RwLock::new(PriceList::default()) }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PricingError {
    #[error("Invalid currency code: {0}")]
    InvalidCurrency(String),

    #[error("Missing price for category {0:?}")]
    MissingCategory(SeatCategory),

    #[error("Negative price {price} for category {category:?}")]
    NegativePrice {
        category: SeatCategory,
        price: i64,
    },
}
