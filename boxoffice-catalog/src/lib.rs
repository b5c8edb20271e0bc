pub mod catalog;
pub mod pricing;

pub use catalog::{CatalogError, ShowCatalog};
pub use pricing::{PriceList, PricingEngine, PricingError};
