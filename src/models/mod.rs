pub mod ad;

pub use ad::{Ad, AdPartial, PriceType, ShippingType};
