use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use validator::{Validate, ValidationError};

use crate::config::AdDefaults;
use crate::utils::error::{AppError, Result};
use crate::utils::merge;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriceType {
    Fixed,
    Negotiable,
    GiveAway,
    NotApplicable,
}

impl PriceType {
    /// Wire value expected by the price-type selection control.
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceType::Fixed => "FIXED",
            PriceType::Negotiable => "NEGOTIABLE",
            PriceType::GiveAway => "GIVE_AWAY",
            PriceType::NotApplicable => "NOT_APPLICABLE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShippingType {
    Pickup,
    Shipping,
    NotApplicable,
}

/// One ad definition as authored on disk. Fields covered by `ad_defaults`
/// are optional here and filled in by [`AdPartial::to_ad`].
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_partial_price_rules"))]
pub struct AdPartial {
    #[validate(length(min = 10, message = "title must be at least 10 characters"))]
    pub title: String,
    #[validate(length(max = 4000, message = "description must not exceed 4000 characters"))]
    pub description: String,
    /// Upload order follows list order.
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub price: Option<i64>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub special_attributes: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub price_type: Option<PriceType>,
    #[serde(default)]
    pub shipping_type: Option<ShippingType>,
    #[serde(default, deserialize_with = "deserialize_shipping_costs")]
    pub shipping_costs: Option<Decimal>,
    #[serde(default)]
    #[validate(custom(function = "validate_shipping_option_tags"))]
    pub shipping_options: Option<Vec<String>>,
    #[serde(default)]
    pub sell_directly: Option<bool>,
    /// Days after which the ad is considered due for republication.
    #[serde(default)]
    pub republication_interval: Option<i64>,
    #[serde(default)]
    pub content_hash: Option<String>,
    /// Assigned only after a successful publish.
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub created_on: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_on: Option<DateTime<Utc>>,
}

/// A complete, validated ad ready for publishing.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_ad_price_rules"))]
pub struct Ad {
    #[validate(length(min = 10, message = "title must be at least 10 characters"))]
    pub title: String,
    #[validate(length(max = 4000, message = "description must not exceed 4000 characters"))]
    pub description: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub price: Option<i64>,
    pub category: String,
    #[serde(default)]
    pub special_attributes: Option<BTreeMap<String, String>>,
    pub price_type: PriceType,
    pub shipping_type: ShippingType,
    #[serde(default, deserialize_with = "deserialize_shipping_costs")]
    pub shipping_costs: Option<Decimal>,
    #[serde(default)]
    #[validate(custom(function = "validate_shipping_option_tags"))]
    pub shipping_options: Option<Vec<String>>,
    #[serde(default)]
    pub sell_directly: Option<bool>,
    #[serde(default)]
    pub republication_interval: Option<i64>,
    #[serde(default)]
    pub content_hash: Option<String>,
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub created_on: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_on: Option<DateTime<Utc>>,
}

impl AdPartial {
    /// Produces a complete [`Ad`] by recursively merging this partial with
    /// `ad_defaults`. A field is inherited when it is absent, null or an empty
    /// string; lists are only filled in when wholly absent. The legacy global
    /// `description` default is never inherited.
    pub fn to_ad(&self, defaults: &AdDefaults) -> Result<Ad> {
        let Value::Object(mut target) = serde_json::to_value(self)? else {
            return Err(AppError::Validation("ad did not serialize to an object".into()));
        };
        let Value::Object(default_map) = serde_json::to_value(defaults)? else {
            return Err(AppError::Validation("ad_defaults did not serialize to an object".into()));
        };

        merge::apply_defaults(
            &mut target,
            &default_map,
            &|key, _| key == "description",
            &|_, value| !value.is_array() && (value.is_null() || value.as_str() == Some("")),
        );

        let ad: Ad = serde_json::from_value(Value::Object(target))?;
        ad.validate()?;
        Ok(ad)
    }
}

impl Ad {
    /// Hash over the merged ad content, excluding volatile bookkeeping fields,
    /// so that `--ads=changed` can detect edits since the last publish.
    pub fn content_hash(&self) -> Result<String> {
        let Value::Object(mut map) = serde_json::to_value(self)? else {
            return Err(AppError::Validation("ad did not serialize to an object".into()));
        };
        for volatile in ["id", "created_on", "updated_on", "content_hash"] {
            map.remove(volatile);
        }
        // serde_json maps are BTree-backed, so this serialization is canonical
        let canonical = serde_json::to_string(&Value::Object(map))?;

        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Ok(format!("{:x}", hasher.finalize()))
    }
}

fn validate_partial_price_rules(ad: &AdPartial) -> std::result::Result<(), ValidationError> {
    price_rules(ad.price_type, ad.price)
}

fn validate_ad_price_rules(ad: &Ad) -> std::result::Result<(), ValidationError> {
    price_rules(Some(ad.price_type), ad.price)
}

fn price_rules(
    price_type: Option<PriceType>,
    price: Option<i64>,
) -> std::result::Result<(), ValidationError> {
    match (price_type, price) {
        (Some(PriceType::GiveAway), Some(_)) => {
            let mut err = ValidationError::new("price_forbidden");
            err.message = Some("price must not be specified when price_type is GIVE_AWAY".into());
            Err(err)
        }
        (Some(PriceType::Fixed), None) => {
            let mut err = ValidationError::new("price_required");
            err.message = Some("price is required when price_type is FIXED".into());
            Err(err)
        }
        _ => Ok(()),
    }
}

fn validate_shipping_option_tags(options: &Vec<String>) -> std::result::Result<(), ValidationError> {
    if options.iter().any(|tag| tag.trim().is_empty()) {
        let mut err = ValidationError::new("blank_shipping_option");
        err.message = Some("shipping options must be non-empty and non-blank".into());
        return Err(err);
    }
    Ok(())
}

/// Accepts numbers and decimal strings (both `.` and `,` separators) and
/// rounds to two decimal places; blank strings count as absent.
pub(crate) fn deserialize_shipping_costs<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let parsed = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(raw)) if raw.trim().is_empty() => return Ok(None),
        Some(Value::String(raw)) => Decimal::from_str(&raw.trim().replace(',', "."))
            .map_err(serde::de::Error::custom)?,
        Some(Value::Number(raw)) => decimal_from_number(raw).map_err(serde::de::Error::custom)?,
        Some(other) => {
            return Err(serde::de::Error::custom(format!(
                "invalid shipping_costs value: {other}"
            )));
        }
    };
    Ok(Some(parsed.round_dp(2)))
}

fn decimal_from_number(raw: serde_json::Number) -> std::result::Result<Decimal, rust_decimal::Error> {
    Decimal::from_str(&raw.to_string())
}
