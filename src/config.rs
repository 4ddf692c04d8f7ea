use std::collections::BTreeMap;
use std::path::Path;

use config::{Environment, File, FileFormat};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::ad::{deserialize_shipping_costs, PriceType, ShippingType};
use crate::utils::error::{AppError, Result};

/// Default values applied to every ad; each ad file can override them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdDefaults {
    #[serde(default = "default_price_type")]
    pub price_type: PriceType,
    #[serde(default = "default_shipping_type")]
    pub shipping_type: ShippingType,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub special_attributes: Option<BTreeMap<String, String>>,
    #[serde(default, deserialize_with = "deserialize_shipping_costs")]
    pub shipping_costs: Option<Decimal>,
    #[serde(default)]
    pub shipping_options: Option<Vec<String>>,
    #[serde(default)]
    pub sell_directly: Option<bool>,
}

impl Default for AdDefaults {
    fn default() -> Self {
        Self {
            price_type: default_price_type(),
            shipping_type: default_shipping_type(),
            category: None,
            special_attributes: None,
            shipping_costs: None,
            shipping_options: None,
            sell_directly: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Glob patterns locating the ad files, brace alternation supported.
    #[serde(default = "default_ad_files")]
    pub ad_files: Vec<String>,
    #[serde(default)]
    pub ad_defaults: AdDefaults,
    /// Remote debugging socket of the already-running browser.
    #[serde(default = "default_browser_socket")]
    pub browser_socket: String,
    /// Display name shown by the site when logged in, used to confirm login.
    pub username: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ad_files: default_ad_files(),
            ad_defaults: AdDefaults::default(),
            browser_socket: default_browser_socket(),
            username: String::new(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(File::from(path).format(FileFormat::Json))
            .add_source(Environment::with_prefix("KLEINANZEIGEN").separator("__"))
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ad_files.is_empty() {
            return Err(AppError::Config("ad_files must not be empty".into()));
        }
        if self.username.trim().is_empty() {
            return Err(AppError::Config("username must not be blank".into()));
        }
        parse_browser_socket(&self.browser_socket)?;
        Ok(())
    }
}

/// Splits a `host:port` socket expression, rejecting malformed input early.
pub fn parse_browser_socket(socket: &str) -> Result<(String, u16)> {
    let malformed = || {
        AppError::Config(format!(
            "malformed browser_socket '{socket}', expected format 'host:port'"
        ))
    };
    let (host, port) = socket.split_once(':').ok_or_else(malformed)?;
    if host.is_empty() {
        return Err(malformed());
    }
    let port: u16 = port.parse().map_err(|_| malformed())?;
    Ok((host.to_string(), port))
}

fn default_ad_files() -> Vec<String> {
    vec!["./**/ad_*.{json,yml,yaml}".to_string()]
}

fn default_browser_socket() -> String {
    "127.0.0.1:9222".to_string()
}

fn default_price_type() -> PriceType {
    PriceType::Negotiable
}

fn default_shipping_type() -> ShippingType {
    ShippingType::Shipping
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid_config() -> Config {
        Config {
            ad_files: default_ad_files(),
            ad_defaults: AdDefaults::default(),
            browser_socket: default_browser_socket(),
            username: "marketman".to_string(),
        }
    }

    #[test]
    fn test_defaults() {
        let config = valid_config();
        assert_eq!(config.browser_socket, "127.0.0.1:9222");
        assert_eq!(config.ad_files, vec!["./**/ad_*.{json,yml,yaml}"]);
        assert_eq!(config.ad_defaults.price_type, PriceType::Negotiable);
        assert_eq!(config.ad_defaults.shipping_type, ShippingType::Shipping);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_blank_username_is_rejected() {
        let mut config = valid_config();
        config.username = "   ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_socket_is_rejected() {
        for socket in ["localhost", ":9222", "localhost:", "localhost:http"] {
            assert!(parse_browser_socket(socket).is_err(), "socket '{socket}' should be rejected");
        }
    }

    #[test]
    fn test_socket_parsing() {
        let (host, port) = parse_browser_socket("127.0.0.1:9222").unwrap();
        assert_eq!(host, "127.0.0.1");
        assert_eq!(port, 9222);
    }

    #[test]
    fn test_load_from_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"username": "marketman", "ad_defaults": {{"category": "161/172/fahrraeder"}}}}"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.username, "marketman");
        assert_eq!(config.browser_socket, "127.0.0.1:9222");
        assert_eq!(
            config.ad_defaults.category.as_deref(),
            Some("161/172/fahrraeder")
        );
    }

    #[test]
    fn test_load_rejects_missing_username() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"browser_socket": "127.0.0.1:9222"}}"#).unwrap();
        assert!(Config::load(file.path()).is_err());
    }
}
