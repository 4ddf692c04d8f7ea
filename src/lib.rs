//! Publishes and manages classified ads on kleinanzeigen.de by driving an
//! already-running browser over its remote debugging protocol.

pub mod ads;
pub mod cli;
pub mod config;
pub mod manage;
pub mod models;
pub mod poll;
pub mod publish;
pub mod scraper;
pub mod shipping;
pub mod utils;

pub use utils::error::{AppError, Result};
