//! Management of already-published listings via the site's account endpoints.
//!
//! All requests are issued from inside the logged-in page so they carry the
//! live session. The caller is expected to have navigated to the site and
//! verified the login beforehand.

use std::path::Path;

use serde_json::Value;
use tracing::{info, warn};

use crate::ads::{self, AdSelector};
use crate::publish::SITE_URL;
use crate::scraper::Scraper;
use crate::utils::error::{AppError, Result};

const PAGE_SIZE: u32 = 400;

/// Fetches every published listing of the logged-in account, walking the
/// 1-based paginated management endpoint until the page the response reports
/// as the last one.
pub async fn published_ads(scraper: &Scraper) -> Result<Vec<Value>> {
    let mut listings = Vec::new();
    let mut page = 1u64;
    loop {
        let url = format!(
            "{SITE_URL}/m-meine-anzeigen-verwalten.json?sort=DEFAULT&pageSize={PAGE_SIZE}&pageNum={page}"
        );
        let response = scraper.fetch_json(&url, "GET", &[200]).await?;
        let ads = response
            .pointer("/ads")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        listings.extend(ads);

        match next_page_number(&response) {
            Some(next) => page = next,
            None => break,
        }
    }
    info!("found {} published listing(s)", listings.len());
    Ok(listings)
}

/// The page to fetch next, judged by the response's own paging block. The
/// reported page number is authoritative; a response without a usable paging
/// block ends the walk.
fn next_page_number(response: &Value) -> Option<u64> {
    let current = response.pointer("/paging/pageNum").and_then(Value::as_u64)?;
    let last = response.pointer("/paging/last").and_then(Value::as_u64)?;
    (current < last).then_some(current + 1)
}

pub async fn published_ids(scraper: &Scraper) -> Result<Vec<i64>> {
    Ok(published_ads(scraper)
        .await?
        .iter()
        .filter_map(ads::listing_id)
        .collect())
}

/// Deletes one published listing through the account's delete endpoint.
pub async fn delete_listing(scraper: &Scraper, id: i64) -> Result<()> {
    let url = format!("{SITE_URL}/m-anzeigen-loeschen.json?ids={id}");
    scraper.fetch_json(&url, "POST", &[200]).await?;
    info!("deleted listing {id}");
    Ok(())
}

/// Deletes every published listing the selector addresses. Returns how many
/// were deleted.
pub async fn delete_selected(scraper: &Scraper, selector: &AdSelector) -> Result<usize> {
    let mut deleted = 0;
    for id in published_ids(scraper).await? {
        if selector.matches_listing(id) {
            delete_listing(scraper, id).await?;
            deleted += 1;
        }
    }
    if deleted == 0 {
        warn!("no published listing matched the given selector");
    }
    Ok(deleted)
}

/// Downloads the raw records of the selected published listings into
/// `downloaded-ads/listing_<id>.json` below the config directory.
pub async fn download_listings(
    scraper: &Scraper,
    selector: &AdSelector,
    config_dir: &Path,
    overwrite: bool,
) -> Result<usize> {
    let target_dir = config_dir.join("downloaded-ads");
    std::fs::create_dir_all(&target_dir)?;

    let mut downloaded = 0;
    for listing in published_ads(scraper).await? {
        let Some(id) = ads::listing_id(&listing) else {
            warn!("skipping listing without numeric id");
            continue;
        };
        if !selector.matches_listing(id) {
            continue;
        }
        let target = target_dir.join(format!("listing_{id}.json"));
        if target.exists() && !overwrite {
            info!("skipping listing {id}, {} already exists", target.display());
            continue;
        }
        let rendered = serde_json::to_string_pretty(&listing)?;
        std::fs::write(&target, rendered + "\n")?;
        info!("saved listing {id} to {}", target.display());
        downloaded += 1;
    }
    Ok(downloaded)
}

/// Extracts the numeric ad id from a post-publication confirmation URL.
pub fn extract_ad_id(url: &str) -> Result<i64> {
    let parsed = url::Url::parse(url)
        .map_err(|err| AppError::AdIdMissing {
            url: format!("{url} ({err})"),
        })?;
    parsed
        .query_pairs()
        .find(|(key, _)| key == "adId")
        .and_then(|(_, value)| value.parse().ok())
        .ok_or_else(|| AppError::AdIdMissing {
            url: url.to_string(),
        })
}
