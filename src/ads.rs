//! Ad file discovery, loading and selection.
//!
//! Ad descriptions live in JSON files matched by configurable glob patterns.
//! Commands pick their working set through an [`AdSelector`] parsed from the
//! command line.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::Config;
use crate::models::{Ad, AdPartial};
use crate::utils::error::{AppError, Result};

/// A loaded ad file, keeping its origin path so results can be written back.
#[derive(Debug)]
pub struct AdFile {
    pub path: PathBuf,
    pub partial: AdPartial,
    pub ad: Ad,
}

/// Parsed `--ads` tokens. Tokens combine as a union.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectorToken {
    All,
    New,
    Due,
    Changed,
    Id(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdSelector {
    tokens: Vec<SelectorToken>,
}

impl AdSelector {
    pub fn parse(raw: &str) -> Result<Self> {
        let mut tokens = Vec::new();
        for part in raw.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let token = match part.to_lowercase().as_str() {
                "all" => SelectorToken::All,
                "new" => SelectorToken::New,
                "due" => SelectorToken::Due,
                "changed" => SelectorToken::Changed,
                other => match other.parse::<i64>() {
                    Ok(id) => SelectorToken::Id(id),
                    Err(_) => {
                        return Err(AppError::Validation(format!(
                            "unsupported ad selector '{part}', expected all, new, due, changed or a numeric ad ID"
                        )));
                    }
                },
            };
            if !tokens.contains(&token) {
                tokens.push(token);
            }
        }
        if tokens.is_empty() {
            return Err(AppError::Validation(
                "no ad selector given, expected all, new, due, changed or a numeric ad ID".into(),
            ));
        }
        Ok(Self { tokens })
    }

    pub fn all() -> Self {
        Self {
            tokens: vec![SelectorToken::All],
        }
    }

    pub fn selects_all(&self) -> bool {
        self.tokens.contains(&SelectorToken::All)
    }

    fn selected_ids(&self) -> Vec<i64> {
        self.tokens
            .iter()
            .filter_map(|token| match token {
                SelectorToken::Id(id) => Some(*id),
                _ => None,
            })
            .collect()
    }

    /// Whether a loaded ad file falls into the working set at `now`.
    pub fn matches(&self, file: &AdFile, now: DateTime<Utc>) -> bool {
        self.tokens.iter().any(|token| match token {
            SelectorToken::All => true,
            SelectorToken::New => file.ad.id.is_none(),
            SelectorToken::Due => is_due(&file.ad, now),
            SelectorToken::Changed => hash_changed(&file.ad),
            SelectorToken::Id(id) => file.ad.id == Some(*id),
        })
    }

    /// Whether a published listing that has no local ad file is in scope.
    /// Only `all` and explicit IDs can address such listings.
    pub fn matches_listing(&self, listing_id: i64) -> bool {
        self.selects_all() || self.addresses_id(listing_id)
    }

    /// Whether the selector names this id explicitly.
    pub fn addresses_id(&self, id: i64) -> bool {
        self.selected_ids().contains(&id)
    }
}

/// An ad is due for republication once its configured interval has elapsed
/// since the last update (or initial creation).
pub fn is_due(ad: &Ad, now: DateTime<Utc>) -> bool {
    let Some(interval_days) = ad.republication_interval else {
        return false;
    };
    let Some(reference) = ad.updated_on.or(ad.created_on) else {
        return false;
    };
    now - reference >= Duration::days(interval_days)
}

/// Whether the ad's current content no longer matches its stored hash.
/// Ads without a stored hash are not considered changed.
pub fn hash_changed(ad: &Ad) -> bool {
    match (&ad.content_hash, ad.content_hash()) {
        (Some(stored), Ok(current)) => current != *stored,
        _ => false,
    }
}

/// Expands one level of `{a,b,c}` alternation into plain glob patterns.
pub fn expand_braces(pattern: &str) -> Vec<String> {
    let Some(open) = pattern.find('{') else {
        return vec![pattern.to_string()];
    };
    let Some(close) = pattern[open..].find('}').map(|i| open + i) else {
        return vec![pattern.to_string()];
    };
    let prefix = &pattern[..open];
    let suffix = &pattern[close + 1..];
    pattern[open + 1..close]
        .split(',')
        .flat_map(|alt| expand_braces(&format!("{prefix}{alt}{suffix}")))
        .collect()
}

/// Resolves `path` against `base` unless it is already absolute.
pub fn resolve_relative_path(base: &Path, path: &str) -> PathBuf {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base.join(candidate)
    }
}

/// Finds all ad files matched by the configured glob patterns. Patterns are
/// resolved relative to the config file's directory.
pub fn discover_ad_files(config: &Config, config_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut found = BTreeSet::new();
    for pattern in &config.ad_files {
        let resolved = resolve_relative_path(config_dir, pattern);
        let resolved = resolved.to_string_lossy().into_owned();
        for expanded in expand_braces(&resolved) {
            for entry in glob::glob(&expanded)? {
                match entry {
                    Ok(path) => {
                        found.insert(path);
                    }
                    Err(err) => warn!("skipping unreadable glob match: {err}"),
                }
            }
        }
    }
    debug!("found {} ad file(s)", found.len());
    Ok(found.into_iter().collect())
}

/// Loads one ad file and merges it with the configured defaults.
pub fn load_ad_file(path: &Path, config: &Config) -> Result<AdFile> {
    let raw = std::fs::read_to_string(path)?;
    let partial: AdPartial = serde_json::from_str(&raw)
        .map_err(|err| AppError::Config(format!("invalid ad file {}: {err}", path.display())))?;
    let ad = partial
        .to_ad(&config.ad_defaults)
        .map_err(|err| AppError::Config(format!("invalid ad file {}: {err}", path.display())))?;
    Ok(AdFile {
        path: path.to_path_buf(),
        partial,
        ad,
    })
}

/// Loads every discovered ad file, keeping only those the selector matches.
pub fn load_selected(
    config: &Config,
    config_dir: &Path,
    selector: &AdSelector,
) -> Result<Vec<AdFile>> {
    let now = Utc::now();
    let mut selected = Vec::new();
    for path in discover_ad_files(config, config_dir)? {
        let file = load_ad_file(&path, config)?;
        if selector.matches(&file, now) {
            selected.push(file);
        } else {
            debug!("skipping {} (not selected)", path.display());
        }
    }
    Ok(selected)
}

/// Writes the (possibly updated) raw ad description back to its file.
pub fn save_ad_file(path: &Path, partial: &AdPartial) -> Result<()> {
    let rendered = serde_json::to_string_pretty(partial)?;
    std::fs::write(path, rendered + "\n")?;
    Ok(())
}

/// Checks every discovered ad file for syntax and validation errors.
pub fn verify(config: &Config, config_dir: &Path) -> Result<usize> {
    let paths = discover_ad_files(config, config_dir)?;
    let mut failures = 0;
    for path in &paths {
        match load_ad_file(path, config) {
            Ok(_) => tracing::info!("OK: {}", path.display()),
            Err(err) => {
                failures += 1;
                tracing::error!("INVALID: {}: {err}", path.display());
            }
        }
    }
    if failures > 0 {
        return Err(AppError::Validation(format!(
            "{failures} of {} ad file(s) failed validation",
            paths.len()
        )));
    }
    Ok(paths.len())
}

/// Recomputes and stores the content hash of every discovered ad file, so
/// manual edits no longer count as changed.
pub fn update_content_hashes(config: &Config, config_dir: &Path) -> Result<usize> {
    let mut updated = 0;
    for path in discover_ad_files(config, config_dir)? {
        let mut file = load_ad_file(&path, config)?;
        let hash = file.ad.content_hash()?;
        if file.partial.content_hash.as_deref() != Some(hash.as_str()) {
            file.partial.content_hash = Some(hash);
            save_ad_file(&path, &file.partial)?;
            updated += 1;
            tracing::info!("updated content hash of {}", path.display());
        }
    }
    Ok(updated)
}

/// Extracts the raw `serde_json::Value` of a published listing's numeric id.
pub fn listing_id(listing: &Value) -> Option<i64> {
    listing.get("id").and_then(Value::as_i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AdDefaults;
    use chrono::TimeZone;
    use std::io::Write;

    fn minimal_ad_json(extra: &str) -> String {
        format!(
            r#"{{
                "title": "Bicycle in good shape",
                "description": "Trusty city bicycle, some scratches.",
                "category": "161/27"{}{extra}
            }}"#,
            if extra.is_empty() { "" } else { "," }
        )
    }

    fn load(raw: &str) -> AdFile {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ad_test.json");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(raw.as_bytes())
            .unwrap();
        let config = Config {
            ad_defaults: AdDefaults::default(),
            ..Config::default()
        };
        load_ad_file(&path, &config).unwrap()
    }

    #[test]
    fn test_selector_parses_keywords_and_ids() {
        let selector = AdSelector::parse("new, due,12345").unwrap();
        assert_eq!(
            selector.tokens,
            vec![
                SelectorToken::New,
                SelectorToken::Due,
                SelectorToken::Id(12345)
            ]
        );
    }

    #[test]
    fn test_selector_rejects_garbage() {
        assert!(AdSelector::parse("soonish").is_err());
        assert!(AdSelector::parse("").is_err());
    }

    #[test]
    fn test_new_matches_only_unpublished_ads() {
        let selector = AdSelector::parse("new").unwrap();
        let now = Utc::now();
        let unpublished = load(&minimal_ad_json(""));
        let published = load(&minimal_ad_json(r#""id": 99"#));
        assert!(selector.matches(&unpublished, now));
        assert!(!selector.matches(&published, now));
    }

    #[test]
    fn test_id_token_matches_exactly() {
        let selector = AdSelector::parse("99").unwrap();
        let now = Utc::now();
        assert!(selector.matches(&load(&minimal_ad_json(r#""id": 99"#)), now));
        assert!(!selector.matches(&load(&minimal_ad_json(r#""id": 100"#)), now));
        assert!(!selector.matches(&load(&minimal_ad_json("")), now));
    }

    #[test]
    fn test_due_requires_elapsed_interval() {
        let now = Utc.with_ymd_and_hms(2024, 3, 20, 12, 0, 0).unwrap();
        let stale = load(&minimal_ad_json(
            r#""id": 1, "republication_interval": 7, "updated_on": "2024-03-01T00:00:00Z""#,
        ));
        let fresh = load(&minimal_ad_json(
            r#""id": 2, "republication_interval": 7, "updated_on": "2024-03-18T00:00:00Z""#,
        ));
        let no_interval = load(&minimal_ad_json(r#""id": 3, "updated_on": "2020-01-01T00:00:00Z""#));
        assert!(is_due(&stale.ad, now));
        assert!(!is_due(&fresh.ad, now));
        assert!(!is_due(&no_interval.ad, now));
    }

    #[test]
    fn test_due_falls_back_to_created_on() {
        let now = Utc.with_ymd_and_hms(2024, 3, 20, 12, 0, 0).unwrap();
        let ad = load(&minimal_ad_json(
            r#""id": 1, "republication_interval": 7, "created_on": "2024-03-01T00:00:00Z""#,
        ));
        assert!(is_due(&ad.ad, now));
    }

    #[test]
    fn test_changed_compares_stored_hash() {
        let selector = AdSelector::parse("changed").unwrap();
        let now = Utc::now();
        let pristine = load(&minimal_ad_json(""));
        let current_hash = pristine.ad.content_hash().unwrap();
        let unchanged = load(&minimal_ad_json(&format!(r#""content_hash": "{current_hash}""#)));
        let changed = load(&minimal_ad_json(r#""content_hash": "0000""#));
        assert!(!selector.matches(&pristine, now), "no stored hash means not changed");
        assert!(!selector.matches(&unchanged, now));
        assert!(selector.matches(&changed, now));
    }

    #[test]
    fn test_listing_selector_only_honors_all_and_ids() {
        assert!(AdSelector::all().matches_listing(7));
        assert!(AdSelector::parse("7").unwrap().matches_listing(7));
        assert!(!AdSelector::parse("8").unwrap().matches_listing(7));
        assert!(!AdSelector::parse("new,due,changed").unwrap().matches_listing(7));
    }

    #[test]
    fn test_brace_expansion() {
        assert_eq!(
            expand_braces("./**/ad_*.{json,yml,yaml}"),
            vec!["./**/ad_*.json", "./**/ad_*.yml", "./**/ad_*.yaml"]
        );
        assert_eq!(expand_braces("./ads/*.json"), vec!["./ads/*.json"]);
    }

    #[test]
    fn test_discovery_resolves_patterns_relative_to_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("ads");
        std::fs::create_dir(&nested).unwrap();
        std::fs::write(nested.join("ad_bike.json"), minimal_ad_json("")).unwrap();
        std::fs::write(nested.join("notes.txt"), "not an ad").unwrap();

        let config = Config {
            ad_files: vec!["**/ad_*.{json,yml,yaml}".into()],
            ..Config::default()
        };
        let found = discover_ad_files(&config, dir.path()).unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].ends_with("ads/ad_bike.json"));
    }

    #[test]
    fn test_update_content_hashes_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ad_bike.json"), minimal_ad_json("")).unwrap();
        let config = Config {
            ad_files: vec!["ad_*.json".into()],
            ..Config::default()
        };
        assert_eq!(update_content_hashes(&config, dir.path()).unwrap(), 1);
        assert_eq!(update_content_hashes(&config, dir.path()).unwrap(), 0);
    }
}
