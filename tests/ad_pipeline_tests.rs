//! End-to-end tests of the offline ad pipeline: discovery, defaults merging,
//! selection and content hashing, run against real files in a temp directory.

use std::fs;
use std::path::Path;

use chrono::{TimeZone, Utc};
use kleinanzeigen_pilot::ads::{self, AdSelector};
use kleinanzeigen_pilot::config::{AdDefaults, Config};
use kleinanzeigen_pilot::models::{PriceType, ShippingType};
use tempfile::TempDir;

fn write_config(dir: &Path) -> Config {
    let config = serde_json::json!({
        "username": "max.mustermann",
        "ad_files": ["**/ad_*.{json,yml}"],
        "ad_defaults": {
            "category": "161/27",
            "price_type": "NEGOTIABLE",
            "shipping_type": "SHIPPING",
            "shipping_options": ["DHL_5"]
        }
    });
    let path = dir.join("config.json");
    fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
    Config::load(&path).unwrap()
}

fn write_ad(dir: &Path, name: &str, body: serde_json::Value) {
    fs::write(dir.join(name), serde_json::to_string_pretty(&body).unwrap()).unwrap();
}

#[test]
fn discovery_applies_brace_patterns_below_the_config_dir() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    let nested = dir.path().join("bikes");
    fs::create_dir(&nested).unwrap();
    write_ad(
        &nested,
        "ad_city_bike.json",
        serde_json::json!({
            "title": "City bike, 28 inch",
            "description": "Well maintained commuter bike."
        }),
    );
    write_ad(
        dir.path(),
        "draft_scooter.json",
        serde_json::json!({"title": "not matched by the pattern"}),
    );

    let found = ads::discover_ad_files(&config, dir.path()).unwrap();
    assert_eq!(found.len(), 1);
    assert!(found[0].ends_with("bikes/ad_city_bike.json"));
}

#[test]
fn defaults_fill_gaps_but_never_override_explicit_values() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());
    write_ad(
        dir.path(),
        "ad_lamp.json",
        serde_json::json!({
            "title": "Vintage desk lamp",
            "description": "Brass desk lamp from the seventies.",
            "price": 30,
            "price_type": "FIXED",
            "shipping_type": "PICKUP"
        }),
    );

    let found = ads::discover_ad_files(&config, dir.path()).unwrap();
    let file = ads::load_ad_file(&found[0], &config).unwrap();

    // Explicit values win over defaults.
    assert_eq!(file.ad.price_type, PriceType::Fixed);
    assert_eq!(file.ad.shipping_type, ShippingType::Pickup);
    // Gaps are filled from the defaults.
    assert_eq!(file.ad.category, "161/27");
    assert_eq!(file.ad.shipping_options.as_deref(), Some(&["DHL_5".to_string()][..]));
}

#[test]
fn image_paths_resolve_against_the_ad_file_directory_not_the_cwd() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());
    let nested = dir.path().join("bikes");
    fs::create_dir(&nested).unwrap();
    write_ad(
        &nested,
        "ad_bike.json",
        serde_json::json!({
            "title": "City bike, 28 inch",
            "description": "Well maintained commuter bike.",
            "images": ["img/front.jpg"]
        }),
    );

    let found = ads::discover_ad_files(&config, dir.path()).unwrap();
    let file = ads::load_ad_file(&found[0], &config).unwrap();

    // The authored value stays relative so the content hash is unaffected by
    // where the ad directory lives.
    assert_eq!(file.ad.images, ["img/front.jpg"]);
    // Resolution against the ad file's own directory is what reaches the
    // browser at upload time.
    let resolved =
        ads::resolve_relative_path(file.path.parent().unwrap(), &file.ad.images[0]);
    assert_eq!(resolved, dir.path().join("bikes/img/front.jpg"));
}

#[test]
fn invalid_ad_files_fail_verification_with_their_path_in_the_error() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());
    write_ad(
        dir.path(),
        "ad_broken.json",
        serde_json::json!({
            "title": "short",
            "description": "Title is below the minimum length."
        }),
    );

    let err = ads::verify(&config, dir.path()).unwrap_err();
    assert!(err.to_string().contains("1 of 1"));
}

#[test]
fn selector_union_combines_new_due_and_ids() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());
    write_ad(
        dir.path(),
        "ad_new.json",
        serde_json::json!({
            "title": "Never published before",
            "description": "This ad has no listing id yet."
        }),
    );
    write_ad(
        dir.path(),
        "ad_stale.json",
        serde_json::json!({
            "title": "Published long ago",
            "description": "Due for republication by interval.",
            "id": 111,
            "republication_interval": 7,
            "updated_on": "2024-01-01T00:00:00Z"
        }),
    );
    write_ad(
        dir.path(),
        "ad_fresh.json",
        serde_json::json!({
            "title": "Published yesterday",
            "description": "Not due, not addressed by id.",
            "id": 222,
            "republication_interval": 30,
            "updated_on": "2024-03-19T00:00:00Z"
        }),
    );

    let now = Utc.with_ymd_and_hms(2024, 3, 20, 12, 0, 0).unwrap();
    let selector = AdSelector::parse("new,due").unwrap();
    let mut matched: Vec<String> = ads::discover_ad_files(&config, dir.path())
        .unwrap()
        .iter()
        .map(|path| ads::load_ad_file(path, &config).unwrap())
        .filter(|file| selector.matches(file, now))
        .map(|file| file.path.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    matched.sort();
    assert_eq!(matched, ["ad_new.json", "ad_stale.json"]);

    let by_id = AdSelector::parse("222").unwrap();
    let matched_by_id: Vec<_> = ads::discover_ad_files(&config, dir.path())
        .unwrap()
        .iter()
        .map(|path| ads::load_ad_file(path, &config).unwrap())
        .filter(|file| by_id.matches(file, now))
        .collect();
    assert_eq!(matched_by_id.len(), 1);
    assert_eq!(matched_by_id[0].ad.id, Some(222));
}

#[test]
fn content_hash_is_stable_across_reload_and_tracks_edits() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());
    write_ad(
        dir.path(),
        "ad_chair.json",
        serde_json::json!({
            "title": "Mid-century armchair",
            "description": "Reupholstered, very comfortable."
        }),
    );

    assert_eq!(ads::update_content_hashes(&config, dir.path()).unwrap(), 1);
    // A second run finds nothing to do.
    assert_eq!(ads::update_content_hashes(&config, dir.path()).unwrap(), 0);

    let found = ads::discover_ad_files(&config, dir.path()).unwrap();
    let file = ads::load_ad_file(&found[0], &config).unwrap();
    assert!(!ads::hash_changed(&file.ad));

    // Volatile bookkeeping fields do not disturb the hash.
    let mut edited = file.partial.clone();
    edited.id = Some(999);
    edited.updated_on = Some(Utc::now());
    ads::save_ad_file(&found[0], &edited).unwrap();
    let reloaded = ads::load_ad_file(&found[0], &config).unwrap();
    assert!(!ads::hash_changed(&reloaded.ad));

    // A content edit does.
    let mut changed = reloaded.partial.clone();
    changed.title = "Mid-century armchair, teak".into();
    ads::save_ad_file(&found[0], &changed).unwrap();
    let changed_file = ads::load_ad_file(&found[0], &config).unwrap();
    assert!(ads::hash_changed(&changed_file.ad));
}

#[test]
fn failed_load_leaves_the_file_untouched() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());
    let raw = serde_json::to_string_pretty(&serde_json::json!({
        "title": "short",
        "description": "Invalid on purpose."
    }))
    .unwrap();
    fs::write(dir.path().join("ad_invalid.json"), &raw).unwrap();

    let found = ads::discover_ad_files(&config, dir.path()).unwrap();
    assert!(ads::load_ad_file(&found[0], &config).is_err());
    assert_eq!(fs::read_to_string(&found[0]).unwrap(), raw);
}

#[test]
fn merging_fails_without_a_category_from_either_side() {
    let defaults = AdDefaults::default();
    let partial: kleinanzeigen_pilot::models::AdPartial = serde_json::from_value(serde_json::json!({
        "title": "Kitchen table, solid oak",
        "description": "Seats six, minor scratches on one leg."
    }))
    .unwrap();
    assert!(partial.to_ad(&defaults).is_err());
}
