//! The ad-publishing workflow.
//!
//! Drives the site's multi-step posting form: category, price, shipping,
//! condition and other special attributes, description, images, then submits
//! and waits for the confirmation page. Steps run strictly in form order;
//! failures abort the current ad and leave its file untouched.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use crate::ads::{self, AdSelector};
use crate::config::Config;
use crate::manage;
use crate::models::{Ad, PriceType, ShippingType};
use crate::poll::PROBE_TIMEOUT;
use crate::scraper::{By, FormControlKind, Is, Scraper};
use crate::shipping;
use crate::utils::error::{AppError, Result};

pub const SITE_URL: &str = "https://www.kleinanzeigen.de";

const CONFIRMATION_MARKER: &str = "p-anzeige-aufgeben-bestaetigung.html?adId=";
const CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(20);
const CAPTCHA_IFRAME: &str =
    "iframe[name^='a-'][src^='https://www.google.com/recaptcha/api2/anchor?']";

const COMMERCIAL_SHIPPING_SELECT: &str = r#"//select[contains(@id, ".versand_s")]"#;

const CONDITION_ATTRIBUTE: &str = "condition";
const CONDITION_LABELS: &[(&str, &str)] = &[
    ("new", "Neu"),
    ("like_new", "Sehr Gut"),
    ("alright", "Gut"),
    ("ok", "In Ordnung"),
    ("defect", "Defekt"),
];

/// Checkpoint hook invoked when a CAPTCHA is detected. The workflow blocks
/// until the implementation reports that the operator solved it.
#[async_trait]
pub trait ConfirmationGate: Send + Sync {
    async fn confirm(&self, prompt: &str) -> Result<()>;
}

/// Reads a line from standard input to let a human operator intervene.
pub struct StdinGate;

#[async_trait]
impl ConfirmationGate for StdinGate {
    async fn confirm(&self, prompt: &str) -> Result<()> {
        eprintln!("{prompt}");
        eprintln!("Press ENTER to continue...");
        let mut line = String::new();
        BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PublishOptions {
    pub selector: AdSelector,
    /// Delete the previously published listing before republishing.
    pub keep_old: bool,
}

pub struct Publisher<'a> {
    scraper: &'a Scraper,
    gate: &'a dyn ConfirmationGate,
}

/// Publishes every selected ad file. Returns how many were published.
pub async fn publish_ads(
    scraper: &Scraper,
    config: &Config,
    config_dir: &Path,
    gate: &dyn ConfirmationGate,
    options: &PublishOptions,
) -> Result<usize> {
    let files = ads::load_selected(config, config_dir, &options.selector)?;
    if files.is_empty() {
        warn!("no ad file matched the given selector");
        return Ok(0);
    }

    scraper.goto(SITE_URL).await?;
    scraper.ensure_logged_in(&config.username).await?;

    let published_ids = manage::published_ids(scraper).await?;
    let publisher = Publisher::new(scraper, gate);
    let now = Utc::now();

    let mut published = 0;
    for mut file in files {
        // An ad whose listing is still live is only replaced when something
        // asked for the republication deliberately; a blanket selection must
        // not duplicate or churn live listings.
        if let Some(id) = file.ad.id {
            if published_ids.contains(&id) {
                if !republish_deliberate(&file, &options.selector, now) {
                    info!(
                        "skipping {}: listing {id} is still published",
                        file.path.display()
                    );
                    continue;
                }
                if !options.keep_old {
                    manage::delete_listing(scraper, id).await?;
                }
            }
        }

        let ad_dir = file.path.parent().unwrap_or_else(|| Path::new("."));
        info!("publishing '{}' from {}", file.ad.title, file.path.display());
        match publisher.publish_ad(&file.ad, ad_dir).await {
            Ok(new_id) => {
                file.partial.id = Some(new_id);
                file.partial.updated_on = Some(Utc::now());
                file.partial.content_hash = Some(file.ad.content_hash()?);
                ads::save_ad_file(&file.path, &file.partial)?;
                info!("published '{}' as listing {new_id}", file.ad.title);
                published += 1;
            }
            Err(err) => {
                error!(
                    "failed to publish '{}' from {}: {err}",
                    file.ad.title,
                    file.path.display()
                );
            }
        }
    }
    Ok(published)
}

/// Assigns the description through a template literal; backticks in the text
/// are neutralized so they cannot terminate the literal early.
fn description_injection_script(description: &str) -> String {
    format!(
        "document.querySelector('#pstad-descrptn').value = `{}`",
        description.replace('`', "'")
    )
}

/// Resolves each image path against the ad file's directory, leaving absolute
/// paths untouched.
fn resolved_image_paths(ad: &Ad, ad_dir: &Path) -> Vec<String> {
    ad.images
        .iter()
        .map(|image| {
            ads::resolve_relative_path(ad_dir, image)
                .to_string_lossy()
                .into_owned()
        })
        .collect()
}

/// A still-published listing is only replaced when the republication was
/// asked for deliberately: the ad is addressed by id, is due, or has changed
/// since the last publish.
fn republish_deliberate(file: &ads::AdFile, selector: &AdSelector, now: DateTime<Utc>) -> bool {
    let addressed = file
        .ad
        .id
        .is_some_and(|id| selector.addresses_id(id));
    addressed || ads::is_due(&file.ad, now) || ads::hash_changed(&file.ad)
}

impl<'a> Publisher<'a> {
    pub fn new(scraper: &'a Scraper, gate: &'a dyn ConfirmationGate) -> Self {
        Self { scraper, gate }
    }

    /// Fills and submits the posting form for one ad, returning the new
    /// listing id from the confirmation page. Relative image paths are
    /// resolved against `ad_dir`, the directory of the ad's file.
    pub async fn publish_ad(&self, ad: &Ad, ad_dir: &Path) -> Result<i64> {
        self.scraper
            .goto(&format!("{SITE_URL}/p-anzeige-aufgeben-schritt2.html"))
            .await?;

        self.set_title(ad).await?;
        self.set_category(ad).await?;
        self.set_price(ad).await?;
        self.set_shipping(ad).await?;
        self.set_special_attributes(ad).await?;
        self.set_description(ad).await?;
        self.upload_images(ad, ad_dir).await?;
        self.challenge_checkpoint().await?;
        self.submit().await?;
        self.await_confirmation().await
    }

    async fn set_title(&self, ad: &Ad) -> Result<()> {
        self.scraper.input(By::Id("postad-title"), &ad.title).await?;
        Ok(())
    }

    /// Navigates the category chooser. A configured category path always wins;
    /// auto-detection from the title is only a best-effort fallback.
    async fn set_category(&self, ad: &Ad) -> Result<()> {
        // Clicking into the description field makes the site reveal the
        // category it derived from the title.
        self.scraper.click(By::Css("#pstad-descrptn")).await?;
        let detected = self
            .scraper
            .text_with_timeout(By::Id("postad-category-path"), PROBE_TIMEOUT)
            .await
            .ok()
            .filter(|path| !path.trim().is_empty());

        if ad.category.is_empty() {
            return match detected {
                Some(path) => {
                    info!("using auto-detected category '{}'", path.trim());
                    Ok(())
                }
                None => Err(AppError::Validation(
                    "no category was supplied and category auto-detection failed".into(),
                )),
            };
        }

        info!("selecting category '{}'", ad.category);
        self.scraper
            .goto(&format!(
                "{SITE_URL}/p-kategorie-aendern.html#?path={}",
                ad.category
            ))
            .await?;
        self.scraper
            .click(By::XPath("//*[@id='postad-step1-sbmt']/button"))
            .await?;
        Ok(())
    }

    async fn set_price(&self, ad: &Ad) -> Result<()> {
        match ad.price_type {
            PriceType::NotApplicable => {}
            price_type => {
                self.scraper
                    .select(By::Css("#micro-frontend-price-type"), price_type.as_str())
                    .await?;
            }
        }
        if let (Some(price), PriceType::Fixed | PriceType::Negotiable) = (ad.price, ad.price_type) {
            self.scraper
                .input(
                    By::Css("input#post-ad-frontend-price, input#micro-frontend-price, input#pstad-price"),
                    &price.to_string(),
                )
                .await?;
        }
        Ok(())
    }

    async fn set_shipping(&self, ad: &Ad) -> Result<()> {
        match ad.shipping_type {
            ShippingType::Pickup => {
                let selected = self
                    .scraper
                    .click(By::XPath(
                        r#"//*[contains(@class, "ShippingPickupSelector")]//label[contains(., "Nur Abholung")]/../input[@type="radio"]"#,
                    ))
                    .await;
                match selected {
                    Ok(_) => {}
                    // Some form variants show no pickup radio at all.
                    Err(err) if err.is_timeout() => {
                        warn!("pickup radio not offered by the form, skipping: {err}");
                    }
                    Err(err) => return Err(err),
                }
            }
            ShippingType::Shipping => {
                if let Some(options) = ad
                    .shipping_options
                    .as_ref()
                    .filter(|options| !options.is_empty())
                {
                    let plan = shipping::resolve(options)?;
                    self.apply_shipping_options(&plan).await?;
                } else if self.commercial_shipping_selector_shown().await? {
                    // Commercial accounts get a plain select instead of the
                    // carrier dialog.
                    self.scraper
                        .select(By::XPath(COMMERCIAL_SHIPPING_SELECT), "ja")
                        .await?;
                } else if let Some(costs) = &ad.shipping_costs {
                    self.set_individual_shipping_costs(&costs.to_string()).await?;
                }
            }
            ShippingType::NotApplicable => {}
        }
        Ok(())
    }

    async fn commercial_shipping_selector_shown(&self) -> Result<bool> {
        match self
            .scraper
            .check_with_timeout(By::XPath(COMMERCIAL_SHIPPING_SELECT), Is::Displayed, PROBE_TIMEOUT)
            .await
        {
            Ok(shown) => Ok(shown),
            Err(err) if err.is_timeout() => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn set_individual_shipping_costs(&self, costs: &str) -> Result<()> {
        self.open_shipping_dialog().await?;
        self.scraper
            .click(By::XPath(
                r#"//*[contains(@id, "INDIVIDUAL") and contains(@data-testid, "Individueller Versand")]"#,
            ))
            .await?;
        self.scraper
            .input(
                By::Css(r#".IndividualShippingInput input[type="text"]"#),
                &costs.replace('.', ","),
            )
            .await?;
        self.close_shipping_dialog().await
    }

    /// Picks the size class inside the shipping dialog, confirms it via the
    /// continue control, then toggles the package checkboxes on the second
    /// pane. A package checkbox that never appears is logged and skipped;
    /// failing to close the dialog is fatal because it would leave the form
    /// behind a modal.
    async fn apply_shipping_options(&self, plan: &shipping::ShippingPlan) -> Result<()> {
        self.open_shipping_dialog().await?;

        let size_selector = format!(
            r#".SingleSelectionItem--Main input[type=radio][data-testid="{}"]"#,
            plan.size
        );
        match self.scraper.check(By::Css(&size_selector), Is::Selected).await {
            Ok(size_already_selected) => {
                if !size_already_selected {
                    self.scraper.click(By::Css(&size_selector)).await?;
                }
                self.scraper
                    .click(By::XPath(r#"//dialog//button[contains(., "Weiter")]"#))
                    .await?;

                for package in shipping::packages_to_toggle(plan, size_already_selected) {
                    let toggle =
                        format!(r#"//dialog//input[contains(@data-testid, "{package}")]"#);
                    match self.scraper.click(By::XPath(&toggle)).await {
                        Ok(_) => {}
                        Err(err) if err.is_timeout() => {
                            warn!("package option '{package}' not offered by the form, skipping");
                        }
                        Err(err) => return Err(err),
                    }
                }
            }
            Err(err) if err.is_timeout() => {
                warn!("shipping size selection not offered by the form, skipping: {err}");
            }
            Err(err) => return Err(err),
        }

        self.close_shipping_dialog().await
    }

    async fn open_shipping_dialog(&self) -> Result<()> {
        self.scraper
            .click(By::XPath(
                r#"//*[contains(@class, "SubSection")]//button[contains(@class, "SelectionButton")]"#,
            ))
            .await?;
        self.scraper
            .click(By::XPath(
                r#"//*[contains(@class, "CarrierSelectionModal")]//button[contains(., "Andere Versandmethoden")]"#,
            ))
            .await?;
        Ok(())
    }

    async fn close_shipping_dialog(&self) -> Result<()> {
        self.scraper
            .click(By::XPath(r#"//dialog//button[contains(., "Fertig")]"#))
            .await
            .map_err(|_| AppError::Browser("unable to close shipping dialog".into()))?;
        Ok(())
    }

    /// Fills category-specific attribute fields, the item condition among
    /// them. Field names address form controls whose id contains
    /// `attributeMap[<name>]` or `<name>_s`.
    async fn set_special_attributes(&self, ad: &Ad) -> Result<()> {
        let Some(attributes) = &ad.special_attributes else {
            return Ok(());
        };
        for (field, value) in attributes {
            if field == CONDITION_ATTRIBUTE {
                self.set_condition(value).await?;
                continue;
            }
            self.set_attribute_field(field, value).await?;
        }
        Ok(())
    }

    async fn set_attribute_field(&self, field: &str, value: &str) -> Result<()> {
        info!("setting special attribute '{field}' to '{value}'");
        let selector = format!(
            r#"[id*="attributeMap[{field}]"], [id*="{field}_s"]"#
        );
        let control = self
            .scraper
            .find_with_timeout(By::Css(&selector), PROBE_TIMEOUT)
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    AppError::AttributeFieldNotFound {
                        field: field.to_string(),
                    }
                } else {
                    err
                }
            })?;

        match self.scraper.inspect_control(&control)? {
            FormControlKind::Selection => {
                self.scraper
                    .select_value(&control, value, &format!("attribute field '{field}'"))?;
            }
            FormControlKind::Checkbox => {
                if !self.scraper.state(&control, Is::Selected)? {
                    control.click().map_err(AppError::from)?;
                }
            }
            FormControlKind::Text => {
                self.scraper.fill(&control, value)?;
            }
        }
        self.scraper.pause().await;
        Ok(())
    }

    /// The condition is set through its own chip dialog, not a form field.
    async fn set_condition(&self, condition: &str) -> Result<()> {
        let label = CONDITION_LABELS
            .iter()
            .find(|(key, _)| *key == condition)
            .map(|(_, label)| *label)
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "unknown condition '{condition}', expected one of: new, like_new, alright, ok, defect"
                ))
            })?;

        self.scraper
            .click(By::XPath(
                r#"//*[contains(@class, "ConditionSelector")]//button"#,
            ))
            .await?;
        self.scraper
            .click(By::XPath(&format!(
                r#"//dialog//label[contains(., "{label}")]"#
            )))
            .await?;
        self.scraper
            .click(By::XPath(r#"//dialog//button[contains(., "Bestätigen")]"#))
            .await?;
        Ok(())
    }

    /// The description is injected by script rather than typed; simulated
    /// typing is too slow for long texts and trips the editor's key handlers.
    async fn set_description(&self, ad: &Ad) -> Result<()> {
        self.scraper
            .execute(&description_injection_script(&ad.description))
            .await?;
        self.scraper.pause().await;
        if ad.sell_directly == Some(true) {
            // Buy-now checkbox only exists for shippable categories.
            if let Ok(false) = self
                .scraper
                .check_with_timeout(
                    By::Id("radio-buy-now-yes"),
                    Is::Selected,
                    PROBE_TIMEOUT,
                )
                .await
            {
                self.scraper.click(By::Id("radio-buy-now-yes")).await.ok();
            }
        }
        Ok(())
    }

    async fn upload_images(&self, ad: &Ad, ad_dir: &Path) -> Result<()> {
        if ad.images.is_empty() {
            return Ok(());
        }
        let input = self
            .scraper
            .find(By::Css(r#"input[type="file"]"#))
            .await?;
        let resolved = resolved_image_paths(ad, ad_dir);
        let paths: Vec<&str> = resolved.iter().map(String::as_str).collect();
        input.set_input_files(&paths).map_err(AppError::from)?;
        // Give the uploader some head start before moving on.
        tokio::time::sleep(Duration::from_secs(2)).await;
        self.scraper.pause().await;
        Ok(())
    }

    /// Detects a CAPTCHA iframe and hands control to the operator before
    /// submitting. The page is scrolled down first so the challenge is
    /// visible.
    async fn challenge_checkpoint(&self) -> Result<()> {
        let captcha = self
            .scraper
            .check_with_timeout(By::Css(CAPTCHA_IFRAME), Is::Displayed, PROBE_TIMEOUT)
            .await;
        match captcha {
            Ok(true) => {
                self.scraper.scroll_page_down().await?;
                self.gate
                    .confirm("CAPTCHA detected. Please solve it in the browser.")
                    .await
            }
            Ok(false) => Ok(()),
            Err(err) if err.is_timeout() => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn submit(&self) -> Result<()> {
        let clicked = self.scraper.click(By::Id("pstad-submit")).await;
        if let Err(err) = clicked {
            if !err.is_timeout() {
                return Err(err);
            }
            // Reworked form variant: the submit button lives in a fieldset.
            self.scraper
                .click(By::XPath(
                    r#"//fieldset[@id='postad-publish']//*[contains(., 'Anzeige aufgeben')]"#,
                ))
                .await?;
            self.scraper.click(By::Css("#imprint-guidance-submit")).await.ok();
        }

        // Publishing without an image triggers an interstitial hint.
        if let Ok(hint) = self
            .scraper
            .find_with_timeout(
                By::XPath(r#"//button[contains(., "Ohne Bild veröffentlichen")]"#),
                PROBE_TIMEOUT,
            )
            .await
        {
            hint.click().map_err(AppError::from)?;
            self.scraper.pause().await;
        }
        Ok(())
    }

    /// Waits for the confirmation page and extracts the new listing id. The
    /// id must be read before touching anything else: dismissing the
    /// manual-approval notice navigates away from the confirmation URL.
    async fn await_confirmation(&self) -> Result<i64> {
        self.scraper
            .wait_for(
                || self.scraper.url().contains(CONFIRMATION_MARKER),
                CONFIRMATION_TIMEOUT,
                "confirmation page did not appear",
            )
            .await?;
        let ad_id = manage::extract_ad_id(&self.scraper.url())?;

        if let Ok(approval_link) = self
            .scraper
            .find_with_timeout(
                By::XPath(
                    r#"//*[contains(@id, "not-completed")]//a[contains(@class, "to-my-ads-link")]"#,
                ),
                PROBE_TIMEOUT,
            )
            .await
        {
            info!("listing requires manual approval by the site");
            if let Err(err) = approval_link.click() {
                warn!("could not dismiss the approval notice: {err:#}");
            }
            self.scraper.pause().await;
        }

        Ok(ad_id)
    }
}
