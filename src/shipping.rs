//! Maps the shipping-option tags of an ad onto the site's shipping dialog:
//! one package-size radio plus a set of package checkboxes.

use std::collections::BTreeSet;

use crate::utils::error::{AppError, Result};

/// Known shipping-option tags with their size class and package label,
/// matching the site's current German labels.
const SHIPPING_OPTIONS: &[(&str, &str, &str)] = &[
    ("DHL_2", "Klein", "Paket 2 kg"),
    ("Hermes_Päckchen", "Klein", "Päckchen"),
    ("Hermes_S", "Klein", "S-Paket"),
    ("DHL_5", "Mittel", "Paket 5 kg"),
    ("Hermes_M", "Mittel", "M-Paket"),
    ("DHL_10", "Groß", "Paket 10 kg"),
    ("DHL_20", "Groß", "Paket 20 kg"),
    ("DHL_31,5", "Groß", "Paket 31,5 kg"),
    ("Hermes_L", "Groß", "L-Paket"),
];

/// The single size class and the package labels an ad's tags resolve to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShippingPlan {
    pub size: &'static str,
    pub packages: BTreeSet<&'static str>,
}

/// Resolves requested tags to a [`ShippingPlan`]. Fails on any unrecognized
/// tag (naming the whole offending set) and when the tags span more than one
/// size class, before any UI interaction takes place.
pub fn resolve(requested: &[String]) -> Result<ShippingPlan> {
    if requested.is_empty() {
        return Err(AppError::Validation("no shipping options requested".into()));
    }

    let requested: BTreeSet<&str> = requested.iter().map(String::as_str).collect();
    let mut unknown = Vec::new();
    let mut sizes = BTreeSet::new();
    let mut packages = BTreeSet::new();

    for tag in &requested {
        match SHIPPING_OPTIONS.iter().find(|(known, _, _)| known == tag) {
            Some((_, size, package)) => {
                sizes.insert(*size);
                packages.insert(*package);
            }
            None => unknown.push((*tag).to_string()),
        }
    }

    if !unknown.is_empty() {
        return Err(AppError::UnknownShippingOptions { options: unknown });
    }
    if sizes.len() != 1 {
        return Err(AppError::ShippingSizeConflict {
            sizes: sizes.iter().map(|size| (*size).to_string()).collect(),
        });
    }

    let size = sizes.into_iter().next().unwrap_or_default();
    Ok(ShippingPlan { size, packages })
}

/// Packages that must be clicked in the dialog.
///
/// When the size radio was already selected, leftover packages from a previous
/// state may still be checked, so the *unwanted* packages of that size class
/// are toggled off. A freshly selected size starts blank, so the requested
/// packages are toggled on.
pub fn packages_to_toggle(plan: &ShippingPlan, size_already_selected: bool) -> Vec<&'static str> {
    if size_already_selected {
        SHIPPING_OPTIONS
            .iter()
            .filter(|(_, size, package)| *size == plan.size && !plan.packages.contains(package))
            .map(|(_, _, package)| *package)
            .collect()
    } else {
        plan.packages.iter().copied().collect()
    }
}
