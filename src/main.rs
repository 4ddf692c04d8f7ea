use std::path::Path;

use clap::Parser;
use headless_chrome::Browser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use kleinanzeigen_pilot::ads::{self, AdSelector};
use kleinanzeigen_pilot::cli::{Cli, Command};
use kleinanzeigen_pilot::config::Config;
use kleinanzeigen_pilot::manage;
use kleinanzeigen_pilot::publish::{self, PublishOptions, StdinGate, SITE_URL};
use kleinanzeigen_pilot::scraper::{self, Scraper};
use kleinanzeigen_pilot::Result;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = Config::load(&cli.config)?;
    let config_dir = cli
        .config
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();

    match cli.command {
        Command::Verify => {
            let checked = ads::verify(&config, &config_dir)?;
            info!("{checked} ad file(s) are valid");
        }
        Command::UpdateContentHash => {
            let updated = ads::update_content_hashes(&config, &config_dir)?;
            info!("updated {updated} ad file(s)");
        }
        Command::Publish { ads, force, keep_old } => {
            let selector = if force {
                AdSelector::all()
            } else {
                AdSelector::parse(&ads)?
            };
            let options = PublishOptions { selector, keep_old };
            let (_browser, scraper) = attach(&config).await?;
            let published =
                publish::publish_ads(&scraper, &config, &config_dir, &StdinGate, &options).await?;
            info!("published {published} ad(s)");
        }
        Command::Delete { ads } => {
            let selector = AdSelector::parse(&ads)?;
            let (_browser, scraper) = attach(&config).await?;
            scraper.goto(SITE_URL).await?;
            scraper.ensure_logged_in(&config.username).await?;
            let deleted = manage::delete_selected(&scraper, &selector).await?;
            info!("deleted {deleted} listing(s)");
        }
        Command::Download { ads, force } => {
            let selector = AdSelector::parse(&ads)?;
            let (_browser, scraper) = attach(&config).await?;
            scraper.goto(SITE_URL).await?;
            scraper.ensure_logged_in(&config.username).await?;
            let downloaded =
                manage::download_listings(&scraper, &selector, &config_dir, force).await?;
            info!("downloaded {downloaded} listing(s)");
        }
    }
    Ok(())
}

// The browser handle must stay alive for as long as the scraper uses its tab.
async fn attach(config: &Config) -> Result<(Browser, Scraper)> {
    let browser = scraper::connect_browser(&config.browser_socket).await?;
    let tab = browser.new_tab()?;
    let scraper = Scraper::new(tab);
    Ok((browser, scraper))
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("kleinanzeigen_pilot={level}")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
