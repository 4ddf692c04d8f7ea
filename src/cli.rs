//! Command-line interface definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "kleinanzeigen-pilot",
    about = "Publishes and manages classified ads on kleinanzeigen.de through an already-running browser",
    version
)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true, default_value = "./config.json")]
    pub config: PathBuf,

    /// Increase log verbosity (-v: debug, -vv: trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Publish the selected ads.
    Publish {
        /// Which ads to publish: all, new, due, changed or numeric ad IDs,
        /// comma-separated.
        #[arg(long, default_value = "new")]
        ads: String,
        /// Publish all ads regardless of their state.
        #[arg(long)]
        force: bool,
        /// Do not delete the previous listing before republishing.
        #[arg(long)]
        keep_old: bool,
    },
    /// Check all ad files for syntax and validation errors.
    Verify,
    /// Delete the selected published listings.
    Delete {
        /// Which listings to delete: all or numeric ad IDs, comma-separated.
        #[arg(long, default_value = "all")]
        ads: String,
    },
    /// Download the selected published listings as raw JSON records.
    Download {
        /// Which listings to download: all or numeric ad IDs, comma-separated.
        #[arg(long, default_value = "all")]
        ads: String,
        /// Overwrite already downloaded listing files.
        #[arg(long)]
        force: bool,
    },
    /// Recompute and store the content hash of every ad file.
    UpdateContentHash,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_defaults_to_new_ads() {
        let cli = Cli::parse_from(["kleinanzeigen-pilot", "publish"]);
        match cli.command {
            Command::Publish { ads, force, keep_old } => {
                assert_eq!(ads, "new");
                assert!(!force);
                assert!(!keep_old);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_global_flags_are_accepted_after_the_subcommand() {
        let cli = Cli::parse_from([
            "kleinanzeigen-pilot",
            "verify",
            "--config",
            "/tmp/other.json",
            "-vv",
        ]);
        assert_eq!(cli.config, PathBuf::from("/tmp/other.json"));
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Command::Verify));
    }

    #[test]
    fn test_delete_accepts_id_list() {
        let cli = Cli::parse_from(["kleinanzeigen-pilot", "delete", "--ads", "12,34"]);
        match cli.command {
            Command::Delete { ads } => assert_eq!(ads, "12,34"),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
