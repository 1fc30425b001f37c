use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

use crate::domain::types::Collection;

/// Command-line arguments for the Arabica binary.
#[derive(Debug, Parser)]
#[command(name = "arabica", version, about = "Coffee journal records on an AT Protocol repository")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "ARABICA_CONFIG_FILE",
        value_name = "PATH",
        global = true
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Override the personal data server URL.
    #[arg(long = "pds-url", value_name = "URL", global = true)]
    pub pds_url: Option<String>,

    /// Override the repository owner DID.
    #[arg(long = "did", value_name = "DID", global = true)]
    pub did: Option<String>,

    /// Override the access token used for repository calls.
    #[arg(long = "access-token", value_name = "TOKEN", global = true)]
    pub access_token: Option<String>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// List every record of a collection.
    List(CollectionArgs),
    /// Fetch a single record with its references resolved.
    Get(RecordArgs),
    /// Create a record from a JSON parameter object.
    Create(CreateArgs),
    /// Replace a record's fields, keeping its creation time.
    Update(UpdateArgs),
    /// Delete a record.
    Delete(RecordArgs),
    /// Print beans, roasters, grinders and brewers for the manage view.
    Manage,
    /// Export every collection to a TOML archive.
    Export(ExportArgs),
    /// Show recent public brews from registered users.
    Feed(FeedArgs),
    /// Split a record locator into its parts.
    Resolve(ResolveArgs),
}

#[derive(Debug, Args, Clone)]
pub struct CollectionArgs {
    /// Collection name (beans, roasters, grinders, brewers, brews) or its NSID.
    #[arg(value_name = "COLLECTION")]
    pub collection: Collection,
}

#[derive(Debug, Args, Clone)]
pub struct RecordArgs {
    #[arg(value_name = "COLLECTION")]
    pub collection: Collection,

    /// Record key.
    #[arg(value_name = "RKEY")]
    pub rkey: String,
}

#[derive(Debug, Args, Clone)]
pub struct CreateArgs {
    #[arg(value_name = "COLLECTION")]
    pub collection: Collection,

    #[command(flatten)]
    pub params: ParamsArgs,
}

#[derive(Debug, Args, Clone)]
pub struct UpdateArgs {
    #[arg(value_name = "COLLECTION")]
    pub collection: Collection,

    /// Key of the record to replace.
    #[arg(value_name = "RKEY")]
    pub rkey: String,

    #[command(flatten)]
    pub params: ParamsArgs,
}

/// Where a JSON parameter object comes from.
#[derive(Debug, Args, Clone)]
pub struct ParamsArgs {
    /// Parameters as an inline JSON object.
    #[arg(long, value_name = "JSON", conflicts_with = "file", required_unless_present = "file")]
    pub data: Option<String>,

    /// Read parameters from a JSON file.
    #[arg(long, value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub file: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct ExportArgs {
    /// Destination path for the exported TOML archive.
    #[arg(value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,
}

#[derive(Debug, Args, Clone)]
pub struct FeedArgs {
    /// Maximum number of feed items; defaults to `feed.limit`.
    #[arg(long, value_name = "COUNT")]
    pub limit: Option<usize>,
}

#[derive(Debug, Args, Clone)]
pub struct ResolveArgs {
    #[arg(value_name = "LOCATOR")]
    pub locator: String,
}
