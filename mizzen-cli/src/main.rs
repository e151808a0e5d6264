//! Mizzen CLI - resolve, inspect and compare rich-text content files

use anyhow::{bail, Context, Result};
use clap::{Arg, Command};
use mizzen_core::{Config, ValidationResult};
use mizzen_editor::{html, FileReferenceResolver, StaticUrlResolver};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn, Level};

/// CLI arguments structure
#[derive(Debug, Clone)]
pub struct Args {
    pub file: Option<PathBuf>,
    pub urls: Option<PathBuf>,
    pub compare: Option<PathBuf>,
    pub config_file: Option<PathBuf>,
    pub dev_mode: bool,
    pub list_paths: bool,
    pub validate_config: bool,
}

impl Args {
    /// Parse command line arguments
    pub fn parse() -> Self {
        let matches = Command::new("mizzen")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Resolve file references in rich-text content")
            .long_about(
                "Mizzen rewrites the file references of stored rich-text content \
                (elements carrying data-file-path) to direct URLs, and compares two \
                documents while ignoring the URLs they embed.",
            )
            .arg(
                Arg::new("file")
                    .help("HTML content file to process")
                    .required_unless_present("validate-config")
                    .index(1)
                    .value_parser(clap::value_parser!(PathBuf)),
            )
            .arg(
                Arg::new("urls")
                    .short('u')
                    .long("urls")
                    .help("JSON map of storage paths to URLs")
                    .long_help(
                        "Path to a JSON file mapping storage paths to direct URLs, either \
                        {\"urls\": {\"path\": \"url\"}} or a flat {\"path\": \"url\"} object. \
                        Without it, references are left unresolved.",
                    )
                    .value_parser(clap::value_parser!(PathBuf)),
            )
            .arg(
                Arg::new("compare")
                    .long("compare")
                    .help("Compare the file's structure with another file and exit")
                    .long_help(
                        "Report whether the two documents are structurally equal, that is \
                        whether they differ only in the URLs they embed. Exits with status 1 \
                        when they differ.",
                    )
                    .value_parser(clap::value_parser!(PathBuf)),
            )
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .help("Path to configuration file (JSON format)")
                    .value_parser(clap::value_parser!(PathBuf)),
            )
            .arg(
                Arg::new("list-paths")
                    .long("list-paths")
                    .help("Print the distinct file reference paths and exit")
                    .action(clap::ArgAction::SetTrue),
            )
            .arg(
                Arg::new("dev-mode")
                    .long("dev-mode")
                    .help("Enable debug logging with targets and source locations")
                    .action(clap::ArgAction::SetTrue),
            )
            .arg(
                Arg::new("validate-config")
                    .long("validate-config")
                    .help("Validate configuration and exit")
                    .action(clap::ArgAction::SetTrue),
            )
            .after_help(
                "EXAMPLES:\n    \
                mizzen notes.html --urls urls.json        Print notes.html with resolved URLs\n    \
                mizzen notes.html --list-paths            List referenced storage paths\n    \
                mizzen a.html --compare b.html            Check structural equality\n    \
                mizzen --validate-config --config c.json  Validate configuration",
            )
            .get_matches();

        Self {
            file: matches.get_one::<PathBuf>("file").cloned(),
            urls: matches.get_one::<PathBuf>("urls").cloned(),
            compare: matches.get_one::<PathBuf>("compare").cloned(),
            config_file: matches.get_one::<PathBuf>("config").cloned(),
            dev_mode: matches.get_flag("dev-mode"),
            list_paths: matches.get_flag("list-paths"),
            validate_config: matches.get_flag("validate-config"),
        }
    }
}

fn init_logging(config: &Config, dev_mode: bool) {
    let dev_mode = dev_mode || config.logging.dev_mode;
    let parsed = Level::from_str(&config.logging.level);
    let level = if dev_mode {
        Level::DEBUG
    } else {
        parsed.unwrap_or(Level::INFO)
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(dev_mode)
        .with_line_number(dev_mode)
        .with_file(dev_mode);

    if dev_mode {
        subscriber.pretty().init();
        debug!("Development mode enabled");
    } else {
        subscriber.init();
    }

    if !dev_mode && Level::from_str(&config.logging.level).is_err() {
        warn!("Unknown log level '{}', using info", config.logging.level);
    }
}

fn print_validation(config_file: Option<&Path>, result: &ValidationResult) {
    match config_file {
        Some(path) => println!("Configuration file: {}", path.display()),
        None => println!("Configuration: defaults and environment"),
    }

    for error in &result.errors {
        println!("  error   {}: {}", error.field_path, error.message);
        if let Some(fix) = &error.suggested_fix {
            println!("          {}", fix);
        }
    }
    for warning in &result.warnings {
        println!("  warning {}: {}", warning.field_path, warning.message);
        if let Some(suggestion) = &warning.suggestion {
            println!("          {}", suggestion);
        }
    }

    if result.is_valid {
        println!("Configuration is valid");
    } else {
        println!("Configuration has {} error(s)", result.errors.len());
    }
}

async fn read_content(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

async fn compare(file: &Path, other: &Path) -> Result<bool> {
    let (left, right) = (read_content(file).await?, read_content(other).await?);
    let equal = html::structurally_equal(&left, &right);
    println!(
        "{} and {} are structurally {}",
        file.display(),
        other.display(),
        if equal { "equal" } else { "different" }
    );
    Ok(equal)
}

async fn resolve(file: &Path, urls: Option<&Path>) -> Result<()> {
    let content = read_content(file).await?;

    let remote = match urls {
        Some(path) => StaticUrlResolver::from_file(path)
            .with_context(|| format!("Failed to load URL map {}", path.display()))?,
        None => {
            warn!("No URL map given, file references stay unresolved");
            StaticUrlResolver::new(HashMap::new())
        }
    };
    debug!("Loaded {} URL mappings", remote.len());

    let resolver = FileReferenceResolver::new(Arc::new(remote));
    let resolution = resolver.resolve(&content).await;

    let unresolved = html::file_paths(&content)
        .into_iter()
        .filter(|path| !resolver.cache().contains(path))
        .collect::<Vec<_>>();
    if !unresolved.is_empty() {
        warn!("No URL for: {}", unresolved.join(", "));
    }

    info!(
        "Resolved {} of {} file references in {:?}",
        resolution.references - unresolved.len(),
        resolution.references,
        resolution.duration
    );
    print!("{}", resolution.html);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config =
        Config::load(args.config_file.as_deref()).context("Failed to load configuration")?;
    init_logging(&config, args.dev_mode);

    if args.validate_config {
        let result = config.validate_comprehensive();
        print_validation(args.config_file.as_deref(), &result);
        if !result.is_valid {
            std::process::exit(1);
        }
        return Ok(());
    }

    config.validate().context("Invalid configuration")?;

    let Some(file) = args.file.as_deref() else {
        bail!("No content file given");
    };

    if let Some(other) = args.compare.as_deref() {
        if !compare(file, other).await? {
            std::process::exit(1);
        }
        return Ok(());
    }

    if args.list_paths {
        for path in html::file_paths(&read_content(file).await?) {
            println!("{}", path);
        }
        return Ok(());
    }

    resolve(file, args.urls.as_deref()).await
}
