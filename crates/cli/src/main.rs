//! AuthCheck command-line tool.
//!
//! Checks whether users exist in every configured identity source, runs a
//! full comparison across sources, manages alias groups, and generates /
//! validates configuration files.

mod render;
mod style;
mod userlist;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use authcheck_core::config::AppConfig;
use authcheck_core::{AdapterRegistry, AliasResolver, ComparisonOrchestrator, Report};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// AuthCheck command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "authcheck",
    version,
    about = "Verify user accounts across Okta, RADIUS, Active Directory and Slack"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(
        short,
        long,
        global = true,
        default_value = "/etc/authcheck/config.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error). Overrides the config file.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check the given users against every active source.
    Verify {
        /// Usernames or email addresses.
        users: Vec<String>,

        /// Read users from a file (one per line, or CSV first column).
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Compare every user known to any source across all sources.
    Compare {
        /// Extra users to include (one per line, or CSV first column).
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List configured identity sources.
    Sources,

    /// Manage alias groups.
    Groups {
        #[command(subcommand)]
        action: GroupsAction,
    },

    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./authcheck.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,
}

#[derive(Subcommand, Debug)]
enum GroupsAction {
    /// List all alias groups.
    List,
    /// Put identities (and any groups they belong to) into one group.
    Merge {
        /// Identities to group; at least two.
        #[arg(required = true, num_args = 2..)]
        identities: Vec<String>,

        /// Display name for the group.
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Remove members from a group, keeping only the listed identities.
    Split {
        /// Group id.
        group: String,

        /// Identities to keep in the group.
        #[arg(short, long, num_args = 1..)]
        keep: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = cli
        .log_level
        .clone()
        .or_else(|| {
            AppConfig::load_from_file(&cli.config)
                .ok()
                .map(|c| c.general.log_level)
        })
        .unwrap_or_else(|| "warn".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { output } => cmd_init(&output),
        Commands::Validate => cmd_validate(&cli.config),
        command => {
            let config = load_config(&cli.config)?;
            match command {
                Commands::Verify { users, file, json } => {
                    cmd_verify(&config, users, file.as_deref(), json).await
                }
                Commands::Compare { file, json } => {
                    cmd_compare(&config, file.as_deref(), json).await
                }
                Commands::Sources => cmd_sources(&config),
                Commands::Groups { action } => cmd_groups(&config, action),
                Commands::Init { .. } | Commands::Validate => Ok(()),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn load_config(path: &Path) -> Result<AppConfig> {
    AppConfig::load_and_resolve(path).context("failed to load configuration file")
}

fn print_json(report: &Report) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("failed to serialize report")?;
    println!("{}", json);
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

async fn cmd_verify(
    config: &AppConfig,
    mut users: Vec<String>,
    file: Option<&Path>,
    json: bool,
) -> Result<()> {
    if let Some(path) = file {
        users.extend(userlist::read_user_list(path)?);
    }
    if users.is_empty() {
        anyhow::bail!("no users given: pass usernames or --file");
    }

    let registry = AdapterRegistry::from_config(config);
    let resolver = AliasResolver::load(&config.general.alias_file);
    let orchestrator = ComparisonOrchestrator::from_config(config);

    let report = orchestrator
        .verify(&registry, &resolver, &users)
        .await
        .context("verification failed")?;

    if json {
        print_json(&report)
    } else {
        render::print_report(&report);
        Ok(())
    }
}

async fn cmd_compare(config: &AppConfig, file: Option<&Path>, json: bool) -> Result<()> {
    let extra = match file {
        Some(path) => userlist::read_user_list(path)?,
        None => Vec::new(),
    };

    let registry = AdapterRegistry::from_config(config);
    let resolver = AliasResolver::load(&config.general.alias_file);
    let orchestrator = ComparisonOrchestrator::from_config(config);

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.blue} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    spinner.set_message(format!(
        "Listing users from {} source(s) and checking every account...",
        registry.len()
    ));
    spinner.enable_steady_tick(Duration::from_millis(100));

    let report = orchestrator.compare(&registry, &resolver, &extra).await;

    spinner.finish_and_clear();

    if json {
        print_json(&report)
    } else {
        println!("{}", style::header("Identity source comparison"));
        render::print_report(&report);
        Ok(())
    }
}

fn cmd_sources(config: &AppConfig) -> Result<()> {
    let registry = AdapterRegistry::from_config(config);

    if registry.is_empty() && registry.excluded().is_empty() {
        println!("No identity sources configured.");
        return Ok(());
    }

    println!("{}", render::sources_table(&registry));
    println!();
    println!(
        "{} active, {} excluded",
        registry.len(),
        registry.excluded().len()
    );
    Ok(())
}

fn cmd_groups(config: &AppConfig, action: GroupsAction) -> Result<()> {
    let resolver = AliasResolver::load(&config.general.alias_file);

    match action {
        GroupsAction::List => {
            let groups = resolver.groups();
            if groups.is_empty() {
                println!("No alias groups defined.");
                println!(
                    "{}",
                    style::dim(&format!("mapping file: {}", resolver.path().display()))
                );
                return Ok(());
            }
            println!("{}", render::groups_table(&groups));
            println!();
            println!("{} group(s)", groups.len());
            Ok(())
        }

        GroupsAction::Merge { identities, name } => {
            let id = resolver
                .merge(&identities, name.as_deref())
                .context("failed to merge identities")?;
            let members = resolver.members_of(&id)?;
            println!(
                "{}",
                style::success(&format!("group {} now has {} member(s)", id, members.len()))
            );
            for member in members {
                println!("  {}", member);
            }
            Ok(())
        }

        GroupsAction::Split { group, keep } => {
            let summary = split_group(&resolver, &group, &keep)?;
            println!("{}", style::success(&summary));
            Ok(())
        }
    }
}

const DEFAULT_CONFIG: &str = r#"# AuthCheck Configuration
# Secrets are never stored here: *_env fields name environment variables.
# Remove or disable any source you do not use.

[general]
log_level = "info"
alias_file = "/var/lib/authcheck/user_alias_mapping.json"

[engine]
# Maximum number of (user x source) checks in flight at once.
max_in_flight = 16
call_timeout_secs = 10
enumeration_timeout_secs = 120

[report]
# "report" shows errors as errors; "treat_as_not_found" shows them as not found.
error_policy = "report"

[okta]
org_url = "https://example.okta.com"
api_token_env = "OKTA_API_TOKEN"

[radius]
users_file = "/etc/freeradius/3.0/users"

[active_directory]
url = "ldaps://dc01.example.com:636"
base_dn = "DC=example,DC=com"
bind_dn = "CN=authcheck,OU=Service Accounts,DC=example,DC=com"
bind_password_env = "AD_BIND_PASSWORD"
user_attribute = "sAMAccountName"
mail_attribute = "mail"

[slack]
enabled = false
token_env = "SLACK_BOT_TOKEN"
"#;

/// Split `group` down to `keep` and describe what is left of it.
fn split_group(resolver: &AliasResolver, group: &str, keep: &[String]) -> Result<String> {
    resolver
        .split(group, keep)
        .context("failed to split group")?;
    match keep.iter().find_map(|k| resolver.group_of(k)) {
        Some(id) => {
            let members = resolver.members_of(&id)?;
            Ok(format!("group {} now has {} member(s)", id, members.len()))
        }
        None => Ok(format!("group {} dissolved", group)),
    }
}

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, DEFAULT_CONFIG).context("failed to write config file")?;

    println!("Default configuration written to {}", output.display());
    println!();
    println!("Next steps:");
    println!("  1. Edit the config file with your Okta, RADIUS and AD details");
    println!("  2. Set the referenced environment variables (OKTA_API_TOKEN, AD_BIND_PASSWORD, etc.)");
    println!(
        "  3. Validate with: authcheck validate --config {}",
        output.display()
    );
    println!(
        "  4. Check a user: authcheck verify --config {} jdoe",
        output.display()
    );

    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  {}", style::success("TOML structure is valid"));

    config
        .resolve_env_vars()
        .context("failed to resolve environment variables")?;
    println!("  {}", style::success("Environment variable references processed"));

    if let Err(e) = config.validate() {
        println!("  {}", style::error(&format!("Validation error: {}", e)));
        anyhow::bail!("configuration validation failed");
    }
    println!("  {}", style::success("Engine settings are valid"));

    let registry = AdapterRegistry::from_config(&config);
    for id in registry.ids() {
        println!("  {}", style::success(&format!("source {} is usable", id)));
    }
    for excluded in registry.excluded() {
        println!(
            "  {}",
            style::warn(&format!("source {} excluded: {}", excluded.id, excluded.reason))
        );
    }

    println!();
    println!("Configuration summary:");
    println!("  Active sources : {}", registry.ids().join(", "));
    println!("  Max in flight  : {}", config.engine.max_in_flight);
    println!("  Call timeout   : {}s", config.engine.call_timeout_secs);
    println!("  Alias file     : {}", config.general.alias_file.display());
    println!();

    if registry.is_empty() {
        anyhow::bail!("no identity source is usable");
    }
    println!("Configuration is valid.");
    Ok(())
}
