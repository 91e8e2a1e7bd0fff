//! # Linear Local CLI (`linear-local`)
//!
//! Queries the Linear desktop app's local cache and prints JSON to stdout.
//!
//! ## Usage
//!
//! ```bash
//! linear-local --config ./config/linear-local.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `linear-local summary` | Entity counts and per-store roles |
//! | `linear-local stores` | Full load report for the snapshot |
//! | `linear-local issues` | List issues with optional filters |
//! | `linear-local issue <ID>` | Show one issue (optionally its comments) |
//! | `linear-local search "<query>"` | Search issue titles |
//! | `linear-local users` | List users by assigned issue count |
//! | `linear-local user <name>` | Find one user |
//! | `linear-local mine <name>` | Issues assigned to a user |
//! | `linear-local teams` | List teams |
//! | `linear-local states` | List workflow states |
//! | `linear-local serve` | Start the HTTP and MCP server |
//!
//! Failures print `{"error": {"code", "message"}}` to stderr and exit 1.

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

use linear_local::cache::CacheManager;
use linear_local::config::{self, Config};
use linear_local::error::LinearError;
use linear_local::logging;
use linear_local::server;
use linear_local::source::JsonlSource;
use linear_local::tools::{ToolContext, ToolRegistry};

/// Read-only access to the Linear desktop app's local cache.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file means built-in defaults.
#[derive(Parser)]
#[command(
    name = "linear-local",
    about = "Query the Linear desktop app's local cache",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/linear-local.toml")]
    config: PathBuf,

    /// Snapshot location, overriding `[snapshot].path`.
    #[arg(long, global = true)]
    snapshot: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Entity counts, load time and per-store role classification.
    Summary,

    /// Per-store load report: role, confidence, decoded and skipped records.
    Stores,

    /// List issues, most recently updated first.
    Issues {
        /// Assignee user id or name.
        #[arg(long)]
        assignee: Option<String>,

        /// Team id, key or name.
        #[arg(long)]
        team: Option<String>,

        /// One of triage, backlog, unstarted, started, completed, canceled.
        #[arg(long)]
        state_type: Option<String>,

        /// 0=None, 1=Urgent, 2=High, 3=Normal, 4=Low.
        #[arg(long)]
        priority: Option<i64>,

        /// Only issues updated at or after this ISO-8601 instant.
        #[arg(long)]
        updated_after: Option<String>,

        #[arg(long)]
        limit: Option<usize>,

        /// `nextCursor` from a previous page.
        #[arg(long)]
        cursor: Option<String>,
    },

    /// Show one issue by identifier.
    Issue {
        identifier: String,

        /// Print the issue's comments instead of its details.
        #[arg(long)]
        comments: bool,
    },

    /// Search issue titles.
    Search {
        query: String,

        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        cursor: Option<String>,
    },

    /// List users by assigned issue count.
    Users {
        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        cursor: Option<String>,
    },

    /// Find a user by id or name.
    User { name: String },

    /// Issues assigned to a user, with counts by state type.
    Mine {
        name: String,

        #[arg(long)]
        state_type: Option<String>,

        #[arg(long)]
        updated_after: Option<String>,

        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        cursor: Option<String>,
    },

    /// List teams.
    Teams {
        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        cursor: Option<String>,
    },

    /// List workflow states in board order.
    States {
        /// Team id, key or name.
        #[arg(long)]
        team: Option<String>,

        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        cursor: Option<String>,
    },

    /// Start the HTTP tool API and MCP endpoint on `[server].bind`.
    Serve,
}

/// Map a command to the tool that answers it and that tool's parameters.
fn tool_call(command: Commands) -> Option<(&'static str, Value)> {
    let call = match command {
        Commands::Summary => ("get_summary", json!({})),
        Commands::Issues {
            assignee,
            team,
            state_type,
            priority,
            updated_after,
            limit,
            cursor,
        } => (
            "list_issues",
            json!({
                "assignee": assignee,
                "team": team,
                "state_type": state_type,
                "priority": priority,
                "updated_after": updated_after,
                "limit": limit,
                "cursor": cursor,
            }),
        ),
        Commands::Issue {
            identifier,
            comments,
        } => {
            let tool = if comments {
                "get_issue_comments"
            } else {
                "get_issue"
            };
            (tool, json!({ "identifier": identifier }))
        }
        Commands::Search {
            query,
            limit,
            cursor,
        } => (
            "search_issues",
            json!({ "query": query, "limit": limit, "cursor": cursor }),
        ),
        Commands::Users { limit, cursor } => {
            ("list_users", json!({ "limit": limit, "cursor": cursor }))
        }
        Commands::User { name } => ("get_user", json!({ "name": name })),
        Commands::Mine {
            name,
            state_type,
            updated_after,
            limit,
            cursor,
        } => (
            "get_my_issues",
            json!({
                "name": name,
                "state_type": state_type,
                "updated_after": updated_after,
                "limit": limit,
                "cursor": cursor,
            }),
        ),
        Commands::Teams { limit, cursor } => {
            ("list_teams", json!({ "limit": limit, "cursor": cursor }))
        }
        Commands::States {
            team,
            limit,
            cursor,
        } => (
            "list_states",
            json!({ "team": team, "limit": limit, "cursor": cursor }),
        ),
        Commands::Stores | Commands::Serve => return None,
    };
    Some(call)
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(cfg: Config, command: Commands) -> anyhow::Result<()> {
    if let Commands::Serve = command {
        return server::run_server(&cfg).await;
    }

    let cache = Arc::new(CacheManager::from_config(&cfg, Arc::new(JsonlSource)));

    if let Commands::Stores = command {
        let index = cache.snapshot().await?;
        return print_json(index.report());
    }

    let ctx = ToolContext::from_config(&cfg, cache);
    let registry = ToolRegistry::with_builtins();
    if let Some((tool, params)) = tool_call(command) {
        let result = registry.call(tool, params, &ctx).await?;
        print_json(&result)?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut cfg = config::load_config(&cli.config)?;
    if let Some(snapshot) = cli.snapshot {
        cfg.snapshot.path = snapshot;
    }
    logging::init(&cfg.logging.level)?;

    if let Err(err) = run(cfg, cli.command).await {
        match err.downcast_ref::<LinearError>() {
            Some(le) => eprintln!("{}", serde_json::to_string_pretty(&le.to_body())?),
            None => eprintln!("Error: {:#}", err),
        }
        std::process::exit(1);
    }
    Ok(())
}
