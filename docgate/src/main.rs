//! docgate command-line front end
//!
//! Answers access questions and runs permission-filtered queries against a
//! directory of JSON documents.

use anyhow::Result;
use clap::{Parser, Subcommand};
use docgate::{parse_sort, App};
use docgate_core::query::QueryOptions;
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "docgate")]
#[command(about = "Document access control with request-scoped query optimization")]
struct Cli {
    /// Engine configuration file (JSON)
    #[arg(long, global = true, env = "DOCGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding one JSON file per document
    #[arg(long, global = true, env = "DOCGATE_DATA", default_value = "data")]
    data: PathBuf,

    /// Users and groups file (JSON)
    #[arg(long, global = true, env = "DOCGATE_DIRECTORY")]
    directory: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decide a single action, optionally against a stored document
    Can {
        /// Action such as `edit-article` or `view`
        action: String,

        /// User id or username; anonymous when omitted
        #[arg(short, long)]
        user: Option<String>,

        /// Session id for anonymous visitors
        #[arg(short, long)]
        session: Option<String>,

        /// Id of the document to check
        #[arg(short, long)]
        doc: Option<String>,
    },

    /// Print the store filter equivalent to an action
    Criteria {
        action: String,

        #[arg(short, long)]
        user: Option<String>,
    },

    /// List documents the user may access
    Find {
        #[arg(default_value = "view")]
        action: String,

        #[arg(short, long)]
        user: Option<String>,

        /// Restrict to these ids
        #[arg(long, value_delimiter = ',')]
        ids: Vec<String>,

        /// Load this document first and serve its references from the cache
        #[arg(long)]
        via: Option<String>,

        /// Sort keys, `-` prefix for descending
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
        sort: Vec<String>,

        #[arg(long, default_value_t = 0)]
        skip: usize,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Rebuild optimize indexes that are missing or out of date
    Reindex,

    /// List the permissions that can be granted to groups
    Permissions,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let app = App::open(cli.config.as_deref(), &cli.data, cli.directory.as_deref())?;

    match cli.command {
        Commands::Can { action, user, session, doc } => {
            let allowed = app
                .can(user.as_deref(), session.as_deref(), &action, doc.as_deref())
                .await?;
            print_json(&allowed)?;
        }
        Commands::Criteria { action, user } => {
            print_json(&app.criteria(user.as_deref(), &action)?)?;
        }
        Commands::Find { action, user, ids, via, sort, skip, limit } => {
            let options = QueryOptions {
                sort: sort.iter().map(|s| parse_sort(s)).collect(),
                skip,
                limit,
            };
            let report = app
                .find(user.as_deref(), &action, &ids, via.as_deref(), &options)
                .await?;
            print_json(&report)?;
        }
        Commands::Reindex => {
            let updated = app.reindex().await?;
            print_json(&serde_json::json!({ "updated": updated }))?;
        }
        Commands::Permissions => {
            print_json(&app.permissions())?;
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
