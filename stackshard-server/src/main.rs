use clap::{Parser, Subcommand};
use stackshard::{
    BackendConfig, Document, IndexManager, LogicalIndex, SearchPredicate, SessionContext,
};
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser, Debug)]
#[command(name = "stackshard", version, about = "Operate sharded tantivy indexes")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// JSON backend configuration. STACKSHARD_* variables override its values.
    #[arg(long, env = "STACKSHARD_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "STACKSHARD_INDEX", default_value = "default")]
    index: String,

    /// Tenant to act for; required when the backend is multi-tenant.
    #[arg(long, env = "STACKSHARD_TENANT")]
    tenant: Option<String>,

    /// Keep going with the shards that started, reporting the others on stderr.
    #[arg(long)]
    partial: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add or update documents read as JSON lines from a file ("-" for stdin)
    Index { file: PathBuf },
    /// Delete documents by identifier
    Delete {
        #[arg(required = true)]
        ids: Vec<String>,
        #[arg(long)]
        routing: Option<String>,
    },
    /// Search the index and print the hits as JSON
    Search {
        /// Exact-match filter, as field=value. Repeatable.
        #[arg(long = "filter", value_parser = parse_filter)]
        filters: Vec<(String, String)>,
        /// Restrict to these document identifiers. Repeatable.
        #[arg(long = "id")]
        ids: Vec<String>,
        /// Only search the shards these routing keys map to. Repeatable.
        #[arg(long)]
        routing: Vec<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Print only the total hit count.
        #[arg(long)]
        count: bool,
    },
    /// Print per-shard status as JSON
    Status,
    /// Check every shard's schema against the expected one
    Validate,
    /// Purge documents, optionally only from the shards of some routing keys
    Purge {
        #[arg(long)]
        routing: Vec<String>,
    },
}

fn parse_filter(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((field, value)) if !field.trim().is_empty() => {
            Ok((field.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected field=value, got '{}'", raw)),
    }
}

fn build_predicate(filters: &[(String, String)], ids: &[String]) -> SearchPredicate {
    let mut clauses: Vec<SearchPredicate> = filters
        .iter()
        .map(|(field, value)| SearchPredicate::field_equals(field, value))
        .collect();
    if !ids.is_empty() {
        clauses.push(SearchPredicate::ids(ids.iter().cloned()));
    }
    match clauses.len() {
        0 => SearchPredicate::MatchAll,
        1 => clauses.remove(0),
        _ => SearchPredicate::And(clauses),
    }
}

/// Parse JSON lines into documents, rejecting the whole input on the first bad line.
fn read_documents(reader: impl Read) -> CliResult<Vec<Document>> {
    let mut documents = Vec::new();
    for (n, line) in BufReader::new(reader).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let json: serde_json::Value = serde_json::from_str(&line)
            .map_err(|e| format!("line {}: invalid JSON: {}", n + 1, e))?;
        let doc = Document::from_json(&json).map_err(|e| format!("line {}: {}", n + 1, e))?;
        documents.push(doc);
    }
    Ok(documents)
}

fn load_config(cli: &Cli) -> CliResult<BackendConfig> {
    let config = match &cli.config {
        Some(path) => BackendConfig::load(path)?,
        None => BackendConfig::from_env()?,
    };
    Ok(config)
}

async fn execute(cli: &Cli, index: &Arc<LogicalIndex>) -> CliResult<()> {
    let session = match &cli.tenant {
        Some(tenant) => SessionContext::for_tenant(tenant.clone()),
        None => SessionContext::new(),
    };

    match &cli.command {
        Command::Index { file } => {
            let documents = if file.as_os_str() == "-" {
                read_documents(std::io::stdin().lock())?
            } else {
                read_documents(std::fs::File::open(file)?)?
            };
            let mut plan = index.create_indexing_plan(&session)?;
            for doc in documents {
                plan.add_or_update(doc);
            }
            let report = plan.execute().await;
            println!("{}", serde_json::to_string_pretty(&report.summary())?);
            if !report.is_success() {
                return Err(format!(
                    "{} of {} document(s) failed",
                    report.failures.len(),
                    report.total
                )
                .into());
            }
        }
        Command::Delete { ids, routing } => {
            let mut plan = index.create_indexing_plan(&session)?;
            for id in ids {
                plan.delete(id, routing.as_deref());
            }
            let report = plan.execute().await;
            println!("{}", serde_json::to_string_pretty(&report.summary())?);
            if !report.is_success() {
                return Err("some deletes failed".into());
            }
        }
        Command::Search {
            filters,
            ids,
            routing,
            limit,
            count,
        } => {
            let query = index
                .create_search_query_builder(&session)?
                .predicate(build_predicate(filters, ids))
                .routing(routing.iter().cloned())
                .limit(*limit);
            if *count {
                let total = query.fetch_total_hit_count()?;
                println!("{}", serde_json::json!({ "total_hit_count": total }));
            } else {
                println!("{}", serde_json::to_string_pretty(&query.fetch()?)?);
            }
        }
        Command::Status => {
            println!("{}", serde_json::to_string_pretty(&index.status())?);
        }
        Command::Validate => {
            index.schema_manager().validate().await?;
            println!("Schema of index '{}' is valid", index.name());
        }
        Command::Purge { routing } => {
            index.create_workspace(&session)?.purge(routing).await?;
        }
    }
    Ok(())
}

async fn run(cli: Cli) -> CliResult<()> {
    let config = load_config(&cli)?;
    let manager = IndexManager::new(config)?;

    let index = if cli.partial {
        let (index, report) = manager.start_index_partial(&cli.index).await?;
        if let Some(report) = report {
            eprintln!("WARNING: {}", report);
        }
        index
    } else {
        manager.start_index(&cli.index).await?
    };

    let result = execute(&cli, &index).await;
    let stopped = manager.shutdown().await;
    result?;
    stopped?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr so command output on stdout stays machine-readable.
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            ExitCode::FAILURE
        }
    }
}
