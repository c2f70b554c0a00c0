//! fetchq CLI: run the worker pool, inspect and submit queued requests.

use anyhow::Context;
use clap::{Parser, Subcommand};
use fetchq::config::Config;
use fetchq::config::secrets::ExposeSecret;
use fetchq::db::Db;
use fetchq::engine::{HttpFetcher, PoolConfig, WorkerPool};
use fetchq::model::{NewRequest, RequestId, Status};
use fetchq::store::QueueStore;
use fetchq::telemetry::{TelemetryConfig, init_telemetry};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "fetchq", about = "Durable queue of outbound HTTP requests")]
struct Cli {
    /// TOML config file. Environment variables are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Drain the queue with the worker pool, then exit
    Run,
    /// Request operations
    Request {
        #[command(subcommand)]
        action: RequestAction,
    },
    /// Insert the sample requests
    Seed,
    /// Requeue requests stuck in processing
    Reclaim {
        /// Minimum age of a processing row to be considered stranded
        #[arg(long)]
        older_than_secs: u64,
    },
}

#[derive(Subcommand)]
enum RequestAction {
    /// Submit a new request
    Submit {
        /// HTTP method
        method: String,
        /// Path relative to the service URL
        uri: String,
        /// Query parameter (repeatable)
        #[arg(long = "param", value_parser = parse_pair)]
        params: Vec<(String, String)>,
        /// Header (repeatable)
        #[arg(long = "header", value_parser = parse_pair)]
        headers: Vec<(String, String)>,
    },
    /// List requests
    List {
        /// Filter by status
        #[arg(long)]
        status: Option<String>,
        /// Maximum requests to show
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Show a request and its responses
    Show {
        /// Request ID
        id: i64,
    },
}

fn parse_pair(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got {s:?}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };

    match cli.command {
        Command::Run => cmd_run(config).await,
        Command::Request { action } => {
            let db = connect(&config).await?;
            match action {
                RequestAction::Submit {
                    method,
                    uri,
                    params,
                    headers,
                } => cmd_request_submit(&db, method, uri, params, headers).await,
                RequestAction::List { status, limit } => {
                    cmd_request_list(&db, status, limit).await
                }
                RequestAction::Show { id } => cmd_request_show(&db, RequestId(id)).await,
            }
        }
        Command::Seed => {
            let db = connect(&config).await?;
            cmd_seed(&db).await
        }
        Command::Reclaim { older_than_secs } => {
            let db = connect(&config).await?;
            let n = db
                .reclaim_stale(Duration::from_secs(older_than_secs))
                .await?;
            println!("Reclaimed {n} request(s).");
            Ok(())
        }
    }
}

async fn connect(config: &Config) -> anyhow::Result<Db> {
    // One connection per worker transaction, plus headroom for the lease check.
    let max_connections = (config.concurrency.workers as u32).saturating_add(2);
    let db = Db::connect_with(config.database_url.expose_secret(), max_connections)
        .await
        .context("connecting to database")?;
    db.migrate().await?;
    Ok(db)
}

async fn cmd_run(config: Config) -> anyhow::Result<()> {
    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "fetchq".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let db = connect(&config).await?;
    let fetcher = HttpFetcher::new(&config.service)?;

    let pool = WorkerPool::new(
        Arc::new(db),
        Arc::new(fetcher),
        PoolConfig::from(config.concurrency),
    );

    let handle = pool.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("interrupt received, stopping after current requests");
        handle.shutdown();
    });

    let report = pool.run().await?;
    println!(
        "Claimed {}, completed {}, requeued {}, failed {}, store errors {}, panics {}.",
        report.totals.claimed,
        report.totals.completed,
        report.totals.requeued,
        report.totals.failed,
        report.totals.store_errors,
        report.totals.panics,
    );
    Ok(())
}

async fn cmd_request_submit(
    db: &Db,
    method: String,
    uri: String,
    params: Vec<(String, String)>,
    headers: Vec<(String, String)>,
) -> anyhow::Result<()> {
    let mut new = NewRequest::new(method, uri);
    for (k, v) in params {
        new = new.param(k, v);
    }
    for (k, v) in headers {
        new = new.header(k, v);
    }

    let request = db.enqueue(new).await?;
    println!("Queued: {} (status: {})", request.id, request.status);
    Ok(())
}

async fn cmd_request_list(db: &Db, status: Option<String>, limit: i64) -> anyhow::Result<()> {
    let status_filter: Option<Status> = match status {
        Some(s) => Some(
            s.parse()
                .map_err(|_| anyhow::anyhow!("invalid status: {s}"))?,
        ),
        None => None,
    };

    let requests = db.list_requests(status_filter, limit).await?;

    if requests.is_empty() {
        println!("No requests found.");
        return Ok(());
    }

    println!(
        "{:<8}  {:<7}  {:<11}  {:<7}  {:<40}  UPDATED",
        "ID", "METHOD", "STATUS", "RETRIES", "URI"
    );
    println!("{}", "-".repeat(100));

    for req in &requests {
        let uri = if req.uri.chars().count() > 40 {
            req.uri.chars().take(40).collect::<String>()
        } else {
            req.uri.clone()
        };
        println!(
            "{:<8}  {:<7}  {:<11}  {:<7}  {:<40}  {}",
            req.id,
            req.method,
            req.status,
            req.retries,
            uri,
            req.updated_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    let counts = db.count_by_status().await?;
    let summary: Vec<String> = counts.iter().map(|(s, n)| format!("{s}={n}")).collect();
    println!("\n{} shown ({})", requests.len(), summary.join(", "));
    Ok(())
}

async fn cmd_request_show(db: &Db, id: RequestId) -> anyhow::Result<()> {
    let req = db.get_request(id).await?;

    println!("ID:         {}", req.id);
    println!("Method:     {}", req.method);
    println!("URI:        {}", req.uri);
    println!("Status:     {}", req.status);
    println!("Retries:    {}", req.retries);
    if let Some(ref params) = req.params {
        println!("Params:     {}", serde_json::to_string(params)?);
    }
    if let Some(ref headers) = req.headers {
        println!("Headers:    {}", serde_json::to_string(headers)?);
    }
    println!("Created:    {}", req.created_at);
    println!("Updated:    {}", req.updated_at);

    let responses = db.responses_for(id).await?;
    for (n, resp) in responses.iter().enumerate() {
        println!("--- attempt {} ({})", n + 1, resp.created_at);
        match (&resp.status_code, &resp.error) {
            (Some(code), _) => {
                let body = resp.body.as_deref().unwrap_or("");
                let preview: String = body.chars().take(200).collect();
                println!("Status code: {code}");
                println!("Body:        {preview}");
            }
            (None, Some(err)) => println!("Error:       {err}"),
            (None, None) => println!("(no result recorded)"),
        }
    }
    Ok(())
}

async fn cmd_seed(db: &Db) -> anyhow::Result<()> {
    let html = "text/html";
    let json = "application/json";
    let samples = vec![
        NewRequest::new("GET", "/wiki/Main_Page").header("Accept", html),
        NewRequest::new("GET", "/wiki/Python_(programming_language)").header("Accept", json),
        NewRequest::new("GET", "/nonexistent_page").header("Accept", html),
        NewRequest::new("GET", "/wiki/SQL").header("Accept", html),
        NewRequest::new("GET", "/wiki/Database").header("Accept", html),
        NewRequest::new("GET", "/wiki/Web_service")
            .param("section", "REST")
            .header("Accept", json),
        NewRequest::new("POST", "/wiki/HTTP").header("Content-Type", json),
        NewRequest::new("GET", "/wiki/API")
            .param("format", "json")
            .header("Accept", json),
        NewRequest::new("GET", "/wiki/Microservices")
            .param("section", "Architecture")
            .header("Accept", json),
        NewRequest::new("GET", "/wiki/REST")
            .param("format", "json")
            .header("Accept", json),
        NewRequest::new("POST", "/wiki/GraphQL")
            .header("Content-Type", json)
            .header("Accept", json),
        NewRequest::new("GET", "/wiki/Docker")
            .param("section", "Containers")
            .header("Accept", html),
        NewRequest::new("GET", "/wiki/Kubernetes").header("Accept", json),
    ];

    let count = samples.len();
    for new in samples {
        db.enqueue(new).await?;
    }
    println!("Seeded {count} request(s).");
    Ok(())
}
