use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "aggregator-cli")]
#[command(about = "Management CLI for the real-time aggregator", long_about = None)]
struct Cli {
    #[arg(short, long, env = "AGGREGATOR_URL", default_value = "http://localhost:8080")]
    url: String,

    #[arg(short, long, env = "AGGREGATOR_API_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Service health (no key needed)
    Health,
    /// Cached aggregate across all sources
    Aggregate,
    /// Stored records, newest first
    Records {
        #[arg(long)]
        source: Option<String>,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 50)]
        page_size: u32,
    },
    /// One stored record
    Record { id: u64 },
    /// Trigger a refresh; --wait blocks until it finishes
    Refresh {
        #[arg(long)]
        wait: bool,
    },
    /// Recent audit entries
    Logs {
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
    /// Cache statistics and breaker states
    Metrics,
    /// Circuit breaker states
    Circuits,
    /// Configured sources
    Sources,
    /// Drop every cache entry
    ClearCache,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert("x-api-key", HeaderValue::from_str(&cli.key)?);

    let base = cli.url.trim_end_matches('/');
    let (method, path) = match &cli.command {
        Commands::Health => (Method::GET, "/admin/health".to_string()),
        Commands::Aggregate => (Method::GET, "/api/v1/aggregate".to_string()),
        Commands::Records {
            source,
            page,
            page_size,
        } => {
            let mut path = format!("/api/v1/records?page={page}&page_size={page_size}");
            if let Some(source) = source {
                path.push_str(&format!("&source_key={source}"));
            }
            (Method::GET, path)
        }
        Commands::Record { id } => (Method::GET, format!("/api/v1/records/{id}")),
        Commands::Refresh { wait: true } => (Method::POST, "/api/v1/refresh/sync".to_string()),
        Commands::Refresh { wait: false } => (Method::POST, "/api/v1/refresh".to_string()),
        Commands::Logs { limit } => (Method::GET, format!("/api/v1/logs?limit={limit}")),
        Commands::Metrics => (Method::GET, "/admin/metrics".to_string()),
        Commands::Circuits => (Method::GET, "/admin/circuits".to_string()),
        Commands::Sources => (Method::GET, "/admin/sources".to_string()),
        Commands::ClearCache => (Method::DELETE, "/admin/cache".to_string()),
    };

    let res = client
        .request(method, format!("{base}{path}"))
        .headers(headers)
        .send()
        .await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if let Some(cache) = res.headers().get("x-cache").and_then(|v| v.to_str().ok()) {
        eprintln!("X-Cache: {cache}");
    }

    if !status.is_success() {
        eprintln!("Error: API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }
    if status == StatusCode::NO_CONTENT {
        println!("{}", status);
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
