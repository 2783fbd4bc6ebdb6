use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "edge-cli")]
#[command(about = "Management CLI for the render-edge admin API", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081", env = "EDGE_ADMIN_URL")]
    url: String,

    #[arg(short, long, env = "EDGE_ADMIN_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build id, version and background task count
    Status,
    /// List origin health and in-flight requests
    Backends,
    /// Show revalidation queue shards (in-flight and failed routes)
    Queues,
    /// Show when tags were last revalidated
    Tags {
        /// Tags to look up
        #[arg(required = true)]
        tags: Vec<String>,
    },
    /// Revalidate tags now (and purge them from the CDN when enabled)
    Revalidate {
        #[arg(required = true)]
        tags: Vec<String>,
    },
    /// Show pending CDN purges
    Purge,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );
    let base = cli.url.trim_end_matches('/');

    let request = match cli.command {
        Commands::Status => client.get(format!("{base}/admin/status")),
        Commands::Backends => client.get(format!("{base}/admin/backends")),
        Commands::Queues => client.get(format!("{base}/admin/queues")),
        Commands::Tags { tags } => client
            .get(format!("{base}/admin/tags"))
            .query(&[("tags", tags.join(","))]),
        Commands::Revalidate { tags } => client
            .post(format!("{base}/admin/revalidate"))
            .json(&serde_json::json!({ "tags": tags })),
        Commands::Purge => client.get(format!("{base}/admin/purge")),
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
