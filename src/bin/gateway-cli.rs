use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Management CLI for the integration gateway", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[arg(short, long, env = "GATEWAY_ADMIN_KEY", default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Gateway status: providers, limits, circuits, caches
    Status,
    /// Circuit breaker states
    Circuits,
    /// Reset one circuit ("provider:operation"), or all with --all
    ResetCircuit {
        key: Option<String>,
        #[arg(long)]
        all: bool,
    },
    /// Rate limiter buckets
    Limits,
    /// Response cache statistics
    Cache,
    /// Clear one provider's response cache
    ClearCache { provider: String },
    /// Drop a user's cached access token
    InvalidateToken { provider: String, user_id: String },
    /// Send a request descriptor (JSON file) through /v1/invoke
    Invoke {
        file: PathBuf,
        /// Caller key from invoke.api_keys
        #[arg(long, env = "GATEWAY_INVOKE_KEY")]
        caller_key: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {}", cli.key))?);

    let admin = |path: &str| format!("{}/admin/{}", cli.url.trim_end_matches('/'), path);

    let res = match cli.command {
        Commands::Status => client.get(admin("status")).headers(headers).send().await?,
        Commands::Circuits => client.get(admin("circuits")).headers(headers).send().await?,
        Commands::ResetCircuit { key, all } => {
            let path = match (key, all) {
                (_, true) => "circuits/reset".to_string(),
                (Some(key), false) => format!("circuits/{}/reset", key),
                (None, false) => return Err("pass a circuit key or --all".into()),
            };
            client.post(admin(&path)).headers(headers).send().await?
        }
        Commands::Limits => client.get(admin("limits")).headers(headers).send().await?,
        Commands::Cache => client.get(admin("cache")).headers(headers).send().await?,
        Commands::ClearCache { provider } => {
            client
                .post(admin(&format!("cache/{}/clear", provider)))
                .headers(headers)
                .send()
                .await?
        }
        Commands::InvalidateToken { provider, user_id } => {
            client
                .delete(admin(&format!("tokens/{}/{}", provider, user_id)))
                .headers(headers)
                .send()
                .await?
        }
        Commands::Invoke { file, caller_key } => {
            let descriptor: Value = serde_json::from_str(&std::fs::read_to_string(file)?)?;
            client
                .post(format!("{}/v1/invoke", cli.url.trim_end_matches('/')))
                .bearer_auth(caller_key)
                .json(&descriptor)
                .send()
                .await?
        }
    };

    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    if !status.is_success() {
        eprintln!("Error: gateway returned status {}", status);
    }

    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", text),
    }
    Ok(())
}
