use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Inspect a running query gateway through its admin API", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://127.0.0.1:8081")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Gateway status and uptime
    Status,
    /// Backends with their latest cluster stats
    Backends,
    /// Weights and queue lengths of a routing group
    Routing {
        /// Routing group name
        group: String,
    },
}

impl Commands {
    fn path(&self) -> String {
        match self {
            Commands::Status => "/admin/status".to_string(),
            Commands::Backends => "/admin/backends".to_string(),
            Commands::Routing { group } => format!("/admin/routing/{group}"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let url = format!("{}{}", cli.url.trim_end_matches('/'), cli.command.path());
    let res = reqwest::Client::new().get(url).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: admin API returned status {status}");
        if let Ok(text) = res.text().await {
            if !text.is_empty() {
                eprintln!("Response: {text}");
            }
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
