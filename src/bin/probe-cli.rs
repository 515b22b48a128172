use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use serde_json::Value;

/// Exec probe for the k8s-graceful health endpoint.
#[derive(Parser)]
#[command(name = "probe-cli")]
#[command(about = "Query a health endpoint; exit 0 when healthy", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080/health")]
    url: String,

    /// Request timeout in seconds
    #[arg(short, long, default_value_t = 5)]
    timeout_secs: u64,

    /// Print nothing, only set the exit code
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match probe(&cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            if !cli.quiet {
                eprintln!("Error: probe request failed: {}", e);
            }
            ExitCode::FAILURE
        }
    }
}

async fn probe(cli: &Cli) -> Result<bool, Box<dyn std::error::Error>> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(cli.timeout_secs))
        .build()?;

    let res = client.get(&cli.url).send().await?;
    let status = res.status();
    let text = res.text().await?;

    if !cli.quiet {
        println!("{} {}", status.as_u16(), status.canonical_reason().unwrap_or(""));
        match serde_json::from_str::<Value>(&text) {
            Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
            Err(_) if !text.is_empty() => println!("{}", text),
            Err(_) => {}
        }
    }

    Ok(status.is_success())
}
