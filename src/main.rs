use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use rothplan::api::{ProjectionRequest, handle_projection};

#[derive(Parser, Debug)]
#[command(
    name = "rothplan",
    about = "Roth conversion decision support: deterministic multi-year tax projections"
)]
struct Cli {
    /// Path to a JSON projection request; reads stdin when omitted
    request: Option<PathBuf>,
    /// Pretty-print the JSON response
    #[arg(long)]
    pretty: bool,
}

fn read_request(path: Option<&PathBuf>) -> Result<String, String> {
    match path {
        Some(path) => fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {e}", path.display())),
        None => {
            let mut raw = String::new();
            std::io::stdin()
                .read_to_string(&mut raw)
                .map_err(|e| format!("failed to read stdin: {e}"))?;
            Ok(raw)
        }
    }
}

fn run(cli: &Cli) -> Result<String, String> {
    let raw = read_request(cli.request.as_ref())?;
    let request: ProjectionRequest =
        serde_json::from_str(&raw).map_err(|e| format!("invalid request JSON: {e}"))?;
    let response = handle_projection(&request).map_err(|e| e.to_string())?;
    let rendered = if cli.pretty {
        serde_json::to_string_pretty(&response)
    } else {
        serde_json::to_string(&response)
    };
    rendered.map_err(|e| format!("failed to serialize response: {e}"))
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
