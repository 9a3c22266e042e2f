use std::env;

use drawdown::api::{self, InputError};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("drawdown=info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let raw_args: Vec<String> = env::args().collect();
    match raw_args.get(1).map(|s| s.as_str()) {
        Some("serve") => {
            let port = raw_args
                .get(2)
                .and_then(|s| s.parse::<u16>().ok())
                .unwrap_or(8080);
            if let Err(e) = api::run_http_server(port).await {
                tracing::error!("Server error: {e}");
                std::process::exit(1);
            }
        }
        Some("schedule") => {
            let args = std::iter::once("drawdown schedule".to_string())
                .chain(raw_args.iter().skip(2).cloned());
            match api::run_schedule_command(args) {
                Ok(json) => println!("{json}"),
                Err(InputError::Cli(e)) => e.exit(),
                Err(e) => {
                    eprintln!("{e}");
                    std::process::exit(2);
                }
            }
        }
        _ => {
            eprintln!("Usage: drawdown serve [port] | drawdown schedule [--flags]");
            std::process::exit(1);
        }
    }
}
