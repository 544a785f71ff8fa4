use clap::Parser;
use slapi::app::{App, partial_payload};
use slapi::cache::CacheMode;
use slapi::cli::Args;
use slapi::config::Config;
use slapi::logging::setup_logging;
use slapi::teamsl::ErrorKind;
use std::process::ExitCode;
use tracing::{error, info};

fn exit_code(kind: ErrorKind) -> ExitCode {
    match kind {
        ErrorKind::Transient => ExitCode::from(3),
        ErrorKind::RateLimited => ExitCode::from(4),
        ErrorKind::SessionExpired => ExitCode::from(5),
        ErrorKind::Format => ExitCode::from(6),
        ErrorKind::PaginationInconsistency => ExitCode::from(7),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e:#}");
            return ExitCode::from(2);
        }
    };
    setup_logging(&config, args.tracing);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        commit = env!("GIT_COMMIT_SHORT"),
        "starting slapi"
    );

    let mut app = match App::new(config).await {
        Ok(app) => app,
        Err(e) => {
            error!(error = ?e, "Failed to initialize application");
            return ExitCode::from(2);
        }
    };
    app.spawn_cache_sweeper();

    let mode = if args.no_cache {
        CacheMode::Bypass
    } else {
        CacheMode::Use
    };

    let result = app.execute(args.command, mode).await;
    app.shutdown().await;

    match result {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value).unwrap_or_default());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, kind = ?e.kind(), "Request failed");
            if let Some(partial) = partial_payload(&e) {
                println!("{}", serde_json::to_string_pretty(&partial).unwrap_or_default());
            }
            exit_code(e.kind())
        }
    }
}
