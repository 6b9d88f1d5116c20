//! rpc-tunnel binary entry point.

use std::process::ExitCode;
use std::sync::Arc;

use rpc_tunnel::api::{serve, AppState};
use rpc_tunnel::cli::{parse_args, print_help, print_version};
use rpc_tunnel::config::Config;
use rpc_tunnel::{logging, AutoManager, BasicHandlerFactory, MemoryStore};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {}", e);
            eprintln!("Run with --help for usage.");
            return ExitCode::from(2);
        }
    };

    if args.help {
        print_help();
        return ExitCode::SUCCESS;
    }
    if args.version {
        print_version();
        return ExitCode::SUCCESS;
    }

    let config = match Config::load(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logging::init_with_filter(config.log_filter()) {
        eprintln!("warning: logging already initialized: {}", e);
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "rpc-tunnel failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let server_config = config.to_server_config()?;
    let manager_config = config.to_manager_config()?;
    let api_keys = Arc::new(config.to_api_key_store());

    info!("rpc-tunnel v{}", env!("CARGO_PKG_VERSION"));
    info!(
        stale_timeout_ms = manager_config.stale_timeout_ms(),
        json_response = manager_config.json_response,
        "session manager configured"
    );
    if api_keys.is_enabled() {
        info!(keys = api_keys.count(), "API key authentication enabled");
        if api_keys.count() == 0 {
            warn!("authentication enabled without keys; every request will be rejected");
        }
    } else {
        warn!("authentication disabled; all sessions use the default tenant");
    }

    let manager = AutoManager::new(
        Arc::new(MemoryStore::new()),
        Arc::new(BasicHandlerFactory::default()),
        manager_config,
    );
    let state = AppState::new(Arc::new(manager)).with_api_keys(api_keys);

    serve(server_config, state).await?;
    Ok(())
}
