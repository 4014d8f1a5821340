use std::path::PathBuf;

use clap::Parser;
use userreg::{AppState, build_app, config::UserregConfig, observability};

#[derive(Parser, Debug)]
#[command(version, about = "Provision federated users into ChirpStack organizations", long_about = None)]
struct Args {
    /// Path to the TOML config file
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,

    /// Address to listen on, `host:port` or `:port` (overrides [server])
    #[arg(long, global = true)]
    listen: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Start the registration server (default)
    Serve,
    /// Validate the config file and exit
    Check,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let mut config = match UserregConfig::from_file(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config.display(), e);
            std::process::exit(1);
        }
    };

    if let Some(listen) = args.listen.as_deref()
        && let Err(e) = config.server.apply_listen_override(listen)
    {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }

    match args.command {
        Some(Command::Check) => run_check(&args.config, &config),
        Some(Command::Serve) | None => run_server(&args.config, config).await,
    }
}

fn run_check(config_path: &std::path::Path, config: &UserregConfig) {
    println!("Configuration OK: {}", config_path.display());
    println!("  listen:  {}", config.server.bind_addr());
    println!("  backend: {} ({:?})", config.backend.address, config.backend.auth);
}

async fn run_server(config_path: &std::path::Path, config: UserregConfig) {
    observability::init_tracing(&config.observability).expect("Failed to initialize tracing");

    tracing::info!(
        config_file = %config_path.display(),
        backend = %config.backend.address,
        "Starting user registration service"
    );

    if !config.provisioning.strict_claims {
        tracing::warn!("strict_claims is disabled, requests without claims are acknowledged");
    }

    let state = match AppState::new(config.clone()) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize application state");
            std::process::exit(1);
        }
    };
    let app = build_app(&config, state);

    let bind_addr = config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    tracing::info!("Shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, finishing in-flight registrations");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from(["userreg", "userreg.toml"]).unwrap();
        assert_eq!(args.config, PathBuf::from("userreg.toml"));
        assert!(args.command.is_none());
        assert!(args.listen.is_none());

        let args =
            Args::try_parse_from(["userreg", "--listen", ":9000", "userreg.toml", "check"]).unwrap();
        assert!(matches!(args.command, Some(Command::Check)));
        assert_eq!(args.listen.as_deref(), Some(":9000"));
    }

    #[test]
    fn test_config_is_required() {
        assert!(Args::try_parse_from(["userreg"]).is_err());
    }
}
