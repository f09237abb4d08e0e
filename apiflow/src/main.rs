use apiflow_app::app::App;
use apiflow_app::config::AppConfig;
use apiflow_core::runner::Runner;
use config::{Config, Environment, File};
use std::env;
use std::process;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Errors that can occur while starting the application.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
enum Error {
    #[error("Failed to read environment variable CONFIG_PATH: {source}")]
    Env {
        #[source]
        source: env::VarError,
    },
    #[error("Failed to load configuration: {source}")]
    Config {
        #[source]
        source: config::ConfigError,
    },
}

/// Loads the application config from `CONFIG_PATH`, overlaid with `APIFLOW__*` variables.
fn load_config() -> Result<AppConfig, Error> {
    let config_path = env::var("CONFIG_PATH").map_err(|source| Error::Env { source })?;
    Config::builder()
        .add_source(File::with_name(&config_path))
        .add_source(Environment::with_prefix("APIFLOW").separator("__"))
        .build()
        .and_then(|config| config.try_deserialize::<AppConfig>())
        .map_err(|source| Error::Config { source })
}

#[tokio::main]
async fn main() {
    // Install global log collector.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = load_config().unwrap_or_else(|e| {
        error!(error = %e, "Failed to start apiflow");
        process::exit(1);
    });

    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling flows");
            signal.cancel();
        }
    });

    let app = App { config, cancel };
    if let Err(e) = app.run().await {
        error!(error = %e, "Apiflow run failed");
        process::exit(1);
    }
    info!("Apiflow run finished");
}
