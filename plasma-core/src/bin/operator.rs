//! Plasma operator binary
//!
//! Usage: `plasma-operator [--config <path>]`. Without `--config` the
//! configuration comes from `PLASMA_*` environment variables.

use anyhow::Context;
use plasma_core::{Config, Operator};

fn load_config() -> anyhow::Result<Config> {
    let mut args = std::env::args().skip(1);
    match (args.next().as_deref(), args.next()) {
        (Some("--config"), Some(path)) => {
            let config = Config::from_file(&path)
                .with_context(|| format!("loading config from {}", path))?;
            config.validate()?;
            Ok(config)
        }
        (None, _) => Ok(Config::from_env()?),
        _ => anyhow::bail!("usage: plasma-operator [--config <path>]"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = load_config()?;
    tracing::info!(
        data_dir = %config.data_dir.display(),
        block_interval_ms = config.chain.block_interval_ms,
        "Starting Plasma operator"
    );

    let operator = Operator::open(config).await?;

    tokio::signal::ctrl_c().await?;

    tracing::info!(
        status = %serde_json::to_string(&operator.status())?,
        "Shutting down Plasma operator"
    );
    operator.shutdown().await?;

    Ok(())
}
