//! Binary entry point for a dispatch node.
//!
//! Loads [`NodeConfig`], initialises `tracing`, binds a [`Dispatcher`] to the
//! configured address with an empty handler registry and no injected
//! services, and runs until a shutdown signal arrives. A real deployment
//! registers its own handlers via [`HandlerRegistry`] and supplies its own
//! [`ServiceResolver`] before reaching this point; this binary is the thin
//! shell spec.md §1 scopes "application bootstrap" out of — it exists only
//! so the crate produces a runnable node, not as the place application
//! wiring belongs.

use std::sync::Arc;

use anyhow::Result;
use dispatchd::{
    codec::NullTypeResolver,
    config::NodeConfig,
    dispatcher::Dispatcher,
    invoker::HandlerInvoker,
    registry::HandlerRegistry,
    service::EmptyServiceResolver,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = NodeConfig::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_filter.clone()))
        .init();

    let registry = Arc::new(HandlerRegistry::new());
    let invoker = Arc::new(HandlerInvoker::default());
    let resolver = Arc::new(EmptyServiceResolver);

    let dispatcher = Dispatcher::bind(
        config.bind,
        registry,
        invoker,
        resolver,
        Arc::new(NullTypeResolver),
        config.dispatcher_config(),
    )
    .await?;

    tracing::info!(address = ?dispatcher.local_end_point(), "dispatchd node listening");

    shutdown_signal().await;
    tracing::info!("shutdown signal received");

    Ok(())
}

/// Waits for a shutdown signal, completing when termination is requested.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    res = tokio::signal::ctrl_c() => {
                        if let Err(err) = res {
                            tracing::warn!(%err, "failed to listen for Ctrl-C");
                        }
                    },
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to install SIGTERM handler");
                wait_for_ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        wait_for_ctrl_c().await;
    }
}

async fn wait_for_ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(%err, "failed to listen for Ctrl-C");
    }
}
