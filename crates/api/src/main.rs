use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};

use orderflow_infra::{Pipeline, PipelineConfig};

// The runtime is built by hand: backends are connected from this thread
// before any async context exists, because the Postgres stores block on it.
fn main() -> anyhow::Result<()> {
    orderflow_observability::init();

    let config = PipelineConfig::from_env().context("load configuration")?;
    let listen_addr = config.listen_addr;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;

    let pipeline = Pipeline::builder(config)
        .connect_backends(runtime.handle())
        .context("connect backends")?
        .build()
        .context("assemble pipeline")?;
    let pipeline = Arc::new(pipeline);
    let workers = pipeline.start().context("start worker pools")?;

    let app = orderflow_api::app::build_app(pipeline.clone());
    let served = runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(listen_addr)
            .await
            .with_context(|| format!("bind {listen_addr}"))?;
        info!(addr = %listen_addr, "listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("serve http")
    });

    info!("stopping worker pools");
    workers.shutdown();
    served
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "cannot listen for ctrl-c; running until killed");
        std::future::pending::<()>().await;
    }
}
