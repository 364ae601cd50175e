use std::net::SocketAddr;

use tracing::{info, warn};

use radiocast_engine::http::build_router;
use radiocast_engine::lease::{process_identity, LeaseCoordinator};
use radiocast_engine::{EngineConfig, Scheduler, Station};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?);
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let version = env!("CARGO_PKG_VERSION");
    let cfg = EngineConfig::from_env();
    info!(
        data = %cfg.data_file.display(),
        state = %cfg.state_file.display(),
        media = %cfg.media_dir.display(),
        "radiocast engine v{version}"
    );

    let station = Station::open(cfg.clone()).await?;

    // Every process serves the API; only the lease holder advances the channel.
    let identity = process_identity();
    let lease = LeaseCoordinator::new(&cfg.lease_file, cfg.lease_ttl);
    let scheduler = Scheduler::new(station.clone(), lease.clone(), identity.clone());
    let scheduler_task = tokio::spawn(scheduler.run());

    let app = build_router(station);

    // Bind loopback by default; put Nginx/Caddy in front for LAN/Internet.
    let addr: SocketAddr = cfg.bind;
    info!(%identity, "engine listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler_task.abort();
    let release = tokio::task::spawn_blocking(move || lease.release(&identity)).await?;
    if let Err(e) = release {
        warn!("failed to release scheduler lease: {e:#}");
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async { tokio::signal::ctrl_c().await.ok(); };

    #[cfg(unix)]
    let term = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let term = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = term => {},
    }

    warn!("Shutdown signal received.");
}
