//! coopd entry point.
//!
//! Wires the services together and runs until a shutdown signal:
//!
//! ```text
//! main()
//!  └─ config::load_or_init()      -- persists the generated device uuid
//!  └─ Manager::new()              -- peer registry + collaborators
//!  └─ start services
//!       ├─ discovery responder    (UDP background thread + event pump)
//!       ├─ pair listener          (TCP accept loop)
//!       └─ ctrl-c handler
//!  └─ manager.shutdown()          -- drain sessions, stop discovery
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use coop_daemon::clipboard::NullClipboard;
use coop_daemon::config;
use coop_daemon::discovery;
use coop_daemon::listener;
use coop_daemon::manager::{Collaborators, Manager, ManagerSettings};
use coop_daemon::wrappers::{CopyProcess, DesktopNotifier, DialogConfirm, ProcessInjectorFactory};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load_or_init().context("loading configuration")?;

    // Structured logging; RUST_LOG overrides the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cfg.daemon.log_level.clone())),
        )
        .init();

    info!(
        device = %cfg.device.name,
        uuid = %cfg.device.uuid,
        "coopd starting"
    );

    let bind_address: std::net::IpAddr = cfg
        .network
        .bind_address
        .parse()
        .context("parsing network.bind_address")?;

    std::fs::create_dir_all(&cfg.storage.data_dir).context("creating data dir")?;
    std::fs::create_dir_all(&cfg.storage.receive_dir).context("creating receive dir")?;

    let settings = ManagerSettings::from_config(&cfg);
    let running = Arc::new(AtomicBool::new(true));

    // ── Discovery responder ───────────────────────────────────────────────────
    let (pinger, mut discovery_rx) = discovery::start_beacon_responder(
        bind_address,
        cfg.network.discovery_port,
        settings.local_info.clone(),
        cfg.network.tcp_port,
        Arc::clone(&running),
    )
    .context("starting discovery responder")?;

    let manager = Manager::new(
        settings,
        Collaborators {
            clipboard: Arc::new(NullClipboard),
            notifier: Arc::new(DesktopNotifier::new(cfg.helpers.notify.clone())),
            confirmer: Arc::new(DialogConfirm::new(cfg.helpers.confirm_dialog.clone())),
            file_transfer: Arc::new(CopyProcess::new(cfg.helpers.copy.clone())),
            beacon: Arc::new(pinger),
            injectors: Arc::new(ProcessInjectorFactory::new(cfg.helpers.injector.clone())),
        },
    );

    // ── Discovery event pump ──────────────────────────────────────────────────
    {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            while let Some(event) = discovery_rx.recv().await {
                if let Err(e) = manager.on_beacon(event.ip, event.tcp_port, event.info) {
                    error!(%event.ip, "dropped beacon: {e}");
                }
            }
        });
    }

    // ── Pair listener ─────────────────────────────────────────────────────────
    let pair_listener = listener::bind(bind_address, cfg.network.tcp_port)
        .await
        .context("binding pair listener")?;
    let accept_task = tokio::spawn(listener::accept_loop(
        pair_listener,
        Arc::clone(&manager),
    ));

    info!("coopd ready");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown signal received");

    running.store(false, Ordering::Relaxed);
    accept_task.abort();
    manager.shutdown().await;

    info!("coopd stopped");
    Ok(())
}
