//! beacond — beacon origination, propagation and registration daemon.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tokio::task::JoinSet;

use beacon_core::config::BeaconConfig;
use beacon_core::crypto::Signer;
use beacon_services::{
    new_extender, BeaconHandler, CancelToken, Extender, ExtenderConfig, Interfaces,
    MemoryBeaconStore, Originator, Propagator, Registrar, SegmentRegistry, StorePolicy,
};

mod keys;
mod loops;
mod net;

use net::UdpTransport;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = BeaconConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = BeaconConfig::load().context("failed to load config")?;
    let general = &config.general;
    let beaconing = &config.beaconing;
    if general.ia.is_wildcard() {
        bail!("general.ia must name the local AS");
    }
    tracing::info!(
        ia = %general.ia,
        core = general.core,
        scheme = ?beaconing.scheme,
        interfaces = config.interfaces.len(),
        "beacond starting"
    );

    // Keys
    let hop_key = Arc::new(keys::load_or_create_hop_key(&config.keys.master_secret_path)?);
    let signer = Arc::new(keys::load_or_create_signing_identity(&config.keys.signing_key_path)?);
    tracing::info!(public_key = hex::encode(signer.public_key()), "signing identity ready");

    // Shared state
    let interfaces = Interfaces::from_config(&config.interfaces);
    let store = MemoryBeaconStore::new(
        StorePolicy {
            local_ia: general.ia,
            core: general.core,
            best_set_size: beaconing.best_set_size,
            max_hops: beaconing.max_hops,
            channel_capacity: beaconing.channel_capacity,
        },
        interfaces.clone(),
    );
    let registry = SegmentRegistry::new();
    let transport = UdpTransport::bind(&config.interfaces).await?;

    let max_exp_time = beaconing.max_exp_time;
    let extender = |task: &str| -> Arc<dyn Extender> {
        new_extender(
            beaconing.scheme,
            ExtenderConfig {
                ia: general.ia,
                signer: signer.clone(),
                mac: hop_key.clone(),
                interfaces: interfaces.clone(),
                mtu: general.mtu,
                max_exp_time: Some(Arc::new(move || max_exp_time)),
                task: task.to_string(),
            },
        )
    };

    let handler = Arc::new(BeaconHandler::new(
        general.ia,
        interfaces.clone(),
        Arc::new(store.clone()),
    ));
    let originator = Arc::new(Originator::new(
        general.core,
        extender("originator"),
        interfaces.clone(),
        Arc::new(transport.clone()),
    ));
    let propagator = Arc::new(Propagator::new(
        general.core,
        extender("propagator"),
        interfaces.clone(),
        Arc::new(store.clone()),
        Arc::new(transport.clone()),
        beaconing.channel_capacity,
    ));
    let registrar = Arc::new(Registrar::new(
        general.core,
        extender("registrar"),
        interfaces.clone(),
        Arc::new(store.clone()),
        Arc::new(registry.clone()),
    ));
    let runs = beacon_api::RunLog::default();

    // ── Shutdown ─────────────────────────────────────────────────────────────
    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            cancel.cancel();
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────
    let secs = Duration::from_secs;
    let mut tasks = JoinSet::new();

    for link in transport.links() {
        tasks.spawn(net::recv_loop(
            link.clone(),
            interfaces.clone(),
            handler.clone(),
            cancel.clone(),
        ));
    }
    tasks.spawn(loops::keepalive_loop(
        general.ia,
        transport.clone(),
        interfaces.clone(),
        secs(config.ifstate.keepalive_interval_secs),
        secs(config.ifstate.keepalive_timeout_secs),
        cancel.clone(),
    ));
    tasks.spawn(loops::originate_loop(
        originator,
        secs(beaconing.originate_interval_secs),
        runs.clone(),
        cancel.clone(),
    ));
    tasks.spawn(loops::propagate_loop(
        propagator,
        secs(beaconing.propagate_interval_secs),
        runs.clone(),
        cancel.clone(),
    ));
    tasks.spawn(loops::register_loop(
        registrar,
        secs(beaconing.register_interval_secs),
        runs.clone(),
        cancel.clone(),
    ));
    tasks.spawn(loops::expiry_loop(
        store.clone(),
        registry.clone(),
        secs(beaconing.expiry_check_interval_secs),
        cancel.clone(),
    ));

    // Status HTTP endpoint
    if config.api.port != 0 {
        let api_state = beacon_api::ApiState {
            ia: general.ia,
            core: general.core,
            scheme: beaconing.scheme,
            started: Instant::now(),
            interfaces: interfaces.clone(),
            store,
            registry,
            runs,
        };
        let api_port = config.api.port;
        let api_cancel = cancel.clone();
        tasks.spawn(async move {
            tokio::select! {
                _ = api_cancel.cancelled() => {}
                r = beacon_api::serve(api_state, api_port) => {
                    if let Err(e) = r {
                        tracing::error!(error = %e, "status server failed");
                    }
                }
            }
        });
    }

    // ── Wait for exit ────────────────────────────────────────────────────────
    cancel.cancelled().await;
    tracing::info!("shutting down");
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "task exited abnormally");
        }
    }
    Ok(())
}
