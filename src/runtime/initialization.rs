//! # Initialization
//!
//! Process bootstrap: rustls provider, tracing, metrics, the HTTP server,
//! the control-plane client and the Kyma reconciler.

use crate::cluster::{build_client, KubeCluster, SharedCluster};
use crate::config::{ControllerConfig, ServerConfig};
use crate::constants::OPERATOR_NAME;
use crate::controller::reconciler::KymaReconciler;
use crate::controller::server::{start_server, ServerState};
use crate::crd::{Kyma, SyncStrategy};
use crate::events::KubeEventRecorder;
use crate::observability;
use crate::remote::{ClientCache, LocalClientConnector, RemoteClientLookup, SecretConnector};
use anyhow::{Context, Result};
use kube::api::{Api, ListParams};
use kube::Client;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Components the watch loop needs
pub struct InitializationResult {
    pub client: Client,
    pub reconciler: Arc<KymaReconciler>,
    pub server_state: Arc<ServerState>,
}

pub async fn initialize() -> Result<InitializationResult> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lifecycle_manager=info".into()),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting lifecycle manager");

    let controller_config = ControllerConfig::from_env();
    let server_config = ServerConfig::from_env();
    info!(
        in_kcp_mode = controller_config.in_kcp_mode,
        webhook_enabled = controller_config.webhook_enabled,
        remote_sync_namespace = %controller_config.remote_sync_namespace,
        "loaded controller configuration"
    );

    observability::metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::default());
    let state = ServerState::clone(&server_state);
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_config.port, state).await {
            error!(error = %e, "HTTP server error");
        }
    });
    wait_for_server_ready(&server_config, &server_handle).await?;

    let kube_config = kube::Config::infer()
        .await
        .context("Failed to infer kubeconfig for the control plane")?;
    let client = build_client(kube_config, controller_config.flow)
        .context("Failed to build control-plane client")?;
    let control_plane: SharedCluster = Arc::new(KubeCluster::new(client.clone(), "kcp"));

    let remote = RemoteClientLookup::new(Arc::new(ClientCache::new()))
        .with_connector(
            SyncStrategy::LocalSecret,
            Arc::new(SecretConnector::new(
                Arc::clone(&control_plane),
                controller_config.flow,
            )),
        )
        .with_connector(
            SyncStrategy::LocalClient,
            Arc::new(LocalClientConnector::new(Arc::clone(&control_plane))),
        );

    let events = Arc::new(KubeEventRecorder::new(client.clone(), OPERATOR_NAME));
    let reconciler = Arc::new(KymaReconciler::new(
        control_plane,
        remote,
        controller_config,
        events,
    ));

    log_existing_kymas(&Api::all(client.clone())).await;
    info!("controller initialized, starting watch loop");

    Ok(InitializationResult {
        client,
        reconciler,
        server_state,
    })
}

/// Wait until the HTTP server accepts connections
async fn wait_for_server_ready(
    config: &ServerConfig,
    server_handle: &tokio::task::JoinHandle<()>,
) -> Result<()> {
    let start_time = std::time::Instant::now();
    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }
        if tokio::net::TcpStream::connect(("127.0.0.1", config.port))
            .await
            .is_ok()
        {
            info!(port = config.port, "HTTP server is accepting connections");
            return Ok(());
        }
        if start_time.elapsed() > config.startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                config.startup_timeout.as_secs()
            ));
        }
        tokio::time::sleep(config.poll_interval).await;
    }
}

/// Log a per-namespace summary of the Kymas present at startup
async fn log_existing_kymas(kymas: &Api<Kyma>) {
    let list = match kymas.list(&ListParams::default()).await {
        Ok(list) => list,
        Err(e) => {
            error!(error = %e, "Kyma CRD is not queryable, is it installed?");
            warn!("continuing, the watch will retry");
            return;
        }
    };

    let mut by_namespace: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for kyma in &list.items {
        by_namespace
            .entry(kyma.namespace())
            .or_default()
            .push(kyma.name());
    }
    info!(
        total = list.items.len(),
        namespaces = by_namespace.len(),
        "found existing kymas"
    );
    for (namespace, mut names) in by_namespace {
        names.sort_unstable();
        let shown = if names.len() <= 3 {
            names.join(", ")
        } else {
            format!("{}, ... ({} total)", names[..3].join(", "), names.len())
        };
        info!(namespace, kymas = %shown, "existing kymas");
    }
}
