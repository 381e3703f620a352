//! # Watch Loop
//!
//! Runs the kube-runtime controller over Kyma resources and the Manifests
//! they own until a shutdown signal arrives.

use crate::constants;
use crate::controller::reconciler::{reconcile, KymaReconciler};
use crate::controller::server::ServerState;
use crate::crd::{Kyma, Manifest};
use crate::runtime::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use anyhow::Result;
use futures::StreamExt;
use kube::runtime::controller::{self, Controller};
use kube::runtime::watcher;
use kube::{Api, Client};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub async fn run_watch_loop(
    client: Client,
    reconciler: Arc<KymaReconciler>,
    server_state: Arc<ServerState>,
) -> Result<()> {
    let kymas: Api<Kyma> = Api::all(client.clone());
    let manifests: Api<Manifest> = Api::all(client);
    let concurrency = reconciler.config().max_concurrent_reconciles;
    let watch_backoff = Arc::new(AtomicU64::new(constants::DEFAULT_WATCH_INITIAL_BACKOFF_MS));

    server_state.set_ready(true);
    info!(concurrency, "starting kyma controller");

    Controller::new(kymas, watcher::Config::default())
        .owns(manifests, watcher::Config::default())
        .with_config(controller::Config::default().concurrency(concurrency))
        .shutdown_on_signal()
        .run(reconcile, handle_reconciliation_error, reconciler)
        .for_each(|result| {
            let watch_backoff = Arc::clone(&watch_backoff);
            async move {
                match result {
                    Ok((kyma, _action)) => {
                        debug!(kyma = %kyma, "reconciled");
                        watch_backoff.store(
                            constants::DEFAULT_WATCH_INITIAL_BACKOFF_MS,
                            Ordering::Relaxed,
                        );
                    }
                    Err(controller::Error::ReconcilerFailed(error, kyma)) => {
                        warn!(kyma = %kyma, error = %error, "reconciliation failed");
                    }
                    Err(controller::Error::ObjectNotFound(kyma)) => {
                        debug!(kyma = %kyma, "kyma no longer exists");
                    }
                    Err(other) => {
                        handle_watch_stream_error(
                            &other.to_string(),
                            &watch_backoff,
                            constants::DEFAULT_WATCH_MAX_BACKOFF_MS,
                        )
                        .await;
                    }
                }
            }
        })
        .await;

    server_state.set_ready(false);
    info!("kyma controller stopped");
    Ok(())
}
