//! # Remote Kyma Sync
//!
//! The runtime copy of a Kyma owns module selection; the control-plane copy
//! owns status. Before processing, CRDs are brought up to date and the spec is
//! taken over from the runtime copy; after processing, status flows back.

use crate::controller::reconciler::types::{KymaReconciler, NextAction, ReconcileError};
use crate::cluster::ClusterClientExt;
use crate::crd::Kyma;
use crate::events::reasons;
use crate::remote::{crd_sync, SessionError, SyncSession};
use tracing::debug;

impl KymaReconciler {
    /// Returns the action ending the pass early, if any
    pub(super) async fn sync_from_remote(
        &self,
        kyma: &mut Kyma,
        session: &SyncSession,
    ) -> Result<Option<NextAction>, ReconcileError> {
        match crd_sync::sync_crds(session, kyma).await {
            Ok(true) => {
                self.control_plane.update_as(&*kyma).await?;
                return Ok(Some(NextAction::RequeueImmediately));
            }
            Ok(false) => {}
            Err(e) => {
                return self
                    .requeue_with_error(kyma, reasons::CRD_INSTALLATION, &e.into())
                    .await
                    .map(Some);
            }
        }

        let remote = match session
            .create_or_fetch_remote_kyma(kyma, self.events.as_ref())
            .await
        {
            Ok(remote) => remote,
            Err(SessionError::NotFoundAndKcpKymaUnderDeleting) => return Ok(None),
            Err(e) => {
                return self
                    .requeue_with_error(kyma, reasons::REMOTE_KYMA_ERROR, &e.into())
                    .await
                    .map(Some);
            }
        };
        SyncSession::replace_spec(kyma, &remote);
        if let Err(e) = session.synchronize_kyma_metadata(kyma, &remote).await {
            return self
                .requeue_with_error(kyma, reasons::REMOTE_KYMA_ERROR, &e.into())
                .await
                .map(Some);
        }
        debug!(modules = kyma.spec.modules.len(), "took over spec from remote kyma");
        Ok(None)
    }

    pub(super) async fn sync_status_to_remote(
        &self,
        kyma: &Kyma,
        session: &SyncSession,
    ) -> Result<(), ReconcileError> {
        let remote = match session
            .create_or_fetch_remote_kyma(kyma, self.events.as_ref())
            .await
        {
            Ok(remote) => remote,
            Err(SessionError::NotFoundAndKcpKymaUnderDeleting) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        session.synchronize_remote_kyma(kyma, &remote).await?;
        Ok(())
    }
}
