//! # CRD Sync
//!
//! Keeps the operator CRDs in the runtime cluster at the control plane's
//! revision. The generations last seen on both sides are remembered as
//! annotations on the control-plane Kyma (`<kind>-kcp-crd-generation` and
//! `<kind>-skr-crd-generation`); a mismatch on either side re-applies the
//! control-plane CRD.

use super::error::SessionError;
use super::session::SyncSession;
use crate::cluster::{ignore_not_found, ClusterClientExt, ObjectKey};
use crate::crd::{crd_name, Kyma};
use crate::observability::metrics;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use std::collections::BTreeMap;
use tracing::info;

/// CRDs mirrored into every runtime cluster
pub const SYNCED_CRD_PLURALS: [&str; 2] = ["kymas", "moduletemplates"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrdSide {
    Kcp,
    Skr,
}

impl CrdSide {
    fn as_str(self) -> &'static str {
        match self {
            CrdSide::Kcp => "kcp",
            CrdSide::Skr => "skr",
        }
    }
}

/// Annotation on the Kyma recording the generation of `crd` on one side
pub fn generation_annotation(crd: &CustomResourceDefinition, side: CrdSide) -> String {
    format!(
        "{}-{}-crd-generation",
        crd.spec.names.kind.to_lowercase(),
        side.as_str()
    )
}

fn generation(crd: &CustomResourceDefinition) -> String {
    crd.metadata.generation.unwrap_or_default().to_string()
}

fn recorded<'a>(kyma: &'a Kyma, annotation: &str) -> Option<&'a str> {
    kyma.metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(annotation))
        .map(String::as_str)
}

/// Whether either side moved since the generations recorded on `kyma`
pub fn should_patch(kyma: &Kyma, kcp_crd: &CustomResourceDefinition, skr_crd: &CustomResourceDefinition) -> bool {
    recorded(kyma, &generation_annotation(kcp_crd, CrdSide::Kcp)) != Some(generation(kcp_crd).as_str())
        || recorded(kyma, &generation_annotation(skr_crd, CrdSide::Skr)) != Some(generation(skr_crd).as_str())
}

fn record(kyma: &mut Kyma, crd: &CustomResourceDefinition, side: CrdSide) {
    kyma.metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(generation_annotation(crd, side), generation(crd));
}

/// Re-apply outdated CRDs and record the new generations on `kyma`
///
/// Returns true when annotations changed and the Kyma needs to be persisted.
/// A CRD missing on either side is skipped.
pub async fn sync_crds(session: &SyncSession, kyma: &mut Kyma) -> Result<bool, SessionError> {
    let mut updated = false;
    for plural in SYNCED_CRD_PLURALS {
        updated |= sync_crd(session, kyma, plural).await?;
    }
    Ok(updated)
}

async fn sync_crd(session: &SyncSession, kyma: &mut Kyma, plural: &str) -> Result<bool, SessionError> {
    let key = ObjectKey::cluster_scoped(crd_name(plural));
    let Some(kcp_crd) = ignore_not_found(
        session
            .control_plane()
            .get_as::<CustomResourceDefinition>(&key)
            .await,
    )?
    else {
        return Ok(false);
    };
    let Some(skr_crd) = ignore_not_found(session.runtime().get_as::<CustomResourceDefinition>(&key).await)?
    else {
        return Ok(false);
    };

    if !should_patch(kyma, &kcp_crd, &skr_crd) {
        return Ok(false);
    }

    session.patch_crd(&kcp_crd).await?;
    metrics::increment_crd_updates();
    let skr_crd: CustomResourceDefinition = session.runtime().get_as(&key).await?;
    record(kyma, &kcp_crd, CrdSide::Kcp);
    record(kyma, &skr_crd, CrdSide::Skr);
    info!(
        crd = %key,
        kyma = kyma.name(),
        kcp_generation = generation(&kcp_crd),
        skr_generation = generation(&skr_crd),
        "updated CRD in runtime cluster"
    );
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{InMemoryCluster, Resource};
    use crate::crd::{KymaSpec, ModuleTemplate};
    use kube::CustomResourceExt;
    use std::sync::Arc;

    fn with_generation(mut crd: CustomResourceDefinition, generation: i64) -> Resource {
        crd.metadata.generation = Some(generation);
        Resource::CustomResourceDefinition(crd)
    }

    #[test]
    fn test_annotation_name() {
        assert_eq!(
            generation_annotation(&Kyma::crd(), CrdSide::Kcp),
            "kyma-kcp-crd-generation"
        );
        assert_eq!(
            generation_annotation(&ModuleTemplate::crd(), CrdSide::Skr),
            "moduletemplate-skr-crd-generation"
        );
    }

    #[tokio::test]
    async fn test_outdated_crds_are_patched_once() {
        let kcp = Arc::new(InMemoryCluster::new("kcp"));
        kcp.insert(with_generation(Kyma::crd(), 3));
        kcp.insert(with_generation(ModuleTemplate::crd(), 2));
        let skr = Arc::new(InMemoryCluster::new("skr"));
        skr.insert(with_generation(Kyma::crd(), 1));
        let session = SyncSession::new(kcp, skr, "kyma-system");

        let mut kyma = Kyma::new("tenant", KymaSpec::default());
        assert!(sync_crds(&session, &mut kyma).await.unwrap());

        let annotations = kyma.metadata.annotations.clone().unwrap();
        assert_eq!(annotations["kyma-kcp-crd-generation"], "3");
        assert!(annotations.contains_key("kyma-skr-crd-generation"));
        // ModuleTemplate CRD is absent in the runtime cluster
        assert!(!annotations.contains_key("moduletemplate-kcp-crd-generation"));

        assert!(!sync_crds(&session, &mut kyma).await.unwrap());
    }
}
