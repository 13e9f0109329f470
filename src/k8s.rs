//! Thin idempotent-apply helpers shared by `namespace`, `stack`, and
//! `orchestrator`. Generalizes the teacher's patch-or-create pattern
//! (`enforcement::apply_remediation`) from a fixed set of workload kinds to
//! any statically-typed `kube::Resource`.

use std::fmt::Debug;

use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::error::Result;

/// Field manager used for every server-side apply this crate issues.
pub const FIELD_MANAGER: &str = "labondemand-orchestrator";

/// Upsert `obj` via Kubernetes server-side apply. Creating it, patching a
/// changed object, and re-applying an identical object all go through this
/// one call, which is what makes every caller idempotent (§4.7 step 3: "on
/// 'already exists', fetch the existing object and patch... never rewrite
/// Secret data on conflict" — callers that must not overwrite data use
/// `get_or_create` instead of this).
pub async fn apply<K>(api: &Api<K>, name: &str, obj: &K) -> Result<K>
where
    K: Resource + Clone + Debug + Serialize + DeserializeOwned,
{
    let patch = Patch::Apply(obj);
    let params = PatchParams::apply(FIELD_MANAGER).force();
    let applied = api.patch(name, &params, &patch).await?;
    Ok(applied)
}

/// Fetch `name` if it already exists; otherwise create `obj`. Unlike `apply`,
/// this never touches an existing object's data — used for Secrets, whose
/// generated credentials must be reused verbatim on retry (§4.5, §8
/// "Secret non-regeneration"). The returned `bool` is `true` when `obj` was
/// just created, `false` when an existing object was fetched instead —
/// callers that hand out generated credentials need to know which happened
/// so they never surface fabricated ones for a reused object.
pub async fn get_or_create<K>(api: &Api<K>, name: &str, obj: K) -> Result<(K, bool)>
where
    K: Resource + Clone + Debug + Serialize + DeserializeOwned,
{
    match api.get(name).await {
        Ok(existing) => Ok((existing, false)),
        Err(kube::Error::Api(e)) if e.code == 404 => {
            let created = api.create(&Default::default(), &obj).await?;
            info!(name, "object_created");
            Ok((created, true))
        }
        Err(e) => Err(e.into()),
    }
}

/// Patch only labels/annotations on an existing object to match `expected`,
/// without touching its spec/data. Used to bring a reused Secret's labels
/// back in line after a partial-creation retry.
pub async fn patch_metadata<K>(api: &Api<K>, name: &str, labels: &std::collections::BTreeMap<String, String>) -> Result<()>
where
    K: Resource + Clone + Debug + Serialize + DeserializeOwned,
{
    let patch = serde_json::json!({ "metadata": { "labels": labels } });
    api.patch(
        name,
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}

/// Ensure a namespace exists, tolerating a racing create (AlreadyExists).
pub async fn ensure_namespace_exists(client: &Client, name: &str) -> Result<()> {
    let api: Api<Namespace> = Api::all(client.clone());
    let ns = Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    match api.create(&Default::default(), &ns).await {
        Ok(_) => {
            info!(namespace = name, "namespace_created");
            Ok(())
        }
        Err(kube::Error::Api(e)) if e.code == 409 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Delete a namespace (cascades all cluster objects in it). Best-effort: a
/// 404 is not an error, any other failure is logged and swallowed by the
/// caller's own error boundary per §4.8 ("a failure inside one entity never
/// aborts the cycle").
pub async fn delete_namespace_best_effort(client: &Client, name: &str) {
    let api: Api<Namespace> = Api::all(client.clone());
    if let Err(e) = api.delete(name, &Default::default()).await {
        if !matches!(&e, kube::Error::Api(e) if e.code == 404) {
            warn!(namespace = name, error = %e, "namespace_delete_failed");
        }
    }
}
