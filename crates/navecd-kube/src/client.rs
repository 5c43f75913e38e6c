//! Dynamic cluster client
//!
//! Applies and deletes arbitrary Kubernetes objects without compile-time
//! type knowledge, using Server-Side Apply with a configurable field
//! manager. The [`ClusterClient`] trait is the seam the reconcilers and
//! the garbage collector work against; tests substitute a recording fake.

use std::time::Duration;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams};
use kube::core::GroupVersionKind;
use kube::discovery::{ApiResource, Discovery, Scope};
use serde_json::Value;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use navecd_core::{ExtendedObject, TypeMeta};

use crate::error::{KubeError, Result};

/// Options for a single apply request.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyOptions {
    /// Take ownership of conflicting fields.
    pub force: bool,
    /// Validate without persisting.
    pub dry_run: bool,
}

/// Cluster operations needed by the reconcilers.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Server-side applies `object` under the given field manager.
    async fn apply(
        &self,
        object: &Value,
        field_manager: &str,
        options: ApplyOptions,
    ) -> Result<()>;

    /// Reads an object; `Ok(None)` when it does not exist.
    async fn get(
        &self,
        type_meta: &TypeMeta,
        name: &str,
        namespace: &str,
    ) -> Result<Option<Value>>;

    /// Deletes an object; absent objects are not an error.
    async fn delete(&self, type_meta: &TypeMeta, name: &str, namespace: &str) -> Result<()>;
}

/// How long an apply keeps retrying while the resource type is absent.
/// Covers bootstrap, where custom resources are applied in the same tick
/// that creates their CRD.
const NOT_FOUND_RETRY_TIMEOUT: Duration = Duration::from_secs(60);
const NOT_FOUND_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Applies an extended object with conflict and not-found handling:
///
/// 1. apply with `force = true`;
/// 2. on conflict, strip every field marked `OnConflict` from the payload
///    and retry once without force; a second conflict is surfaced;
/// 3. while the resource type is unknown, retry every second up to the
///    60 s timeout, honoring cancellation between attempts.
pub async fn apply_object(
    client: &dyn ClusterClient,
    object: &ExtendedObject,
    field_manager: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    let deadline = tokio::time::Instant::now() + NOT_FOUND_RETRY_TIMEOUT;

    loop {
        if cancel.is_cancelled() {
            return Err(KubeError::Canceled);
        }

        let result = client
            .apply(
                &object.object,
                field_manager,
                ApplyOptions {
                    force: true,
                    dry_run: false,
                },
            )
            .await;

        match result {
            Ok(()) => return Ok(()),
            Err(err) if err.is_conflict() => {
                debug!(
                    name = object.name(),
                    namespace = object.namespace(),
                    kind = object.kind(),
                    "Apply conflict, retrying without ignored fields"
                );
                let retry_payload = object.conflict_retry_object();
                return client
                    .apply(
                        &retry_payload,
                        field_manager,
                        ApplyOptions {
                            force: false,
                            dry_run: false,
                        },
                    )
                    .await;
            }
            Err(err) if err.is_not_found() => {
                if tokio::time::Instant::now() >= deadline {
                    return Err(KubeError::Timeout {
                        seconds: NOT_FOUND_RETRY_TIMEOUT.as_secs(),
                        message: err.to_string(),
                    });
                }
                warn!(
                    name = object.name(),
                    kind = object.kind(),
                    "Resource type not available yet, retrying"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(KubeError::Canceled),
                    _ = tokio::time::sleep(NOT_FOUND_RETRY_INTERVAL) => {}
                }
            }
            Err(err) => return Err(err),
        }
    }
}

/// Discovery-backed dynamic client over a live cluster.
pub struct DynamicApplier {
    client: kube::Client,
    discovery: RwLock<Discovery>,
}

impl DynamicApplier {
    pub async fn new(client: kube::Client) -> Result<Self> {
        let discovery = Discovery::new(client.clone()).run().await?;
        Ok(Self {
            client,
            discovery: RwLock::new(discovery),
        })
    }

    pub fn kube_client(&self) -> &kube::Client {
        &self.client
    }

    fn gvk(type_meta: &TypeMeta) -> GroupVersionKind {
        let (group, version) = match type_meta.api_version.rsplit_once('/') {
            Some((group, version)) => (group.to_string(), version.to_string()),
            None => (String::new(), type_meta.api_version.clone()),
        };
        GroupVersionKind {
            group,
            version,
            kind: type_meta.kind.clone(),
        }
    }

    /// Resolves the api resource for a type, refreshing the discovery
    /// cache once on a miss so types added mid-tick (new CRDs) are found.
    async fn resolve(&self, type_meta: &TypeMeta) -> Result<(ApiResource, Scope)> {
        let gvk = Self::gvk(type_meta);

        if let Some((resource, capabilities)) = self.discovery.read().await.resolve_gvk(&gvk) {
            return Ok((resource, capabilities.scope));
        }

        let refreshed = Discovery::new(self.client.clone()).run().await?;
        let mut discovery = self.discovery.write().await;
        *discovery = refreshed;

        discovery
            .resolve_gvk(&gvk)
            .map(|(resource, capabilities)| (resource, capabilities.scope))
            .ok_or_else(|| KubeError::UnknownResourceType {
                api_version: type_meta.api_version.clone(),
                kind: type_meta.kind.clone(),
            })
    }

    async fn api_for(
        &self,
        type_meta: &TypeMeta,
        namespace: &str,
    ) -> Result<Api<DynamicObject>> {
        let (resource, scope) = self.resolve(type_meta).await?;
        let api = if scope == Scope::Namespaced {
            let namespace = if namespace.is_empty() {
                "default"
            } else {
                namespace
            };
            Api::namespaced_with(self.client.clone(), namespace, &resource)
        } else {
            Api::all_with(self.client.clone(), &resource)
        };
        Ok(api)
    }

    fn map_api_error(err: kube::Error) -> KubeError {
        match &err {
            kube::Error::Api(response) if response.code == 409 => KubeError::Conflict {
                message: response.message.clone(),
            },
            kube::Error::Api(response) if response.code == 404 => KubeError::NotFound {
                message: response.message.clone(),
            },
            _ => KubeError::Api(err),
        }
    }

    fn type_meta_of(object: &Value) -> Result<TypeMeta> {
        let api_version = object
            .get("apiVersion")
            .and_then(Value::as_str)
            .ok_or_else(|| KubeError::InvalidObject {
                message: "object is missing apiVersion".to_string(),
            })?;
        let kind = object
            .get("kind")
            .and_then(Value::as_str)
            .ok_or_else(|| KubeError::InvalidObject {
                message: "object is missing kind".to_string(),
            })?;
        Ok(TypeMeta {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
        })
    }
}

#[async_trait]
impl ClusterClient for DynamicApplier {
    async fn apply(
        &self,
        object: &Value,
        field_manager: &str,
        options: ApplyOptions,
    ) -> Result<()> {
        let type_meta = Self::type_meta_of(object)?;
        let name = object
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .ok_or_else(|| KubeError::InvalidObject {
                message: "object is missing metadata.name".to_string(),
            })?;
        let namespace = object
            .pointer("/metadata/namespace")
            .and_then(Value::as_str)
            .unwrap_or("");

        let api = self.api_for(&type_meta, namespace).await?;

        let mut params = PatchParams::apply(field_manager);
        params.force = options.force;
        if options.dry_run {
            params.dry_run = true;
        }

        let dynamic: DynamicObject = serde_json::from_value(object.clone())?;
        api.patch(name, &params, &Patch::Apply(&dynamic))
            .await
            .map(|_| ())
            .map_err(Self::map_api_error)
    }

    async fn get(
        &self,
        type_meta: &TypeMeta,
        name: &str,
        namespace: &str,
    ) -> Result<Option<Value>> {
        let api = self.api_for(type_meta, namespace).await?;
        match api.get_opt(name).await.map_err(Self::map_api_error)? {
            Some(object) => Ok(Some(serde_json::to_value(object)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, type_meta: &TypeMeta, name: &str, namespace: &str) -> Result<()> {
        let api = self.api_for(type_meta, namespace).await?;
        let params = DeleteParams {
            propagation_policy: Some(kube::api::PropagationPolicy::Background),
            ..Default::default()
        };

        match api.delete(name, &params).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(response)) if response.code == 404 => Ok(()),
            Err(err) => Err(Self::map_api_error(err)),
        }
    }
}

/// Clones a client config and impersonates the given service account, used
/// when a GitOpsProject pins its permissions to a dedicated account.
pub fn impersonate_service_account(
    mut config: kube::Config,
    namespace: &str,
    service_account: &str,
) -> kube::Config {
    config.auth_info.impersonate =
        Some(format!("system:serviceaccount:{namespace}:{service_account}"));
    config
}
