//! Stack Builder (§4.5): produces the deterministic ordered object graph for
//! a lab and applies it to the cluster.

pub mod blueprint;
pub mod objects;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::Client;
use kube::api::Api;

use crate::clamp::ResourceRequest;
use crate::config::Config;
use crate::error::Result;
use crate::models::{Role, StackKind};
use blueprint::{ComponentRole, blueprint_for};

/// One object in the plan, in application order. Carries enough identity for
/// the orchestrator to report created objects and access URLs back to the
/// caller (§4.7 step 4).
#[derive(Debug, Clone)]
pub enum StackObject {
    Secret { name: String },
    Pvc { name: String, component: ComponentRole },
    Service { name: String, component: ComponentRole, node_port: bool },
    Deployment { name: String, component: ComponentRole, replicas: i32 },
    Ingress { name: String, host: String },
}

/// Per-lab parameters resolved by the caller before building the plan:
/// clamped+floored resources (the same values are applied to every
/// component's Deployment in this revision — a future revision could carry
/// per-component overrides).
pub struct LabParams<'a> {
    pub lab_name: &'a str,
    pub user_id: i64,
    pub role: Role,
    pub stack: StackKind,
    pub image_override: Option<&'a str>,
    pub resources: ResourceRequest,
}

/// Result of applying the plan: the objects actually created/patched, plus
/// any transient generated credentials (never logged) and access URLs.
pub struct ApplyOutcome {
    pub objects: Vec<StackObject>,
    pub credentials: Vec<(String, String)>,
    pub access_urls: Vec<String>,
}

fn component_labels(params: &LabParams<'_>, component: ComponentRole) -> std::collections::BTreeMap<String, String> {
    objects::labels(
        params.user_id,
        role_str(params.role),
        params.lab_name,
        params.stack.as_str(),
        component.as_str(),
    )
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::Student => "student",
        Role::Teacher => "teacher",
        Role::Admin => "admin",
    }
}

/// Apply the full object graph for a lab in strict dependency order: Secret,
/// then every PVC (component order), then each component's Service and
/// Deployment, then an optional Ingress (§4.5, §5 ordering guarantees).
///
/// Idempotent: re-applying a lab whose objects partially exist reuses the
/// existing Secret verbatim and upserts everything else via server-side
/// apply (§4.7 step 3, §8 "Secret non-regeneration").
pub async fn apply_stack(
    client: &Client,
    config: &Config,
    namespace: &str,
    params: &LabParams<'_>,
) -> Result<ApplyOutcome> {
    let bp = blueprint_for(params.stack);
    let mut plan = Vec::new();
    let mut credentials = Vec::new();
    let mut access_urls = Vec::new();

    let secret_name = if bp.needs_secret {
        let name = format!("{}-secret", params.lab_name);
        let labels = component_labels(params, ComponentRole::Main);
        let (secret, generated_db_password, generated_admin_password) = objects::build_secret(&name, labels);
        let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
        let (applied, created) = crate::k8s::get_or_create(&api, &name, secret).await?;
        // On reuse the generated passwords above were never written anywhere
        // and must be discarded; read the Secret's actual data back instead
        // so callers never see credentials that don't match the cluster.
        let (db_password, admin_password) = if created {
            (generated_db_password, generated_admin_password)
        } else {
            (
                objects::secret_data_utf8(&applied, "mysql-root-password").unwrap_or(generated_db_password),
                objects::secret_data_utf8(&applied, "admin-password").unwrap_or(generated_admin_password),
            )
        };
        credentials.push(("db_password".to_string(), db_password));
        credentials.push(("admin_password".to_string(), admin_password));
        plan.push(StackObject::Secret { name: name.clone() });
        Some(name)
    } else {
        None
    };

    let mut pvc_names = std::collections::HashMap::new();
    for component in &bp.components {
        if let Some(pvc_bp) = &component.pvc {
            let name = if component.role == ComponentRole::Main {
                format!("{}-pvc", params.lab_name)
            } else {
                format!("{}-{}-pvc", params.lab_name, component.role.as_str())
            };
            let labels = component_labels(params, component.role);
            let pvc = objects::build_pvc(&name, labels, pvc_bp.storage_gi);
            let api: Api<PersistentVolumeClaim> = Api::namespaced(client.clone(), namespace);
            crate::k8s::apply(&api, &name, &pvc).await?;
            plan.push(StackObject::Pvc { name: name.clone(), component: component.role });
            pvc_names.insert(component.role.as_str(), name);
        }
    }

    let ingress_allowed = config.ingress_enabled
        && config.ingress_auto_types.iter().any(|t| t == params.stack.as_str())
        && !config.ingress_excluded_types.iter().any(|t| t == params.stack.as_str());

    for component in &bp.components {
        let name = objects::component_name(params.lab_name, component.role.as_str());
        let labels = component_labels(params, component.role);
        let selector = objects::labels(
            params.user_id,
            role_str(params.role),
            params.lab_name,
            params.stack.as_str(),
            component.role.as_str(),
        );

        let emit_ingress = ingress_allowed && component.ingress_eligible;
        let node_port = component.ingress_eligible && !emit_ingress;

        let service = objects::build_service(&name, labels.clone(), selector, component.container_port, node_port);
        let svc_api: Api<Service> = Api::namespaced(client.clone(), namespace);
        crate::k8s::apply(&svc_api, &name, &service).await?;
        plan.push(StackObject::Service { name: name.clone(), component: component.role, node_port });

        let image = if component.role == ComponentRole::Main {
            params.image_override.unwrap_or(component.default_image)
        } else {
            component.default_image
        };
        let pvc_name = pvc_names.get(component.role.as_str()).map(String::as_str);
        let deployment = objects::build_deployment(
            &name,
            labels,
            component,
            image,
            params.resources,
            secret_name.as_deref(),
            pvc_name,
        );
        let dep_api: Api<Deployment> = Api::namespaced(client.clone(), namespace);
        crate::k8s::apply(&dep_api, &name, &deployment).await?;
        plan.push(StackObject::Deployment {
            name: name.clone(),
            component: component.role,
            replicas: params.resources.replicas,
        });

        if emit_ingress {
            let ingress_name = format!("{name}-ingress");
            let host = objects::ingress_host(params.lab_name, params.user_id, &config.ingress_base_domain);
            let ingress_labels = component_labels(params, component.role);
            let ingress = objects::build_ingress(
                &ingress_name,
                ingress_labels,
                &host,
                &name,
                component.container_port,
                &config.ingress_class_name,
                config.ingress_tls_secret.as_deref(),
            );
            let ing_api: Api<Ingress> = Api::namespaced(client.clone(), namespace);
            crate::k8s::apply(&ing_api, &ingress_name, &ingress).await?;
            plan.push(StackObject::Ingress { name: ingress_name, host: host.clone() });
            access_urls.push(format!("https://{host}"));
        } else if node_port {
            access_urls.push(format!("http://<node-ip>:<node-port> ({name})"));
        }
    }

    Ok(ApplyOutcome {
        objects: plan,
        credentials,
        access_urls,
    })
}

