//! Manifest factories for the object kinds the Stack Builder emits. Each
//! factory is pure: given names/params it returns a value, never talking to
//! the cluster — appliance is the orchestrator's job via `crate::k8s`.

use std::collections::BTreeMap;

use base64::Engine;
use k8s_openapi::api::core::v1::{
    Capabilities, Container, EnvVar, EnvVarSource, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource, PodSecurityContext, PodSpec,
    PodTemplateSpec, ResourceRequirements, Secret, SecretKeySelector, SecurityContext, Service,
    ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule, IngressServiceBackend,
    IngressSpec, IngressTLS, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use rand::RngCore;
use rand::rngs::OsRng;

use crate::clamp::ResourceRequest;
use crate::stack::blueprint::ComponentBlueprint;

/// The full bit-exact label set from §6: `managed-by`, `user-id`,
/// `user-role`, `app`, `stack`, plus the per-component `component` label.
pub fn labels(
    user_id: i64,
    role: &str,
    lab_name: &str,
    stack: &str,
    component: &str,
) -> BTreeMap<String, String> {
    let mut m = BTreeMap::new();
    m.insert("managed-by".to_string(), "labondemand".to_string());
    m.insert("user-id".to_string(), user_id.to_string());
    m.insert("user-role".to_string(), role.to_string());
    m.insert("app".to_string(), lab_name.to_string());
    m.insert("stack".to_string(), stack.to_string());
    m.insert("component".to_string(), component.to_string());
    m
}

/// Object name for a component: the lab name for the sole/main component,
/// `<lab>-<component>` for multi-component stacks (§6 naming scheme).
pub fn component_name(lab_name: &str, role_str: &str) -> String {
    if role_str == "main" {
        lab_name.to_string()
    } else {
        format!("{lab_name}-{role_str}")
    }
}

/// Generate a cryptographically strong random password. Never logged —
/// callers must keep the returned value out of `tracing` fields (§4.5).
pub fn generate_password(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Build the Secret for a stack that needs one (mysql/lamp/wordpress). Only
/// called on first creation — on retry the orchestrator reuses the existing
/// Secret verbatim via `k8s::get_or_create` (§4.5, §8).
pub fn build_secret(
    name: &str,
    labels: BTreeMap<String, String>,
) -> (Secret, String, String) {
    let db_password = generate_password(24);
    let admin_password = generate_password(24);

    let mut string_data = BTreeMap::new();
    string_data.insert("mysql-root-password".to_string(), db_password.clone());
    string_data.insert("mysql-password".to_string(), db_password.clone());
    string_data.insert("admin-password".to_string(), admin_password.clone());

    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        string_data: Some(string_data),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    };

    (secret, db_password, admin_password)
}

/// Read one key out of an already-fetched Secret's `data` map as UTF-8.
/// `data` holds raw decoded bytes (`ByteString` base64-decodes on
/// deserialization), so no further decoding is needed here.
pub fn secret_data_utf8(secret: &Secret, key: &str) -> Option<String> {
    let bytes = secret.data.as_ref()?.get(key)?;
    String::from_utf8(bytes.0.clone()).ok()
}

pub fn build_pvc(
    name: &str,
    labels: BTreeMap<String, String>,
    storage_gi: i32,
) -> PersistentVolumeClaim {
    let mut requests = BTreeMap::new();
    requests.insert("storage".to_string(), Quantity(format!("{storage_gi}Gi")));

    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            resources: Some(ResourceRequirements {
                requests: Some(requests),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// `node_port_if_no_ingress` downgrades the user-facing Service to
/// `ClusterIP` when Ingress is emitted for this component (§4.5).
pub fn build_service(
    name: &str,
    labels: BTreeMap<String, String>,
    selector: BTreeMap<String, String>,
    port: i32,
    expose_node_port: bool,
) -> Service {
    let service_type = if expose_node_port { "NodePort" } else { "ClusterIP" };

    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some(service_type.to_string()),
            selector: Some(selector),
            ports: Some(vec![ServicePort {
                port,
                target_port: Some(IntOrString::Int(port)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Security context applied to every container (§4.5): non-root, no
/// privilege escalation, capabilities dropped except NET_BIND_SERVICE for
/// components that must bind a privileged port, seccomp=RuntimeDefault.
fn security_context(needs_bind_service: bool) -> SecurityContext {
    let add = if needs_bind_service {
        Some(vec!["NET_BIND_SERVICE".to_string()])
    } else {
        None
    };

    SecurityContext {
        run_as_non_root: Some(true),
        allow_privilege_escalation: Some(false),
        capabilities: Some(Capabilities {
            drop: Some(vec!["ALL".to_string()]),
            add,
        }),
        seccomp_profile: Some(k8s_openapi::api::core::v1::SeccompProfile {
            type_: "RuntimeDefault".to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[allow(clippy::too_many_arguments)]
pub fn build_deployment(
    name: &str,
    labels: BTreeMap<String, String>,
    component: &ComponentBlueprint,
    image: &str,
    resources: ResourceRequest,
    secret_name: Option<&str>,
    pvc_name: Option<&str>,
) -> Deployment {
    let mut requests = BTreeMap::new();
    requests.insert(
        "cpu".to_string(),
        Quantity(format!("{}m", resources.cpu_request_millis)),
    );
    requests.insert(
        "memory".to_string(),
        Quantity(format!("{}Mi", resources.mem_request_mi)),
    );
    let mut limits = BTreeMap::new();
    limits.insert(
        "cpu".to_string(),
        Quantity(format!("{}m", resources.cpu_limit_millis)),
    );
    limits.insert(
        "memory".to_string(),
        Quantity(format!("{}Mi", resources.mem_limit_mi)),
    );

    let mut env = Vec::new();
    if let Some(secret) = secret_name {
        env.push(EnvVar {
            name: "MYSQL_ROOT_PASSWORD".to_string(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: secret.to_string(),
                    key: "mysql-root-password".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    let (volumes, volume_mounts) = if let Some(pvc) = pvc_name {
        (
            Some(vec![Volume {
                name: "data".to_string(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: pvc.to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            Some(vec![VolumeMount {
                name: "data".to_string(),
                mount_path: "/data".to_string(),
                ..Default::default()
            }]),
        )
    } else {
        (None, None)
    };

    let container = Container {
        name: component.role.as_str().to_string(),
        image: Some(image.to_string()),
        ports: Some(vec![k8s_openapi::api::core::v1::ContainerPort {
            container_port: component.container_port,
            ..Default::default()
        }]),
        env: if env.is_empty() { None } else { Some(env) },
        resources: Some(ResourceRequirements {
            requests: Some(requests),
            limits: Some(limits),
            ..Default::default()
        }),
        volume_mounts,
        security_context: Some(security_context(component.needs_bind_service)),
        ..Default::default()
    };

    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(resources.replicas),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes,
                    security_context: Some(PodSecurityContext {
                        run_as_non_root: Some(true),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Ingress host: `{lab-name}-u{user-id}.{base-domain}` (§6 naming scheme).
pub fn ingress_host(lab_name: &str, user_id: i64, base_domain: &str) -> String {
    format!("{lab_name}-u{user_id}.{base_domain}")
}

pub fn build_ingress(
    name: &str,
    labels: BTreeMap<String, String>,
    host: &str,
    service_name: &str,
    service_port: i32,
    class_name: &str,
    tls_secret: Option<&str>,
) -> Ingress {
    let rule = IngressRule {
        host: Some(host.to_string()),
        http: Some(HTTPIngressRuleValue {
            paths: vec![HTTPIngressPath {
                path: Some("/".to_string()),
                path_type: "Prefix".to_string(),
                backend: IngressBackend {
                    service: Some(IngressServiceBackend {
                        name: service_name.to_string(),
                        port: Some(ServiceBackendPort {
                            number: Some(service_port),
                            ..Default::default()
                        }),
                    }),
                    ..Default::default()
                },
            }],
        }),
    };

    let tls = tls_secret.map(|secret| {
        vec![IngressTLS {
            hosts: Some(vec![host.to_string()]),
            secret_name: Some(secret.to_string()),
        }]
    });

    Ingress {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            ingress_class_name: Some(class_name.to_string()),
            rules: Some(vec![rule]),
            tls,
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_bit_exact() {
        let l = labels(7, "student", "lab1", "jupyter", "main");
        assert_eq!(l.get("managed-by").map(String::as_str), Some("labondemand"));
        assert_eq!(l.get("user-id").map(String::as_str), Some("7"));
        assert_eq!(l.get("user-role").map(String::as_str), Some("student"));
        assert_eq!(l.get("app").map(String::as_str), Some("lab1"));
        assert_eq!(l.get("stack").map(String::as_str), Some("jupyter"));
        assert_eq!(l.get("component").map(String::as_str), Some("main"));
    }

    #[test]
    fn component_name_uses_suffix_for_non_main() {
        assert_eq!(component_name("lab1", "main"), "lab1");
        assert_eq!(component_name("lab1", "db"), "lab1-db");
        assert_eq!(component_name("lab1", "pma"), "lab1-pma");
    }

    #[test]
    fn ingress_host_matches_naming_scheme() {
        assert_eq!(
            ingress_host("lab1", 7, "labs.example.org"),
            "lab1-u7.labs.example.org"
        );
    }

    #[test]
    fn generated_passwords_are_nonempty_and_differ() {
        let a = generate_password(24);
        let b = generate_password(24);
        assert!(!a.is_empty());
        assert_ne!(a, b);
    }

    #[test]
    fn secret_data_utf8_reads_back_what_the_server_would_return() {
        let mut labels = BTreeMap::new();
        labels.insert("app".to_string(), "lab1".to_string());
        let (mut secret, db_password, _) = build_secret("lab1-secret", labels);
        // string_data is write-only; the server echoes values back via `data`
        // with the bytes already decoded, which is what a real GET returns.
        let mut data = BTreeMap::new();
        data.insert(
            "mysql-root-password".to_string(),
            k8s_openapi::ByteString(db_password.clone().into_bytes()),
        );
        secret.data = Some(data);
        secret.string_data = None;

        assert_eq!(secret_data_utf8(&secret, "mysql-root-password"), Some(db_password));
        assert_eq!(secret_data_utf8(&secret, "missing-key"), None);
    }

    #[test]
    fn security_context_drops_all_and_grants_bind_service_only_when_needed() {
        let web = security_context(true);
        let caps = web.capabilities.unwrap();
        assert_eq!(caps.drop, Some(vec!["ALL".to_string()]));
        assert_eq!(caps.add, Some(vec!["NET_BIND_SERVICE".to_string()]));

        let plain = security_context(false);
        assert!(plain.capabilities.unwrap().add.is_none());
    }
}
