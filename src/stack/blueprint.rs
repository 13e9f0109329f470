//! Declarative per-stack-kind object lists (§4.5, §9 "expressed as a typed
//! list of (kind, component, manifest-factory) tuples"). Adding a stack kind
//! means adding a blueprint here, never a new code path in `orchestrator`.

use crate::models::StackKind;

/// A component's role in the stack, also used as the `component=` label
/// value (§6 label schema).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentRole {
    Main,
    Db,
    Pma,
    Web,
}

impl ComponentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentRole::Main => "main",
            ComponentRole::Db => "db",
            ComponentRole::Pma => "pma",
            ComponentRole::Web => "web",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PvcBlueprint {
    pub storage_gi: i32,
}

/// One component of a stack: an optional PVC, a Service, and a Deployment.
/// `ingress_eligible` marks the single HTTP-facing component a stack may
/// expose via Ingress.
#[derive(Debug, Clone)]
pub struct ComponentBlueprint {
    pub role: ComponentRole,
    pub default_image: &'static str,
    pub container_port: i32,
    pub pvc: Option<PvcBlueprint>,
    pub ingress_eligible: bool,
    /// Whether this component may bind privileged ports (grants
    /// NET_BIND_SERVICE instead of dropping all capabilities, §4.5).
    pub needs_bind_service: bool,
}

#[derive(Debug, Clone)]
pub struct StackBlueprint {
    pub needs_secret: bool,
    pub components: Vec<ComponentBlueprint>,
}

/// Resolve the ordered blueprint for a stack kind. Component order here
/// determines both the PVC emission order and the Service/Deployment
/// emission order (§4.5's object-order table).
pub fn blueprint_for(kind: StackKind) -> StackBlueprint {
    match kind {
        StackKind::Custom | StackKind::Vscode | StackKind::Jupyter | StackKind::Netbeans => {
            StackBlueprint {
                needs_secret: false,
                components: vec![ComponentBlueprint {
                    role: ComponentRole::Main,
                    default_image: default_image_for(kind),
                    container_port: default_port_for(kind),
                    pvc: Some(PvcBlueprint { storage_gi: 2 }),
                    ingress_eligible: true,
                    needs_bind_service: false,
                }],
            }
        }
        StackKind::Mysql => StackBlueprint {
            needs_secret: true,
            components: vec![
                ComponentBlueprint {
                    role: ComponentRole::Db,
                    default_image: "mysql:8.0",
                    container_port: 3306,
                    pvc: Some(PvcBlueprint { storage_gi: 5 }),
                    ingress_eligible: false,
                    needs_bind_service: false,
                },
                ComponentBlueprint {
                    role: ComponentRole::Pma,
                    default_image: "phpmyadmin:latest",
                    container_port: 80,
                    pvc: None,
                    ingress_eligible: true,
                    needs_bind_service: true,
                },
            ],
        },
        StackKind::Lamp => StackBlueprint {
            needs_secret: true,
            components: vec![
                ComponentBlueprint {
                    role: ComponentRole::Db,
                    default_image: "mysql:8.0",
                    container_port: 3306,
                    pvc: Some(PvcBlueprint { storage_gi: 5 }),
                    ingress_eligible: false,
                    needs_bind_service: false,
                },
                ComponentBlueprint {
                    role: ComponentRole::Pma,
                    default_image: "phpmyadmin:latest",
                    container_port: 80,
                    pvc: None,
                    ingress_eligible: false,
                    needs_bind_service: true,
                },
                ComponentBlueprint {
                    role: ComponentRole::Web,
                    default_image: "php:8.3-apache",
                    container_port: 80,
                    pvc: Some(PvcBlueprint { storage_gi: 2 }),
                    ingress_eligible: true,
                    needs_bind_service: true,
                },
            ],
        },
        StackKind::Wordpress => StackBlueprint {
            needs_secret: true,
            components: vec![
                ComponentBlueprint {
                    role: ComponentRole::Db,
                    default_image: "mysql:8.0",
                    container_port: 3306,
                    pvc: Some(PvcBlueprint { storage_gi: 5 }),
                    ingress_eligible: false,
                    needs_bind_service: false,
                },
                ComponentBlueprint {
                    role: ComponentRole::Web,
                    default_image: "wordpress:latest",
                    container_port: 80,
                    pvc: None,
                    ingress_eligible: true,
                    needs_bind_service: true,
                },
            ],
        },
    }
}

fn default_image_for(kind: StackKind) -> &'static str {
    match kind {
        StackKind::Vscode => "codercom/code-server:latest",
        StackKind::Jupyter => "jupyter/base-notebook:latest",
        StackKind::Netbeans => "netbeans/netbeans:latest",
        _ => "labondemand/custom-base:latest",
    }
}

fn default_port_for(kind: StackKind) -> i32 {
    match kind {
        StackKind::Vscode => 8080,
        StackKind::Jupyter => 8888,
        StackKind::Netbeans => 8080,
        _ => 8080,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mysql_blueprint_has_two_components_in_order() {
        let bp = blueprint_for(StackKind::Mysql);
        assert!(bp.needs_secret);
        assert_eq!(bp.components.len(), 2);
        assert_eq!(bp.components[0].role, ComponentRole::Db);
        assert_eq!(bp.components[1].role, ComponentRole::Pma);
        assert!(bp.components[1].ingress_eligible);
        assert!(!bp.components[0].ingress_eligible);
    }

    #[test]
    fn lamp_blueprint_pvc_order_is_db_then_web() {
        let bp = blueprint_for(StackKind::Lamp);
        let pvc_components: Vec<_> = bp
            .components
            .iter()
            .filter(|c| c.pvc.is_some())
            .map(|c| c.role)
            .collect();
        assert_eq!(pvc_components, vec![ComponentRole::Db, ComponentRole::Web]);
    }

    #[test]
    fn custom_stack_has_single_main_component() {
        let bp = blueprint_for(StackKind::Custom);
        assert!(!bp.needs_secret);
        assert_eq!(bp.components.len(), 1);
        assert_eq!(bp.components[0].role, ComponentRole::Main);
    }
}
