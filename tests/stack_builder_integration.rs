use labondemand::models::StackKind;
use labondemand::stack::blueprint::{self, ComponentRole};
use labondemand::stack::objects;

/// The blueprint and the manifest factories must agree on naming and
/// labeling for every component of a multi-component stack (§4.5, §6).
#[test]
fn lamp_stack_produces_three_uniquely_named_components_with_consistent_labels() {
    let bp = blueprint::blueprint_for(StackKind::Lamp);
    assert!(bp.needs_secret);

    let names: Vec<String> = bp
        .components
        .iter()
        .map(|c| objects::component_name("webapp", c.role.as_str()))
        .collect();
    assert_eq!(names, vec!["webapp-db", "webapp-pma", "webapp-web"]);
    assert_eq!(names.iter().collect::<std::collections::HashSet<_>>().len(), 3);

    for component in &bp.components {
        let labels = objects::labels(3, "student", "webapp", "lamp", component.role.as_str());
        assert_eq!(labels.get("app").map(String::as_str), Some("webapp"));
        assert_eq!(labels.get("stack").map(String::as_str), Some("lamp"));
        assert_eq!(labels.get("component").map(String::as_str), Some(component.role.as_str()));
    }

    // Only the web component is the stack's single Ingress-eligible component.
    let ingress_eligible: Vec<_> = bp
        .components
        .iter()
        .filter(|c| c.ingress_eligible)
        .map(|c| c.role)
        .collect();
    assert_eq!(ingress_eligible, vec![ComponentRole::Web]);
}

/// A single-container stack (e.g. Jupyter) names its one component after the
/// lab itself, with no suffix.
#[test]
fn single_component_stack_uses_bare_lab_name() {
    let bp = blueprint::blueprint_for(StackKind::Jupyter);
    assert_eq!(bp.components.len(), 1);
    assert!(!bp.needs_secret);
    let name = objects::component_name("my-notebook", bp.components[0].role.as_str());
    assert_eq!(name, "my-notebook");
}

/// Building a Secret never reuses the returned credentials string for
/// anything other than the one-time handoff to the caller.
#[test]
fn secret_manifest_never_echoes_the_generated_passwords_in_labels() {
    let labels = objects::labels(1, "teacher", "db-lab", "mysql", "db");
    let (secret, db_password, admin_password) = objects::build_secret("db-lab-secret", labels.clone());
    assert_ne!(db_password, admin_password);
    for value in labels.values() {
        assert_ne!(value, &db_password);
        assert_ne!(value, &admin_password);
    }
    assert_eq!(secret.metadata.labels, Some(labels));
}
