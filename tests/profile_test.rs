//! Tests for worker profiles and the profile registry.

use queue_relay::config::{ProfileRegistry, TemplateParameter, WorkerProfile};
use queue_relay::error::Error;
use std::path::Path;

const NPS: &str = r#"
[worker]
name = "workerNps"
queue = "nps"
contact_field = "telefone"
template = "nps_clientes_deck"
language = "pt_BR"
log_method = "salvarLogNps"
parameters = [
    { field = "identificador_conta" },
    { field = "cod" },
    { text = "Deck" },
]
"#;

fn profile_named(name: &str) -> String {
    format!(
        r#"
[worker]
name = "{name}"
queue = "delivery"
contact_field = "telefone"
template = "pedido_entregue"
language = "pt_BR"
"#
    )
}

#[test]
fn parses_fields_and_literals_in_order() {
    let profile = WorkerProfile::from_toml(NPS).unwrap();
    assert_eq!(profile.name, "workerNps");
    assert_eq!(profile.queue, "nps");
    assert_eq!(profile.log_method.as_deref(), Some("salvarLogNps"));
    assert_eq!(
        profile.parameters,
        vec![
            TemplateParameter::Field {
                field: "identificador_conta".into()
            },
            TemplateParameter::Field { field: "cod".into() },
            TemplateParameter::Literal { text: "Deck".into() },
        ]
    );
}

#[test]
fn optional_fields_default() {
    let profile = WorkerProfile::from_toml(&profile_named("plain")).unwrap();
    assert!(profile.parameters.is_empty());
    assert_eq!(profile.log_method, None);
}

#[test]
fn empty_required_field_is_rejected() {
    let content = profile_named("x").replace("template = \"pedido_entregue\"", "template = \"\"");
    match WorkerProfile::from_toml(&content) {
        Err(Error::Config(msg)) => assert!(msg.contains("template")),
        other => panic!("expected config error, got {other:?}"),
    }
}

#[test]
fn missing_worker_table_is_rejected() {
    assert!(WorkerProfile::from_toml("name = \"loose\"").is_err());
}

#[test]
fn loads_every_toml_file_in_a_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.toml"), profile_named("workerA")).unwrap();
    std::fs::write(dir.path().join("b.toml"), profile_named("workerB")).unwrap();
    std::fs::write(dir.path().join("notes.txt"), "not a profile").unwrap();

    let registry = ProfileRegistry::load_from_dir(dir.path()).unwrap();
    assert_eq!(registry.len(), 2);
    let names: Vec<&str> = registry.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["workerA", "workerB"]);
    assert!(registry.get("workerB").is_some());
}

#[test]
fn duplicate_names_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.toml"), profile_named("same")).unwrap();
    std::fs::write(dir.path().join("b.toml"), profile_named("same")).unwrap();

    match ProfileRegistry::load_from_dir(dir.path()) {
        Err(Error::Config(msg)) => assert!(msg.contains("duplicate worker profile: same")),
        other => panic!("expected duplicate error, got {other:?}"),
    }
}

#[test]
fn empty_directory_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    match ProfileRegistry::load_from_dir(dir.path()) {
        Err(Error::Config(msg)) => assert!(msg.contains("no worker profiles found")),
        other => panic!("expected config error, got {other:?}"),
    }
}

#[test]
fn missing_directory_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope");
    assert!(matches!(
        ProfileRegistry::load_from_dir(&missing),
        Err(Error::Config(_))
    ));
}

#[test]
fn shipped_profiles_load() {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("profiles");
    let registry = ProfileRegistry::load_from_dir(&dir).unwrap();
    assert_eq!(registry.len(), 2);

    let delivery = registry.get("workerWhatsapp").unwrap();
    assert_eq!(delivery.queue, "delivery");
    assert_eq!(delivery.log_method, None);

    let nps = registry.get("workerNps").unwrap();
    assert_eq!(nps.template, "nps_clientes_deck");
    assert_eq!(nps.parameters.len(), 4);
}
