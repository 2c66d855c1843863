use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use yamlcfg::{ConfigRecord, ConfigRegistry, Error, Executor};

fn temp_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct AppConfig {
    name: String,
    count: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "app".to_string(),
            count: 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct DatabaseConfig {
    url: String,
}

fn build_app_record(dir: &TempDir) -> Arc<ConfigRecord<AppConfig>> {
    ConfigRecord::builder(dir.path(), "app")
        .build()
        .expect("Failed to build record")
}

#[test]
fn get_before_registration_fails_with_not_registered() {
    let registry = ConfigRegistry::new();
    let result = registry.get::<AppConfig>();
    match result {
        Err(Error::NotRegistered(name)) => assert!(name.contains("AppConfig")),
        other => panic!("Expected NotRegistered, got {other:?}"),
    }
    assert!(!registry.is_registered::<AppConfig>());
}

#[test]
fn register_then_get_returns_the_instance() {
    let dir = temp_dir();
    let registry = ConfigRegistry::new();
    registry.register(build_app_record(&dir));

    assert!(registry.is_registered::<AppConfig>());
    let config = registry.get::<AppConfig>().expect("Failed to get config");
    assert_eq!(*config, AppConfig::default());
}

#[test]
fn on_init_before_register_resolves_at_registration() {
    let dir = temp_dir();
    let registry = ConfigRegistry::new();

    let handle = registry.on_init::<AppConfig>();
    assert!(handle.try_get().is_none());

    let record = build_app_record(&dir);
    registry.register(record.clone());

    let delivered = handle.try_get().expect("Pending init not resolved");
    assert!(
        Arc::ptr_eq(&delivered, &record.get()),
        "Must deliver the instance produced by that registration's own init"
    );
}

#[test]
fn on_init_after_register_derives_from_record_init() {
    let dir = temp_dir();
    let registry = ConfigRegistry::new();
    registry.register(build_app_record(&dir));

    let handle = registry.on_init::<AppConfig>();
    assert_eq!(*handle.wait(), AppConfig::default());
}

#[test]
fn pending_init_handle_can_be_awaited() {
    let dir = temp_dir();
    let registry = Arc::new(ConfigRegistry::new());
    let handle = registry.on_init::<AppConfig>();

    let registry_in_thread = registry.clone();
    let registrar = std::thread::spawn(move || {
        let record = ConfigRecord::<AppConfig>::builder(dir.path(), "app")
            .build()
            .expect("Failed to build record");
        registry_in_thread.register(record);
        drop(dir);
    });

    let instance = futures::executor::block_on(handle);
    assert_eq!(*instance, AppConfig::default());
    registrar.join().expect("Registrar thread panicked");
}

#[test]
fn queued_reload_listeners_drain_at_registration_in_order() {
    let dir = temp_dir();
    let registry = ConfigRegistry::new();

    let order = Arc::new(std::sync::Mutex::new(Vec::<&'static str>::new()));
    let first = order.clone();
    registry.on_reload::<AppConfig>(move |_| first.lock().unwrap().push("first"));
    let second = order.clone();
    registry.on_reload::<AppConfig>(move |_| second.lock().unwrap().push("second"));

    registry.register(build_app_record(&dir));

    fs::write(dir.path().join("app.yml"), "name: edited\ncount: 2\n")
        .expect("Failed to write config file");
    registry.reload::<AppConfig>().expect("Failed to reload");

    assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    assert_eq!(registry.get::<AppConfig>().expect("Failed to get").name, "edited");
}

#[test]
fn on_reload_after_registration_attaches_directly() {
    let dir = temp_dir();
    let registry = ConfigRegistry::new();
    registry.register(build_app_record(&dir));

    let calls = Arc::new(AtomicUsize::new(0));
    let calls_in_listener = calls.clone();
    registry.on_reload::<AppConfig>(move |_| {
        calls_in_listener.fetch_add(1, Ordering::SeqCst);
    });

    fs::write(dir.path().join("app.yml"), "name: edited\ncount: 3\n")
        .expect("Failed to write config file");
    registry.reload::<AppConfig>().expect("Failed to reload");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn reload_all_reloads_every_record() {
    let dir = temp_dir();
    let registry = ConfigRegistry::new();
    registry.register(build_app_record(&dir));
    registry.register(
        ConfigRecord::<DatabaseConfig>::builder(dir.path(), "database")
            .build()
            .expect("Failed to build record"),
    );

    fs::write(dir.path().join("app.yml"), "name: bulk\ncount: 9\n")
        .expect("Failed to write config file");
    fs::write(dir.path().join("database.yml"), "url: postgres://bulk\n")
        .expect("Failed to write config file");

    registry.reload_all().expect("Failed to reload all");
    assert_eq!(registry.get::<AppConfig>().expect("Failed to get").name, "bulk");
    assert_eq!(
        registry.get::<DatabaseConfig>().expect("Failed to get").url,
        "postgres://bulk"
    );
}

#[test]
fn reload_of_unregistered_type_fails() {
    let registry = ConfigRegistry::new();
    assert!(matches!(
        registry.reload::<AppConfig>(),
        Err(Error::NotRegistered(_))
    ));
    assert!(matches!(
        registry.save::<AppConfig>(),
        Err(Error::NotRegistered(_))
    ));
}

#[test]
fn registration_continuations_run_on_the_record_executor() {
    let dir = temp_dir();
    let jobs = Arc::new(AtomicUsize::new(0));
    let jobs_in_executor = jobs.clone();
    let executor: Arc<dyn Executor> = Arc::new(move |job: Box<dyn FnOnce() + Send>| {
        jobs_in_executor.fetch_add(1, Ordering::SeqCst);
        job();
    });

    let registry = ConfigRegistry::new();
    let handle = registry.on_init::<AppConfig>();

    let record = ConfigRecord::<AppConfig>::builder(dir.path(), "app")
        .executor(executor)
        .build()
        .expect("Failed to build record");
    registry.register(record);

    assert!(jobs.load(Ordering::SeqCst) >= 1, "Drain must go through the executor");
    assert!(handle.try_get().is_some());
}
