mod common;

use common::{fetcher, test_config, write_loader_config, FakeRegistry};
use std::fs;
use std::sync::Barrier;
use std::time::Duration;
use summarizer::config::RegistryConfig;
use summarizer::model::{
    ArtifactCache, AzureMlRegistry, ConfigResolver, ModelDefaults, ModelFetcher, ServicePrincipal,
};
use summarizer::Error;

#[test]
fn test_cache_hit_never_contacts_registry() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config("led-base", "2");
    let artifact = dir.path().join("led-base/2/led-base");
    fs::create_dir_all(&artifact).unwrap();
    fs::write(artifact.join("config.json"), "{}").unwrap();

    let registry = FakeRegistry::default();
    let fetcher = fetcher(dir.path(), &registry);

    let (model, tokenizer) = fetcher.fetch(Some(&config)).unwrap();

    assert_eq!(model, artifact);
    assert_eq!(tokenizer, "tokenizer");
    assert_eq!(registry.connects(), 0);
    assert!(registry.downloads().is_empty());
}

#[test]
fn test_cache_miss_downloads_once_then_loads() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config("led-base", "2");
    let registry = FakeRegistry::default();
    let fetcher = fetcher(dir.path(), &registry);

    let (model, _) = fetcher.fetch(Some(&config)).unwrap();

    let downloads = registry.downloads();
    assert_eq!(downloads.len(), 1);
    assert_eq!(downloads[0].model_name, "led-base");
    assert_eq!(downloads[0].version.as_deref(), Some("2"));

    let artifact = dir.path().join("led-base/2/led-base");
    assert_eq!(model, artifact);
    assert!(artifact.join("config.json").exists());
    assert!(!downloads[0].target_dir.exists());

    let workspaces = registry.log.workspaces.lock().unwrap().clone();
    assert_eq!(workspaces[0].subscription, "sub-1");
    assert_eq!(workspaces[0].resource_group, "dev");
    assert_eq!(workspaces[0].name, "ecb-dev");
}

#[test]
fn test_second_fetch_is_served_from_cache() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config("led-base", "2");
    let registry = FakeRegistry::default();
    let fetcher = fetcher(dir.path(), &registry);

    fetcher.fetch(Some(&config)).unwrap();
    fetcher.fetch(Some(&config)).unwrap();

    assert_eq!(registry.connects(), 1);
    assert_eq!(registry.downloads().len(), 1);
}

#[test]
fn test_latest_version_is_unpinned() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config("led-base", "None");
    let registry = FakeRegistry::default();
    let fetcher = fetcher(dir.path(), &registry);

    let (model, _) = fetcher.fetch(Some(&config)).unwrap();

    assert_eq!(registry.downloads()[0].version, None);
    assert_eq!(model, dir.path().join("led-base/None/led-base"));
}

#[test]
fn test_fetch_without_config_uses_cached_loader_config() {
    let dir = tempfile::tempdir().unwrap();
    write_loader_config(dir.path(), &test_config("bart-large", "5"));
    let registry = FakeRegistry::default();
    let fetcher = fetcher(dir.path(), &registry);

    let (model, _) = fetcher.fetch(None).unwrap();

    assert_eq!(model, dir.path().join("bart-large/5/bart-large"));
    assert_eq!(registry.downloads()[0].model_name, "bart-large");
}

#[test]
fn test_failed_download_propagates_and_is_not_cached() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config("led-base", "1");
    let failing = FakeRegistry::failing();

    let err = fetcher(dir.path(), &failing).fetch(Some(&config)).unwrap_err();
    assert!(matches!(err, Error::DownloadFailed(_)));

    let artifact = dir.path().join("led-base/1/led-base");
    assert!(!artifact.exists());

    // The half-written staging directory is cleared by the next attempt.
    let registry = FakeRegistry::default();
    let (model, _) = fetcher(dir.path(), &registry).fetch(Some(&config)).unwrap();
    assert_eq!(model, artifact);
    assert_eq!(registry.downloads().len(), 1);
    assert!(!registry.downloads()[0].target_dir.exists());
}

#[test]
fn test_list_model_names() {
    let dir = tempfile::tempdir().unwrap();
    write_loader_config(dir.path(), &test_config("led-base", "None"));
    let registry = FakeRegistry::with_models(&[("led-base", "1"), ("led-base", "2"), ("t5-small", "1")]);

    let names = fetcher(dir.path(), &registry).list_model_names().unwrap();

    assert_eq!(names, vec!["led-base::1", "led-base::2", "t5-small::1"]);
    assert!(registry.downloads().is_empty());
}

#[test]
fn test_missing_credentials_surface_at_first_remote_call() {
    let dir = tempfile::tempdir().unwrap();
    let registry = AzureMlRegistry::new(RegistryConfig::default());
    let fetcher = ModelFetcher::new(
        std::sync::Arc::new(registry),
        common::FakeLoader::default(),
        ArtifactCache::new(dir.path()),
        ConfigResolver::new(dir.path(), ModelDefaults::default()),
    )
    .with_credentials(ServicePrincipal::default());

    let err = fetcher.fetch(Some(&test_config("led-base", "1"))).unwrap_err();

    assert!(matches!(err, Error::AuthenticationFailed(_)));
    assert!(err.to_string().contains("TENANT_ID"));
}

#[test]
fn test_concurrent_fetches_share_one_download() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config("led-base", "4");
    let registry = FakeRegistry::slow(Duration::from_millis(200));
    let fetcher = fetcher(dir.path(), &registry);
    let start = Barrier::new(2);

    let (first, second) = std::thread::scope(|scope| {
        let run = || {
            start.wait();
            fetcher.fetch(Some(&config)).map(|(model, _)| model)
        };
        let a = scope.spawn(run);
        let b = scope.spawn(run);
        (a.join().unwrap(), b.join().unwrap())
    });

    let artifact = dir.path().join("led-base/4/led-base");
    assert_eq!(first.unwrap(), artifact);
    assert_eq!(second.unwrap(), artifact);
    assert_eq!(registry.downloads().len(), 1);
    assert_eq!(registry.connects(), 1);
}

#[test]
fn test_names_leaving_the_cache_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let cache_dir = dir.path().join("cache");
    let registry = FakeRegistry::default();
    let fetcher = fetcher(&cache_dir, &registry);

    for (name, version) in [("../escaped", "1"), ("..", ".."), ("led-base", "../1")] {
        let err = fetcher.fetch(Some(&test_config(name, version))).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)), "{}::{} accepted", name, version);
    }

    assert_eq!(registry.connects(), 0);
    assert!(!dir.path().join("escaped").exists());
}
