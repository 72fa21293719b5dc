//! Integration tests for Radar

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn radar() -> Command {
        cargo_bin_cmd!("radar")
    }

    /// Config file pointing the store and nothing else into `dir`
    fn write_config(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("config.toml");
        let db = dir.join("radar.db");
        std::fs::write(
            &path,
            format!(
                "[general]\naudit_log = false\n\n[store]\ndatabase = {:?}\n",
                db.display().to_string()
            ),
        )
        .unwrap();
        path
    }

    #[test]
    fn help_displays() {
        radar()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Resource check scheduling"));
    }

    #[test]
    fn version_displays() {
        radar()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("radar"));
    }

    #[test]
    fn config_path_honours_flag() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        radar()
            .args(["--config", path.to_str().unwrap(), "config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("custom.toml"));
    }

    #[test]
    fn config_show_defaults() {
        let dir = TempDir::new().unwrap();
        radar()
            .env("RADAR_CONFIG", dir.path().join("missing.toml"))
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[scanner]"))
            .stdout(predicate::str::contains("lock_retry_max_attempts = 300"));
    }

    #[test]
    fn config_init_then_refuse_without_force() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let path_arg = path.to_str().unwrap();

        radar()
            .args(["--config", path_arg, "config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration initialized"));
        assert!(path.exists());

        radar()
            .args(["--config", path_arg, "config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--force"));
    }

    #[test]
    fn invalid_config_fails_with_hint() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[scanner]\nlock_ttl_secs = \"soon\"\n").unwrap();

        radar()
            .args(["--config", path.to_str().unwrap(), "status"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"))
            .stderr(predicate::str::contains("Hint:"));
    }

    #[test]
    fn inverted_session_expiries_fail_before_opening_store() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            concat!(
                "[store]\ndatabase = \"radar.db\"\n\n",
                "[check_sessions]\nmin_expiry_secs = 600\nmax_expiry_secs = 60\n",
            ),
        )
        .unwrap();

        radar()
            .args(["--config", path.to_str().unwrap(), "status"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("min_expiry_secs"));
        assert!(!dir.path().join("radar.db").exists());
    }

    #[test]
    fn relative_database_lands_beside_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[general]\naudit_log = false\n\n[store]\ndatabase = \"state/radar.db\"\n",
        )
        .unwrap();

        radar()
            .args(["--config", path.to_str().unwrap(), "status"])
            .assert()
            .success();
        assert!(dir.path().join("state").join("radar.db").exists());
    }

    #[test]
    fn status_on_fresh_store() {
        let dir = TempDir::new().unwrap();
        let config = write_config(dir.path());

        radar()
            .args(["--config", config.to_str().unwrap(), "status"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Resource configs"))
            .stdout(predicate::str::contains("radar.db"));
        assert!(dir.path().join("radar.db").exists());
    }

    #[test]
    fn gc_once_on_empty_store() {
        let dir = TempDir::new().unwrap();
        let config = write_config(dir.path());

        radar()
            .args(["--config", config.to_str().unwrap(), "gc"])
            .assert()
            .success()
            .stdout(predicate::str::contains("resource-config-uses"))
            .stdout(predicate::str::contains("0 row(s) collected"));
    }
}

mod scenarios {
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use radar::cache::ResourceConfigFactory;
    use radar::checker::{CheckError, CheckRequest, Checker};
    use radar::config::schema::StoreConfig;
    use radar::config::Config;
    use radar::gc::{Collector, ConfigCollector, ConfigUseCollector};
    use radar::audit::AuditLog;
    use radar::lock::LockFactory;
    use radar::pipeline::DbPipeline;
    use radar::resource::{
        resolve, ResourceConfig, ResourceTypeDef, ResourceTypes, ResourceUser, Source, Version,
    };
    use radar::scanner::{ScanOutcome, Scanner, SkipReason};
    use radar::store::{CheckableDef, CheckableKind, MemoryStore, SqliteStore, Store};
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Checker replying with fixed versions per type name
    #[derive(Default)]
    struct ScriptedChecker {
        replies: Mutex<HashMap<String, Vec<Version>>>,
        checked: Mutex<Vec<String>>,
    }

    impl ScriptedChecker {
        fn reply(&self, type_name: &str, versions: Vec<Version>) {
            self.replies.lock().insert(type_name.to_string(), versions);
        }

        fn checked(&self) -> Vec<String> {
            self.checked.lock().clone()
        }
    }

    #[async_trait]
    impl Checker for ScriptedChecker {
        async fn check(&self, request: &CheckRequest) -> Result<Vec<Version>, CheckError> {
            self.checked.lock().push(request.type_name.clone());
            Ok(self
                .replies
                .lock()
                .get(&request.type_name)
                .cloned()
                .unwrap_or_default())
        }
    }

    struct Backend {
        name: &'static str,
        store: Arc<dyn Store>,
        _dir: Option<TempDir>,
    }

    async fn backends() -> Vec<Backend> {
        let dir = TempDir::new().unwrap();
        let sqlite = SqliteStore::connect(&dir.path().join("radar.db"), &StoreConfig::default())
            .await
            .unwrap();
        vec![
            Backend {
                name: "memory",
                store: Arc::new(MemoryStore::new()),
                _dir: None,
            },
            Backend {
                name: "sqlite",
                store: Arc::new(sqlite),
                _dir: Some(dir),
            },
        ]
    }

    fn v(r: &str) -> Version {
        Version::from_pairs([("ref", r)])
    }

    fn configs(store: &Arc<dyn Store>) -> ResourceConfigFactory {
        ResourceConfigFactory::new(
            store.clone(),
            LockFactory::new(store.clone(), Duration::from_secs(60)),
        )
    }

    async fn scanner(store: &Arc<dyn Store>, pipeline_id: i64) -> (Scanner, Arc<ScriptedChecker>) {
        let checker = Arc::new(ScriptedChecker::default());
        let pipeline = Arc::new(DbPipeline::load(store.clone(), pipeline_id).await.unwrap());
        let mut config = Config::default();
        config.scanner.lock_retry_backoff_ms = 5;
        (
            Scanner::new(store.clone(), pipeline, checker.clone(), &config),
            checker,
        )
    }

    async fn add(
        store: &Arc<dyn Store>,
        pipeline: i64,
        kind: CheckableKind,
        name: &str,
        type_name: &str,
    ) -> i64 {
        store
            .save_checkable(
                kind,
                pipeline,
                &CheckableDef::new(name, type_name, Source::new().with("name", name)),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn identity_is_deterministic() {
        for backend in backends().await {
            let types = ResourceTypes::new(vec![
                ResourceTypeDef::new("slack", "registry-image", Source::new().with("repo", "slack"))
                    .with_version(v("1")),
            ]);
            let source = Source::new().with("url", "https://hooks.example");

            let first = resolve("slack", &source, &types).unwrap();
            let second = resolve("slack", &source, &types).unwrap();
            assert_eq!(first.source_hash(), second.source_hash(), "{}", backend.name);

            let factory = configs(&backend.store);
            let a = factory.find_or_create(&first).await.unwrap();
            let b = factory.find_or_create(&second).await.unwrap();
            assert_eq!(a.id, b.id, "{}", backend.name);
        }
    }

    #[tokio::test]
    async fn checking_lock_is_exclusive() {
        for backend in backends().await {
            let build = backend.store.create_build(false).await.unwrap();
            let config = ResourceConfig::base("git", Source::new().with("uri", "x"));
            let one = configs(&backend.store);
            let two = configs(&backend.store);

            let (a, b) = tokio::join!(
                one.acquire_resource_checking_lock(ResourceUser::Build(build), &config),
                two.acquire_resource_checking_lock(ResourceUser::Build(build), &config),
            );
            let (used_a, lock_a) = a.unwrap();
            let (used_b, lock_b) = b.unwrap();

            assert_eq!(used_a.id, used_b.id, "{}", backend.name);
            assert_eq!(
                usize::from(lock_a.is_some()) + usize::from(lock_b.is_some()),
                1,
                "{}",
                backend.name
            );

            for lock in [lock_a, lock_b].into_iter().flatten() {
                lock.release().await.unwrap();
            }
            let (_, again) = one
                .acquire_resource_checking_lock(ResourceUser::Build(build), &config)
                .await
                .unwrap();
            assert!(again.is_some(), "{}", backend.name);
            again.unwrap().release().await.unwrap();
        }
    }

    #[tokio::test]
    async fn used_config_survives_until_last_use_goes() {
        for backend in backends().await {
            let store = &backend.store;
            let build = store.create_build(false).await.unwrap();
            let used = configs(store)
                .use_resource_config(
                    ResourceUser::Build(build),
                    &ResourceConfig::base("git", Source::new().with("uri", "y")),
                )
                .await
                .unwrap();

            let config_gc = ConfigCollector::new(store.clone(), AuditLog::disabled());
            let use_gc = ConfigUseCollector::new(store.clone(), AuditLog::disabled());

            use_gc.run().await.unwrap();
            assert_eq!(config_gc.run().await.unwrap(), 0, "{}", backend.name);
            assert!(store.resource_config(used.id).await.unwrap().is_some());

            store.finish_build(build).await.unwrap();
            assert_eq!(use_gc.run().await.unwrap(), 1, "{}", backend.name);
            assert_eq!(config_gc.run().await.unwrap(), 1, "{}", backend.name);
            assert!(store.resource_config(used.id).await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn version_advances_to_newest() {
        for backend in backends().await {
            let store = &backend.store;
            let pipeline = store.create_pipeline(1, "main").await.unwrap();
            let id = add(store, pipeline, CheckableKind::Resource, "repo", "git").await;
            store
                .save_checkable_version(CheckableKind::Resource, id, &v("0"))
                .await
                .unwrap();
            let (scanner, checker) = scanner(store, pipeline).await;
            let current = move || async move {
                store
                    .checkable(CheckableKind::Resource, pipeline, "repo")
                    .await
                    .unwrap()
                    .unwrap()
                    .version
            };

            checker.reply("git", vec![v("1"), v("2"), v("3")]);
            scanner.scan(CheckableKind::Resource, "repo").await.unwrap();
            assert_eq!(current().await, Some(v("3")), "{}", backend.name);

            checker.reply("git", vec![v("3")]);
            let outcome = scanner.scan(CheckableKind::Resource, "repo").await.unwrap();
            assert_eq!(outcome, ScanOutcome::NoNewVersions, "{}", backend.name);

            checker.reply("git", vec![]);
            scanner.scan(CheckableKind::Resource, "repo").await.unwrap();
            assert_eq!(current().await, Some(v("3")), "{}", backend.name);
        }
    }

    #[tokio::test]
    async fn paused_pipeline_is_not_checked() {
        for backend in backends().await {
            let store = &backend.store;
            let pipeline = store.create_pipeline(1, "main").await.unwrap();
            add(store, pipeline, CheckableKind::Resource, "repo", "git").await;
            store.set_pipeline_paused(pipeline, true).await.unwrap();
            let (scanner, checker) = scanner(store, pipeline).await;

            let outcome = scanner.run(CheckableKind::Resource, "repo").await.unwrap();

            assert_eq!(outcome, ScanOutcome::Skipped(SkipReason::PipelinePaused));
            assert!(checker.checked().is_empty(), "{}", backend.name);
        }
    }

    #[tokio::test]
    async fn unpinned_dependency_checked_first() {
        for backend in backends().await {
            let store = &backend.store;
            let pipeline = store.create_pipeline(1, "main").await.unwrap();
            add(store, pipeline, CheckableKind::ResourceType, "a", "b").await;
            add(store, pipeline, CheckableKind::ResourceType, "b", "c").await;
            let (scanner, checker) = scanner(store, pipeline).await;
            checker.reply("c", vec![v("b1")]);
            checker.reply("b", vec![v("a1")]);

            scanner.run(CheckableKind::ResourceType, "a").await.unwrap();

            assert_eq!(checker.checked(), vec!["c", "b"], "{}", backend.name);
            let b = store
                .checkable(CheckableKind::ResourceType, pipeline, "b")
                .await
                .unwrap()
                .unwrap();
            assert_eq!(b.version, Some(v("b1")), "{}", backend.name);
        }
    }

    #[tokio::test]
    async fn collection_racing_uses_leaves_no_orphans() {
        for backend in backends().await {
            let store = backend.store.clone();
            let build = store.create_build(false).await.unwrap();
            let collector = ConfigCollector::new(store.clone(), AuditLog::disabled());

            let gc = async {
                for _ in 0..20 {
                    collector.run().await.unwrap();
                    tokio::task::yield_now().await;
                }
            };
            let users = async {
                let factory = configs(&store);
                let mut used = Vec::new();
                for i in 0..20 {
                    let config = ResourceConfig::base("git", Source::new().with("uri", i));
                    used.push(
                        factory
                            .use_resource_config(ResourceUser::Build(build), &config)
                            .await
                            .unwrap(),
                    );
                    tokio::task::yield_now().await;
                }
                used
            };
            let ((), used) = tokio::join!(gc, users);

            collector.run().await.unwrap();
            for config in used {
                assert!(
                    store.resource_config(config.id).await.unwrap().is_some(),
                    "{}: used config {} was collected",
                    backend.name,
                    config.id
                );
                assert_eq!(
                    store.config_uses(config.id).await.unwrap(),
                    vec![ResourceUser::Build(build)]
                );
            }
        }
    }
}
