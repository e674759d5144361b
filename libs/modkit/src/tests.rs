#[cfg(test)]
mod supervisor_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use modkit_bootstrap::SupervisorConfig;
    use parking_lot::Mutex;

    use crate::contracts::Module;
    use crate::error::{Phase, SupervisorError};
    use crate::registry::{ModuleDescriptor, ModuleName, Priority};
    use crate::runtime::{InstanceState, ModuleSupervisor};

    type Log = Arc<Mutex<Vec<String>>>;

    #[derive(Clone, Copy, Default)]
    struct Behaviour {
        fail_init: bool,
        fail_start: bool,
        fail_stop: bool,
    }

    struct Probe {
        name: ModuleName,
        log: Log,
        behaviour: Behaviour,
    }

    impl Probe {
        fn note(&self, what: &str) {
            self.log.lock().push(format!("{what}:{}", self.name));
        }
    }

    #[async_trait::async_trait]
    impl Module for Probe {
        async fn initialize(&self) -> anyhow::Result<()> {
            self.note("init");
            if self.behaviour.fail_init {
                anyhow::bail!("{} refused to initialize", self.name);
            }
            Ok(())
        }
        async fn start(&self) -> anyhow::Result<()> {
            self.note("start");
            if self.behaviour.fail_start {
                anyhow::bail!("{} refused to start", self.name);
            }
            Ok(())
        }
        async fn stop(&self) -> anyhow::Result<()> {
            self.note("stop");
            if self.behaviour.fail_stop {
                anyhow::bail!("{} refused to stop", self.name);
            }
            Ok(())
        }
        async fn unload(&self) -> anyhow::Result<()> {
            self.note("unload");
            Ok(())
        }
    }

    fn probe_with(name: ModuleName, log: &Log, behaviour: Behaviour) -> ModuleDescriptor {
        let log = Arc::clone(log);
        ModuleDescriptor::new(name, move || {
            log.lock().push(format!("construct:{name}"));
            Ok(Arc::new(Probe {
                name,
                log: Arc::clone(&log),
                behaviour,
            }) as Arc<dyn Module>)
        })
    }

    fn probe(name: ModuleName, log: &Log) -> ModuleDescriptor {
        probe_with(name, log, Behaviour::default())
    }

    fn supervisor(descriptors: Vec<ModuleDescriptor>) -> ModuleSupervisor {
        ModuleSupervisor::from_descriptors(descriptors, SupervisorConfig::default())
    }

    fn count(log: &Log, entry: &str) -> usize {
        log.lock().iter().filter(|e| *e == entry).count()
    }

    fn events(log: &Log, prefix: &str) -> Vec<String> {
        log.lock()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .cloned()
            .collect()
    }

    #[tokio::test]
    async fn dependencies_initialize_first() {
        let log = Log::default();
        let sup = supervisor(vec![
            probe("shop", &log).with_deps(&["economy"]),
            probe("economy", &log).with_deps(&["logger"]),
            probe("logger", &log),
        ]);
        sup.load_all_modules().await;

        assert_eq!(
            events(&log, "init:"),
            vec!["init:logger", "init:economy", "init:shop"]
        );
    }

    #[tokio::test]
    async fn two_module_cycle_is_reported_with_its_path() {
        let log = Log::default();
        let sup = supervisor(vec![
            probe("a", &log).with_deps(&["b"]),
            probe("b", &log).with_deps(&["a"]),
            probe("c", &log),
        ]);
        let report = sup.load_all_modules().await;

        assert!(!sup.is_loaded("a"));
        assert!(!sup.is_loaded("b"));
        assert!(sup.is_loaded("c"));
        assert_eq!(report.failed.len(), 2);
        assert_eq!(count(&log, "construct:a"), 0);

        let err = sup.load_module("a").await.unwrap_err();
        match err.root() {
            SupervisorError::CycleDetected { path } => assert_eq!(path, &vec!["a", "b", "a"]),
            other => panic!("expected a cycle, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn self_dependency_is_a_cycle() {
        let log = Log::default();
        let sup = supervisor(vec![probe("loop", &log).with_deps(&["loop"])]);
        sup.load_all_modules().await;

        let err = sup.load_module("loop").await.unwrap_err();
        assert!(matches!(
            err.root(),
            SupervisorError::CycleDetected { path } if path == &vec!["loop", "loop"]
        ));
    }

    #[tokio::test]
    async fn failed_load_leaves_no_module_marked_as_loading() {
        let log = Log::default();
        let sup = supervisor(vec![
            probe("a", &log).with_deps(&["b"]),
            probe("b", &log).with_deps(&["a"]),
            probe("solo", &log),
        ]);
        sup.load_all_modules().await;
        assert!(sup.load_module("a").await.is_err());

        // A stale loading entry would make a later, unrelated load look cyclic.
        sup.stop_and_unload_module("solo").await;
        sup.load_module("solo").await.unwrap();
        assert!(sup.is_loaded("solo"));
    }

    #[tokio::test]
    async fn unknown_dependency_blocks_only_its_dependent() {
        let log = Log::default();
        let sup = supervisor(vec![
            probe("chat", &log).with_deps(&["ghost"]),
            probe("npc", &log),
        ]);
        let report = sup.load_all_modules().await;

        assert!(!sup.is_loaded("chat"));
        assert!(sup.is_loaded("npc"));
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].module, "chat");
        assert!(report.failed[0].error.contains("unknown module 'ghost'"));
    }

    #[tokio::test]
    async fn dependency_init_failure_is_propagated_and_nothing_partial_remains() {
        let log = Log::default();
        let broken = Behaviour {
            fail_init: true,
            ..Default::default()
        };
        let sup = supervisor(vec![
            probe("shop", &log).with_deps(&["economy"]),
            probe_with("economy", &log, broken),
        ]);
        sup.load_all_modules().await;

        let err = sup.load_module("shop").await.unwrap_err();
        assert!(matches!(
            &err,
            SupervisorError::Dependency {
                module: "shop",
                dependency: "economy",
                ..
            }
        ));
        assert!(matches!(
            err.root(),
            SupervisorError::Lifecycle {
                module: "economy",
                phase: Phase::Initialize,
                ..
            }
        ));
        assert!(!sup.is_loaded("shop"));
        assert!(!sup.is_loaded("economy"));
        assert!(sup.loading_order().await.is_empty());
        assert_eq!(count(&log, "construct:shop"), 0);
    }

    #[tokio::test]
    async fn loading_twice_constructs_once() {
        let log = Log::default();
        let sup = supervisor(vec![probe("pets", &log)]);
        sup.load_all_modules().await;

        sup.load_module("pets").await.unwrap();
        sup.load_module("pets").await.unwrap();
        assert_eq!(count(&log, "construct:pets"), 1);
        assert_eq!(sup.loading_order().await, vec!["pets"]);
    }

    #[tokio::test]
    async fn shared_dependency_is_registered_once_everywhere() {
        let log = Log::default();
        let sup = supervisor(vec![
            probe("top", &log).with_deps(&["left", "right"]),
            probe("left", &log).with_deps(&["base"]),
            probe("right", &log).with_deps(&["base"]),
            probe("base", &log),
        ]);
        sup.load_all_modules().await;

        assert_eq!(count(&log, "construct:base"), 1);
        let order = sup.loading_order().await;
        assert_eq!(order.len(), 4);
        let pos = |m: &str| order.iter().position(|n| *n == m).unwrap();
        assert!(pos("base") < pos("left") && pos("base") < pos("right"));
        assert!(pos("left") < pos("top") && pos("right") < pos("top"));

        let mut loaded = sup.loaded_modules();
        loaded.sort_unstable();
        let mut sorted = order.clone();
        sorted.sort_unstable();
        assert_eq!(loaded, sorted);
        assert_eq!(sup.pending_releases(), 0);
    }

    #[tokio::test]
    async fn loading_order_follows_priority() {
        let log = Log::default();
        let sup = supervisor(vec![
            probe("chat", &log).with_priority(Priority::Low),
            probe("economy", &log),
            probe("logger", &log).with_priority(Priority::Highest),
        ]);
        let report = sup.load_all_modules().await;

        assert_eq!(report.loaded, vec!["logger", "economy", "chat"]);
        assert_eq!(
            events(&log, "start:"),
            vec!["start:logger", "start:economy", "start:chat"]
        );
    }

    #[tokio::test]
    async fn start_modules_skips_running_instances() {
        let log = Log::default();
        let sup = supervisor(vec![probe("a", &log), probe("b", &log)]);
        sup.load_all_modules().await;

        assert!(sup.start_modules().await.is_empty());
        assert_eq!(count(&log, "start:a"), 1);
        assert_eq!(count(&log, "start:b"), 1);
    }

    #[tokio::test]
    async fn start_failure_marks_instance_faulted() {
        let log = Log::default();
        let broken = Behaviour {
            fail_start: true,
            ..Default::default()
        };
        let sup = supervisor(vec![probe_with("npc", &log, broken)]);
        let report = sup.load_all_modules().await;

        assert!(sup.is_loaded("npc"));
        assert_eq!(sup.state("npc"), Some(InstanceState::Faulted));
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].phase, Phase::Start);
        // Failed start is still timed.
        assert_eq!(sup.samples("npc").len(), 2);
    }

    #[tokio::test]
    async fn start_requires_a_loaded_module() {
        let sup = supervisor(vec![]);
        assert!(matches!(
            sup.start_module("nobody").await,
            Err(SupervisorError::NotLoaded(_))
        ));
    }

    #[tokio::test]
    async fn unload_is_reverse_order_and_tolerates_stop_failure() {
        let log = Log::default();
        let stubborn = Behaviour {
            fail_stop: true,
            ..Default::default()
        };
        let sup = supervisor(vec![
            probe("logger", &log).with_priority(Priority::Highest),
            probe_with("economy", &log, stubborn),
            probe("chat", &log).with_priority(Priority::Low),
        ]);
        sup.load_all_modules().await;
        sup.unload_all_modules().await;

        assert_eq!(
            events(&log, "unload:"),
            vec!["unload:chat", "unload:economy", "unload:logger"]
        );
        assert!(sup.loaded_modules().is_empty());
        assert!(sup.loading_order().await.is_empty());

        // Second call has nothing left to do.
        sup.unload_all_modules().await;
        assert_eq!(count(&log, "unload:chat"), 1);
    }

    #[tokio::test]
    async fn stop_and_unload_unknown_module_is_a_noop() {
        let log = Log::default();
        let sup = supervisor(vec![probe("pets", &log)]);
        sup.load_all_modules().await;

        assert!(!sup.stop_and_unload_module("ghost").await);
        assert!(sup.stop_and_unload_module("pets").await);
        assert!(!sup.stop_and_unload_module("pets").await);
        assert!(sup.samples("pets").is_empty());
    }

    #[tokio::test]
    async fn restart_builds_a_fresh_instance() {
        let log = Log::default();
        let sup = supervisor(vec![probe("shop", &log)]);
        sup.load_all_modules().await;
        let before = sup.instance("shop").unwrap();

        sup.restart_module("shop").await.unwrap();

        let after = sup.instance("shop").unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(sup.restart_count("shop"), 1);
        assert_eq!(sup.state("shop"), Some(InstanceState::Running));
        assert_eq!(count(&log, "construct:shop"), 2);
        assert_eq!(count(&log, "stop:shop"), 1);
        // Old samples are dropped with the old instance.
        assert_eq!(sup.samples("shop").len(), 2);
    }

    #[tokio::test]
    async fn restart_of_unknown_module_fails() {
        let sup = supervisor(vec![]);
        assert!(matches!(
            sup.restart_module("ghost").await,
            Err(SupervisorError::UnknownModule(_))
        ));
    }

    #[tokio::test]
    async fn held_instance_lingers_until_released() {
        let log = Log::default();
        let sup = supervisor(vec![probe("chat", &log)]);
        sup.load_all_modules().await;

        let held = sup.instance("chat").unwrap();
        sup.stop_and_unload_module("chat").await;
        assert_eq!(sup.pending_releases(), 1);

        drop(held);
        let report = sup.cleanup_references();
        assert_eq!(report.released, 1);
        assert_eq!(sup.pending_releases(), 0);
    }

    #[tokio::test]
    async fn full_reload_unloads_previous_instances() {
        let log = Log::default();
        let sup = supervisor(vec![probe("npc", &log)]);
        sup.load_all_modules().await;
        sup.load_all_modules().await;

        assert_eq!(count(&log, "construct:npc"), 2);
        assert_eq!(count(&log, "unload:npc"), 1);
        assert_eq!(sup.loaded_modules(), vec!["npc"]);
    }

    #[tokio::test]
    async fn bootstrap_module_starts_before_the_rest() {
        let log = Log::default();
        let config = SupervisorConfig {
            bootstrap_module: Some("zlog".to_string()),
            ..Default::default()
        };
        let sup = ModuleSupervisor::from_descriptors(
            vec![
                probe("alpha", &log).with_priority(Priority::Highest),
                probe("zlog", &log).with_priority(Priority::Lowest),
            ],
            config,
        );
        sup.load_all_modules().await;

        let started = events(&log, "start:");
        assert_eq!(started, vec!["start:zlog", "start:alpha"]);
        assert_eq!(
            events(&log, "init:"),
            vec!["init:zlog", "init:alpha"]
        );
    }

    #[tokio::test]
    async fn register_rejects_duplicates() {
        let log = Log::default();
        let sup = supervisor(vec![]);

        sup.register(probe("pets", &log)).await.unwrap();
        assert!(matches!(
            sup.register(probe("pets", &log)).await,
            Err(SupervisorError::DuplicateModule(_))
        ));

        sup.load_module("pets").await.unwrap();
        sup.start_module("pets").await.unwrap();
        assert_eq!(sup.state("pets"), Some(InstanceState::Running));
    }

    #[tokio::test(start_paused = true)]
    async fn fast_modules_are_never_restarted() {
        let log = Log::default();
        let sup = supervisor(vec![probe("npc", &log)]);
        sup.load_all_modules().await;
        sup.start_module("npc").await.unwrap();

        assert!(sup.check_stalls().await.is_empty());
        assert_eq!(sup.rolling_average("npc"), Some(Duration::ZERO));
    }
}
