use proptest::prelude::*;
use scenesync::{
    resolve, Backoff, BackoffStep, BroadcastHub, ChangeSourcePoller, Event, MediaCatalog,
    MediaKind, SceneFilePoller, SceneMapping, SceneMappingTable, StateStore, SystemClock,
    Transport,
};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

struct TwoAnimations;

impl MediaCatalog for TwoAnimations {
    fn lookup(&self, name: &str) -> Option<MediaKind> {
        matches!(name, "a.html" | "b.html").then_some(MediaKind::Animation)
    }

    fn animations(&self) -> Vec<String> {
        vec!["a.html".to_string(), "b.html".to_string()]
    }

    fn videos(&self) -> Vec<String> {
        Vec::new()
    }
}

#[derive(Default)]
struct Counter {
    changes: Mutex<usize>,
}

impl Transport for Counter {
    fn name(&self) -> &'static str {
        "counter"
    }

    fn emit(&self, event: &Event) {
        if matches!(event, Event::AnimationChanged(_)) {
            *self.changes.lock().unwrap() += 1;
        }
    }
}

fn mappings() -> Vec<SceneMapping> {
    vec![
        SceneMapping::new("Intro", "a.html"),
        SceneMapping::new("BRB", "b.html"),
    ]
}

fn scene() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("Intro".to_string()),
        Just("BRB".to_string()),
        Just("Gameplay".to_string()),
    ]
}

/// Drive a scene poller through `scenes`, returning how many media changes
/// were broadcast
async fn broadcasts_for(scenes: &[String]) -> usize {
    let dir = tempfile::tempdir().unwrap();
    let scene_file = dir.path().join("obs_current_scene.json");
    let store = StateStore::new(dir.path().join("state.json"), &scene_file, None);
    let counter = Arc::new(Counter::default());
    let hub = BroadcastHub::new(
        store.clone(),
        Arc::new(TwoAnimations),
        vec![counter.clone() as Arc<dyn Transport>],
        Arc::new(SystemClock),
    );
    let table = SceneMappingTable::new(dir.path().join("obs_mappings.json"));
    table.save(&mappings()).await.unwrap();

    let mut poller = SceneFilePoller::new(&scene_file, table, hub, Default::default(), Arc::new(SystemClock));
    for (i, scene) in scenes.iter().enumerate() {
        store.update_scene(scene).await.unwrap();
        let file = std::fs::File::options().write(true).open(&scene_file).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(i as u64 + 1))
            .unwrap();
        poller.poll_once().await.unwrap();
    }

    let changes = *counter.changes.lock().unwrap();
    changes
}

fn expected_broadcasts(scenes: &[String]) -> usize {
    let table = mappings();
    let mut last: Option<&str> = None;
    let mut count = 0;
    for scene in scenes {
        if last != Some(scene.as_str()) {
            last = Some(scene);
            if resolve(scene, &table).is_some() {
                count += 1;
            }
        }
    }
    count
}

proptest! {
    #[test]
    fn unmapped_scenes_resolve_to_nothing(name in "[A-Za-z0-9 _-]{0,24}") {
        prop_assume!(name != "Intro" && name != "BRB");
        let mappings = mappings();
        prop_assert_eq!(resolve(&name, &mappings), None);
    }

    #[test]
    fn backoff_is_capped_and_cools_down(failures in 1u32..60) {
        let mut backoff = Backoff::default();
        let mut attempts_since_cooldown = 0u32;
        for _ in 0..failures {
            match backoff.next_step() {
                BackoffStep::Retry { attempt, delay } => {
                    attempts_since_cooldown += 1;
                    prop_assert_eq!(attempt, attempts_since_cooldown);
                    prop_assert!(attempt <= 20);
                    let expected = 2u64.saturating_pow(attempt).min(30);
                    prop_assert_eq!(delay, Duration::from_secs(expected));
                }
                BackoffStep::Cooldown(cooldown) => {
                    prop_assert_eq!(attempts_since_cooldown, 20);
                    prop_assert_eq!(cooldown, Duration::from_secs(300));
                    attempts_since_cooldown = 0;
                }
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn repeated_scene_observations_broadcast_once(
        scenes in proptest::collection::vec(scene(), 1..8)
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let actual = runtime.block_on(broadcasts_for(&scenes));
        prop_assert_eq!(actual, expected_broadcasts(&scenes));
    }
}
