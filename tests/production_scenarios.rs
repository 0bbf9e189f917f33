//! End-to-end production runs against a scripted in-process provider.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use scene_forge::error::ProviderError;
use scene_forge::production::{
    BroadcastError, ChannelBroadcaster, EventBroadcaster, ProductionConfig, ProductionError,
    ProductionEvent, ProductionOrchestrator, ProjectStatus, RetryDecision, RetryPolicy,
    ScenePhase, SceneStatus, SceneTask,
};
use scene_forge::provider::{AssetRef, ContentRef, GenerationProvider, SceneSpec};
use scene_forge::storage::{MemoryStore, SceneStore};

const MISSING_METHOD: &str = "AttributeError: 'Circle' object has no attribute 'glow'";

/// Provider whose plan and per-scene render failures are fixed up front.
struct ScriptedProvider {
    plan: Result<Vec<SceneSpec>, String>,
    /// Scene title -> number of leading render failures.
    failures: HashMap<String, usize>,
    failure_message: String,
    render_delay: Duration,
    renders_by_title: Mutex<HashMap<String, usize>>,
    feedback_by_title: Mutex<HashMap<String, Vec<Option<String>>>>,
    active_renders: AtomicUsize,
    peak_renders: AtomicUsize,
    content_calls: AtomicUsize,
}

impl ScriptedProvider {
    fn with_scenes(titles: &[&str]) -> Self {
        Self {
            plan: Ok(titles
                .iter()
                .map(|t| SceneSpec::new(*t, format!("About {}", t)))
                .collect()),
            failures: HashMap::new(),
            failure_message: MISSING_METHOD.to_string(),
            render_delay: Duration::from_millis(5),
            renders_by_title: Mutex::new(HashMap::new()),
            feedback_by_title: Mutex::new(HashMap::new()),
            active_renders: AtomicUsize::new(0),
            peak_renders: AtomicUsize::new(0),
            content_calls: AtomicUsize::new(0),
        }
    }

    fn failing_planner(message: &str) -> Self {
        Self {
            plan: Err(message.to_string()),
            ..Self::with_scenes(&[])
        }
    }

    fn fail(mut self, title: &str, times: usize) -> Self {
        self.failures.insert(title.to_string(), times);
        self
    }

    fn with_render_delay(mut self, delay: Duration) -> Self {
        self.render_delay = delay;
        self
    }

    fn renders_of(&self, title: &str) -> usize {
        self.renders_by_title
            .lock()
            .unwrap()
            .get(title)
            .copied()
            .unwrap_or(0)
    }

    fn feedback_of(&self, title: &str) -> Vec<Option<String>> {
        self.feedback_by_title
            .lock()
            .unwrap()
            .get(title)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl GenerationProvider for ScriptedProvider {
    async fn plan(&self, _: &str, _: f64) -> Result<Vec<SceneSpec>, ProviderError> {
        self.plan
            .clone()
            .map_err(ProviderError::RequestFailed)
    }

    async fn generate_asset(&self, project_id: &str, _: &str) -> Result<AssetRef, ProviderError> {
        Ok(AssetRef::new(format!("/storage/{}/assets/bg.png", project_id)))
    }

    async fn generate_content(
        &self,
        task: &SceneTask,
        feedback: Option<&str>,
    ) -> Result<ContentRef, ProviderError> {
        self.content_calls.fetch_add(1, Ordering::SeqCst);
        self.feedback_by_title
            .lock()
            .unwrap()
            .entry(task.title.clone())
            .or_default()
            .push(feedback.map(str::to_string));
        Ok(ContentRef::new(format!(
            "class Scene{}(Scene):\n    pass",
            task.index
        )))
    }

    async fn render(&self, task: &SceneTask, _: &ContentRef) -> Result<String, ProviderError> {
        let now = self.active_renders.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_renders.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.render_delay).await;
        self.active_renders.fetch_sub(1, Ordering::SeqCst);

        let attempt = {
            let mut renders = self.renders_by_title.lock().unwrap();
            let count = renders.entry(task.title.clone()).or_insert(0);
            *count += 1;
            *count
        };

        let failures = self.failures.get(&task.title).copied().unwrap_or(0);
        if attempt <= failures {
            return Err(ProviderError::RenderFailed(format!(
                "Manim failed: {}",
                self.failure_message
            )));
        }
        Ok(format!("/media/{}/scene_{}.mp4", task.project_id, task.index))
    }
}

#[derive(Default)]
struct RecordingBroadcaster {
    events: Mutex<Vec<ProductionEvent>>,
}

impl RecordingBroadcaster {
    fn events(&self) -> Vec<ProductionEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventBroadcaster for RecordingBroadcaster {
    async fn publish(&self, _: &str, event: ProductionEvent) -> Result<(), BroadcastError> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

struct Harness {
    orchestrator: ProductionOrchestrator,
    provider: Arc<ScriptedProvider>,
    store: Arc<MemoryStore>,
    events: Arc<RecordingBroadcaster>,
}

fn harness(provider: ScriptedProvider, config: ProductionConfig) -> Harness {
    let provider = Arc::new(provider);
    let store = Arc::new(MemoryStore::new());
    let events = Arc::new(RecordingBroadcaster::default());
    let orchestrator =
        ProductionOrchestrator::new(config, provider.clone(), store.clone(), events.clone())
            .unwrap();
    Harness {
        orchestrator,
        provider,
        store,
        events,
    }
}

fn terminal_updates(events: &[ProductionEvent]) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for event in events {
        if let ProductionEvent::SceneUpdate {
            scene_id, status, ..
        } = event
        {
            if matches!(status, ScenePhase::Ready | ScenePhase::Error) {
                *counts.entry(scene_id.clone()).or_insert(0) += 1;
            }
        }
    }
    counts
}

#[tokio::test]
async fn scenario_a_durations_split_evenly() {
    let h = harness(
        ScriptedProvider::with_scenes(&["Falling apple", "Orbits", "Tides"]),
        ProductionConfig::default(),
    );

    let outcome = h
        .orchestrator
        .run("explain gravity", Some(60.0))
        .await
        .unwrap();

    assert_eq!(outcome.status, ProjectStatus::Ready);
    assert_eq!(outcome.scenes.len(), 3);
    for scene in &outcome.scenes {
        assert!((scene.duration_seconds - 20.0).abs() < f64::EPSILON);
        assert!(scene.is_ready());
    }

    let stored = h.store.list_scenes(&outcome.project_id).await.unwrap();
    assert_eq!(stored.len(), 3);
    assert!(stored
        .iter()
        .all(|s| s.target_duration_seconds == Some(20.0)));
    assert_eq!(
        stored.iter().map(|s| s.title.as_str()).collect::<Vec<_>>(),
        vec!["Falling apple", "Orbits", "Tides"]
    );

    let project = h.store.get_project(&outcome.project_id).await.unwrap();
    assert_eq!(project.status, ProjectStatus::Ready);
}

#[tokio::test]
async fn scenario_b_success_on_third_attempt() {
    let h = harness(
        ScriptedProvider::with_scenes(&["Intro", "Flaky"]).fail("Flaky", 2),
        ProductionConfig::default(),
    );

    let outcome = h.orchestrator.run("explain gravity", Some(20.0)).await.unwrap();

    assert_eq!(outcome.status, ProjectStatus::Ready);
    assert!(!outcome.is_partial());
    let flaky = &outcome.scenes[1];
    assert_eq!(flaky.status, SceneStatus::Ready);
    assert_eq!(flaky.retry_count, 2);
    assert!(flaky.media_url.is_some());
    assert_eq!(
        outcome
            .scenes
            .iter()
            .filter(|s| s.scene_id == flaky.scene_id)
            .count(),
        1
    );

    assert_eq!(h.provider.renders_of("Flaky"), 3);
    let feedback = h.provider.feedback_of("Flaky");
    assert_eq!(feedback.len(), 3);
    assert!(feedback[0].is_none());
    for hint in &feedback[1..] {
        let hint = hint.as_deref().unwrap();
        assert!(hint.contains("AttributeError"));
        assert!(hint.contains("Verify the method exists"));
    }

    let stored = h.store.scene(&flaky.scene_id).await.unwrap();
    assert_eq!(stored.retry_count, 2);
    assert_eq!(stored.status, SceneStatus::Ready);
}

#[tokio::test]
async fn scenario_c_exhausted_scene_leaves_project_ready() {
    let h = harness(
        ScriptedProvider::with_scenes(&["Good", "Broken", "Also good"]).fail("Broken", usize::MAX),
        ProductionConfig::default(),
    );

    let outcome = h.orchestrator.run("explain gravity", Some(30.0)).await.unwrap();

    assert_eq!(outcome.status, ProjectStatus::Ready);
    assert!(outcome.is_partial());
    assert_eq!(outcome.ready_scenes(), 2);
    assert_eq!(outcome.failed_scenes(), 1);

    let broken = &outcome.scenes[1];
    assert_eq!(broken.status, SceneStatus::Error);
    assert!(broken.media_url.is_none());
    assert!(broken.error.as_deref().unwrap().contains("AttributeError"));
    assert_eq!(broken.retry_count, 3);
    assert_eq!(h.provider.renders_of("Broken"), 3);

    let stored = h.store.scene(&broken.scene_id).await.unwrap();
    assert_eq!(stored.status, SceneStatus::Error);
    assert!(stored.last_error.is_some());
    assert!(stored.content.is_some());
}

#[tokio::test]
async fn failed_scene_fails_project_when_configured() {
    let h = harness(
        ScriptedProvider::with_scenes(&["Good", "Broken"]).fail("Broken", usize::MAX),
        ProductionConfig::default().with_fail_on_scene_error(true),
    );

    let outcome = h.orchestrator.run("explain gravity", Some(30.0)).await.unwrap();

    assert_eq!(outcome.status, ProjectStatus::Error);
    assert_eq!(outcome.ready_scenes(), 1);
    let project = h.store.get_project(&outcome.project_id).await.unwrap();
    assert_eq!(project.status, ProjectStatus::Error);
}

#[tokio::test]
async fn scenario_d_planning_failure_is_fatal() {
    let h = harness(
        ScriptedProvider::failing_planner("planner unavailable"),
        ProductionConfig::default(),
    );
    let state = h
        .orchestrator
        .create_project("explain gravity", Some(60.0))
        .await
        .unwrap();
    let project_id = state.project_id.clone();

    let err = h
        .orchestrator
        .run_project(state, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ProductionError::Planning(_)));
    assert!(err.to_string().contains("planner unavailable"));

    let project = h.store.get_project(&project_id).await.unwrap();
    assert_eq!(project.status, ProjectStatus::Error);
    assert_eq!(h.store.count_scenes(&project_id).await.unwrap(), 0);
    assert_eq!(h.provider.content_calls.load(Ordering::SeqCst), 0);

    let events = h.events.events();
    assert_eq!(events.len(), 1);
    assert!(events[0].is_project_complete());
}

#[tokio::test]
async fn scenario_e_render_pool_bounds_concurrency() {
    let h = harness(
        ScriptedProvider::with_scenes(&["S1", "S2", "S3", "S4", "S5"])
            .with_render_delay(Duration::from_millis(60)),
        ProductionConfig::default().with_render_concurrency(3),
    );

    let outcome = h.orchestrator.run("explain gravity", Some(50.0)).await.unwrap();

    assert_eq!(outcome.ready_scenes(), 5);
    assert_eq!(h.provider.peak_renders.load(Ordering::SeqCst), 3);

    let stats = h.orchestrator.pool().stats();
    assert_eq!(stats.peak_in_use, 3);
    assert_eq!(stats.in_use, 0);
    assert_eq!(stats.total_acquired, 5);

    // Two scenes had to wait for a slot.
    let queued = h
        .events
        .events()
        .iter()
        .filter(|e| {
            matches!(
                e,
                ProductionEvent::SceneUpdate {
                    status: ScenePhase::Queued,
                    ..
                }
            )
        })
        .count();
    assert_eq!(queued, 2);
}

#[tokio::test]
async fn every_scene_resolves_exactly_once() {
    let titles = ["A", "B", "C", "D", "E", "F", "G"];
    let h = harness(
        ScriptedProvider::with_scenes(&titles)
            .fail("B", 1)
            .fail("D", usize::MAX)
            .fail("F", 2),
        ProductionConfig::default()
            .with_render_concurrency(2)
            .with_max_parallel_scenes(3),
    );

    let outcome = h.orchestrator.run("many scenes", Some(70.0)).await.unwrap();

    assert_eq!(outcome.scenes.len(), titles.len());
    let ids: HashSet<&str> = outcome.scenes.iter().map(|s| s.scene_id.as_str()).collect();
    assert_eq!(ids.len(), titles.len());
    assert_eq!(
        outcome.scenes.iter().map(|s| s.index).collect::<Vec<_>>(),
        (0..titles.len()).collect::<Vec<_>>()
    );

    let events = h.events.events();
    assert!(matches!(
        events.first(),
        Some(ProductionEvent::ScenesPlanned { scenes }) if scenes.len() == titles.len()
    ));
    assert!(events.last().unwrap().is_project_complete());
    assert_eq!(events.iter().filter(|e| e.is_project_complete()).count(), 1);

    let terminal = terminal_updates(&events);
    assert_eq!(terminal.len(), titles.len());
    assert!(terminal.values().all(|n| *n == 1));

    // No scene runs more than three attempts.
    for title in titles {
        assert!(h.provider.renders_of(title) <= 3);
        assert!(h.provider.feedback_of(title).len() <= 3);
    }
    assert_eq!(outcome.scenes[1].retry_count, 1);
    assert_eq!(outcome.scenes[3].retry_count, 3);
    assert_eq!(outcome.scenes[5].retry_count, 2);
}

#[tokio::test]
async fn retry_events_count_up_by_one() {
    let h = harness(
        ScriptedProvider::with_scenes(&["Only"]).fail("Only", usize::MAX),
        ProductionConfig::default(),
    );

    let outcome = h.orchestrator.run("one scene", Some(10.0)).await.unwrap();
    let scene_id = &outcome.scenes[0].scene_id;

    let retry_messages: Vec<String> = h
        .events
        .events()
        .into_iter()
        .filter_map(|e| match e {
            ProductionEvent::SceneUpdate {
                scene_id: id,
                status: ScenePhase::Retrying,
                progress_message,
                ..
            } if &id == scene_id => progress_message,
            _ => None,
        })
        .collect();

    assert_eq!(
        retry_messages,
        vec![
            "Attempt 1 failed, retrying (1/2)".to_string(),
            "Attempt 2 failed, retrying (2/2)".to_string(),
        ]
    );
}

#[tokio::test]
async fn cancellation_fails_outstanding_scenes_and_releases_permits() {
    let h = harness(
        ScriptedProvider::with_scenes(&["S1", "S2", "S3", "S4"])
            .with_render_delay(Duration::from_secs(30)),
        ProductionConfig::default().with_render_concurrency(2),
    );
    let state = h
        .orchestrator
        .create_project("slow renders", Some(40.0))
        .await
        .unwrap();
    let cancel = CancellationToken::new();
    let started = Instant::now();

    let (result, _) = tokio::join!(h.orchestrator.run_project(state, &cancel), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
    });
    let outcome = result.unwrap();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(outcome.status, ProjectStatus::Error);
    assert_eq!(outcome.scenes.len(), 4);
    for scene in &outcome.scenes {
        assert_eq!(scene.status, SceneStatus::Error);
        assert_eq!(scene.error.as_deref(), Some("cancelled"));
        assert!(scene.retry_count == 0);
    }

    let stats = h.orchestrator.pool().stats();
    assert_eq!(stats.in_use, 0);
    assert_eq!(h.orchestrator.pool().available(), 2);
    assert!(h.events.events().last().unwrap().is_project_complete());
}

#[tokio::test]
async fn channel_subscribers_see_the_whole_run() {
    let provider = Arc::new(ScriptedProvider::with_scenes(&["A", "B"]).fail("A", 1));
    let broadcaster = Arc::new(ChannelBroadcaster::default());
    let orchestrator = ProductionOrchestrator::new(
        ProductionConfig::default(),
        provider,
        Arc::new(MemoryStore::new()),
        broadcaster.clone(),
    )
    .unwrap();

    let state = orchestrator.create_project("two scenes", Some(10.0)).await.unwrap();
    let collector = {
        let stream = broadcaster.subscribe(&state.project_id);
        tokio::spawn(stream.collect::<Vec<ProductionEvent>>())
    };

    let outcome = orchestrator
        .run_project(state, &CancellationToken::new())
        .await
        .unwrap();
    let events = collector.await.unwrap();

    assert_eq!(outcome.ready_scenes(), 2);
    assert_eq!(events.first().map(|e| e.kind()), Some("scenes_planned"));
    assert!(events.last().unwrap().is_project_complete());
    assert!(events.iter().any(|e| matches!(
        e,
        ProductionEvent::SceneUpdate {
            status: ScenePhase::Retrying,
            ..
        }
    )));
    let ready_urls = events
        .iter()
        .filter_map(|e| match e {
            ProductionEvent::SceneUpdate {
                status: ScenePhase::Ready,
                media_url,
                ..
            } => media_url.clone(),
            _ => None,
        })
        .count();
    assert_eq!(ready_urls, 2);
    assert_eq!(broadcaster.open_channels(), 0);
}

#[test]
fn retry_decisions_are_pure() {
    let policy = RetryPolicy::default();
    let messages = [
        MISSING_METHOD,
        "NameError: name 'Glow' is not defined",
        "TypeError: unsupported operand",
        "segfault in renderer",
        "",
    ];

    for attempt in 0..4 {
        for message in messages {
            let first = policy.decide(attempt, message);
            let second = policy.decide(attempt, message);
            assert_eq!(first, second);
            if attempt >= 2 {
                assert_eq!(first, RetryDecision::Terminal);
            } else {
                assert!(first.is_retry());
            }
        }
    }
}
