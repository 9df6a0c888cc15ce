#![allow(dead_code)]

use async_trait::async_trait;
use loopdeck_application::{ReplSessionManager, ResourceLifecycleManager};
use loopdeck_core::config::LoopdeckConfig;
use loopdeck_core::engine::{
    ContainerHandle, EditorFactory, EditorSurface, EngineFault, Pattern, PatternEngine,
    ProgressSink,
};
use loopdeck_core::error::{LoopdeckError, Result};
use loopdeck_core::repl::{
    Repl, ReplListChanged, ReplStorage, ReplSummary, StorageReadiness,
};
use loopdeck_infrastructure::LocalBackend;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// Pattern engine stand-in.
///
/// - code containing `syntax!` is rejected with a syntax error
/// - code containing `silence` evaluates to no pattern
/// - code containing `missing` fails with a missing sample
#[derive(Default)]
pub struct MockEngine {
    pub fail_preload: AtomicBool,
    pub preloads: AtomicUsize,
    pub stops: AtomicUsize,
    pub evaluations: Mutex<Vec<(String, bool)>>,
}

impl MockEngine {
    pub fn evaluation_count(&self) -> usize {
        self.evaluations.lock().unwrap().len()
    }
}

#[async_trait]
impl PatternEngine for MockEngine {
    async fn preload(&self, progress: ProgressSink<'_>) -> std::result::Result<(), EngineFault> {
        self.preloads.fetch_add(1, Ordering::SeqCst);
        progress("Loading samples", 50);
        if self.fail_preload.load(Ordering::SeqCst) {
            return Err(EngineFault::new("audio context blocked"));
        }
        progress("Loading samples", 90);
        Ok(())
    }

    async fn evaluate(
        &self,
        code: &str,
        autostart: bool,
    ) -> std::result::Result<Option<Pattern>, EngineFault> {
        self.evaluations
            .lock()
            .unwrap()
            .push((code.to_string(), autostart));
        if code.contains("syntax!") {
            return Err(EngineFault::new("SyntaxError: Unexpected token '!'"));
        }
        if code.contains("missing") {
            return Err(EngineFault::new("sound \"missing\" not found! Is it loaded?"));
        }
        if code.contains("silence") {
            return Ok(None);
        }
        Ok(Some(Pattern::new(code)))
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct EditorLog {
    pub created: Vec<String>,
    pub disposed: Vec<String>,
    pub themes: Vec<(String, String)>,
}

pub struct MockEditor {
    container: ContainerHandle,
    code: String,
    log: Arc<Mutex<EditorLog>>,
}

impl EditorSurface for MockEditor {
    fn container(&self) -> &ContainerHandle {
        &self.container
    }

    fn code(&self) -> String {
        self.code.clone()
    }

    fn set_code(&mut self, code: &str) {
        self.code = code.to_string();
    }

    fn apply_theme(&mut self, theme: &str) {
        self.log
            .lock()
            .unwrap()
            .themes
            .push((self.container.id().to_string(), theme.to_string()));
    }

    fn dispose(&mut self) {
        self.log
            .lock()
            .unwrap()
            .disposed
            .push(self.container.id().to_string());
    }
}

#[derive(Default)]
pub struct MockEditorFactory {
    pub log: Arc<Mutex<EditorLog>>,
    pub fail: AtomicBool,
}

impl MockEditorFactory {
    pub fn created(&self) -> Vec<String> {
        self.log.lock().unwrap().created.clone()
    }

    pub fn disposed(&self) -> Vec<String> {
        self.log.lock().unwrap().disposed.clone()
    }

    pub fn themes(&self) -> Vec<(String, String)> {
        self.log.lock().unwrap().themes.clone()
    }
}

impl EditorFactory for MockEditorFactory {
    fn create(
        &self,
        container: &ContainerHandle,
        initial_code: &str,
    ) -> std::result::Result<Box<dyn EditorSurface>, EngineFault> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(EngineFault::new("container is gone"));
        }
        self.log
            .lock()
            .unwrap()
            .created
            .push(container.id().to_string());
        Ok(Box::new(MockEditor {
            container: container.clone(),
            code: initial_code.to_string(),
            log: self.log.clone(),
        }))
    }
}

/// Storage whose first `failures` saves fail.
pub struct FlakyStorage {
    pub inner: Arc<LocalBackend>,
    pub failures: AtomicUsize,
    pub attempts: AtomicUsize,
}

impl FlakyStorage {
    pub fn new(inner: Arc<LocalBackend>, failures: usize) -> Self {
        Self {
            inner,
            failures: AtomicUsize::new(failures),
            attempts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ReplStorage for FlakyStorage {
    async fn get_repl(&self, id: &str) -> Result<Option<Repl>> {
        self.inner.get_repl(id).await
    }

    async fn get_all_repls(&self) -> Result<Vec<ReplSummary>> {
        self.inner.get_all_repls().await
    }

    async fn save_repl(&self, id: &str, code: &str, name: Option<&str>) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(LoopdeckError::storage("disk full"));
        }
        self.inner.save_repl(id, code, name).await
    }

    async fn archive_repl(&self, id: &str) -> Result<()> {
        self.inner.archive_repl(id).await
    }

    async fn unarchive_repl(&self, id: &str) -> Result<()> {
        self.inner.unarchive_repl(id).await
    }

    async fn delete_repl(&self, id: &str) -> Result<()> {
        self.inner.delete_repl(id).await
    }

    async fn attach_thread_to_repl(&self, thread_id: &str, repl_id: &str) -> Result<()> {
        self.inner.attach_thread_to_repl(thread_id, repl_id).await
    }

    async fn get_thread_repl_id(&self, thread_id: &str) -> Result<Option<String>> {
        self.inner.get_thread_repl_id(thread_id).await
    }

    async fn get_thread_for_repl(&self, repl_id: &str) -> Result<Option<String>> {
        self.inner.get_thread_for_repl(repl_id).await
    }

    async fn get_active_repl_id(&self) -> Result<Option<String>> {
        self.inner.get_active_repl_id().await
    }

    async fn set_active_repl_id(&self, id: &str) -> Result<()> {
        self.inner.set_active_repl_id(id).await
    }

    fn readiness(&self) -> StorageReadiness {
        self.inner.readiness()
    }

    fn subscribe_repl_list(&self) -> broadcast::Receiver<ReplListChanged> {
        self.inner.subscribe_repl_list()
    }
}

pub struct Harness {
    pub engine: Arc<MockEngine>,
    pub editors: Arc<MockEditorFactory>,
    pub lifecycle: Arc<ResourceLifecycleManager>,
}

impl Harness {
    pub fn new() -> Self {
        let engine = Arc::new(MockEngine::default());
        let editors = Arc::new(MockEditorFactory::default());
        let lifecycle = Arc::new(ResourceLifecycleManager::new(
            engine.clone(),
            editors.clone(),
            &LoopdeckConfig::default(),
        ));
        Self {
            engine,
            editors,
            lifecycle,
        }
    }

    pub async fn ready() -> Self {
        let harness = Self::new();
        harness.lifecycle.init().await.unwrap();
        harness
    }

    pub fn sessions(&self, storage: Arc<dyn ReplStorage>) -> Arc<ReplSessionManager> {
        Arc::new(ReplSessionManager::new(
            storage,
            self.lifecycle.clone(),
            LoopdeckConfig::default(),
        ))
    }
}

pub fn local() -> Arc<LocalBackend> {
    Arc::new(LocalBackend::in_memory(LoopdeckConfig::default()))
}
