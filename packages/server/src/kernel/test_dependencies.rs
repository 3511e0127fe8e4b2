// TestDependencies - in-memory implementations for testing
//
// Builds a complete ServerDeps without a database or network: in-memory
// stores, a scripted API transport and a controllable text analyzer.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use social_api_client::testing::ScriptedTransport;
use social_api_client::{BackoffPolicy, ClientConfig, RateLimit, SocialApiClient};

use super::clock::{Clock, SystemClock};
use super::jobs::{InMemoryJobQueue, QueueConfig};
use super::{BaseTextAnalyzer, ServerDeps, StaticCredentials, TextAnalysis};
use crate::domains::comments::{InMemoryCommentStore, LexiconAnalyzer, PipelineConfig};
use crate::domains::tasks::InMemoryTaskStore;

// =============================================================================
// Mock Text Analyzer
// =============================================================================

/// Analyzer that delegates to [`LexiconAnalyzer`] but can be told to fail.
///
/// A call fails when the text contains one of the configured markers, or
/// when its 0-based call index is in the failing set. Hooks registered with
/// [`after_call`](Self::after_call) run once the given call is done.
pub struct MockTextAnalyzer {
    inner: LexiconAnalyzer,
    fail_markers: Vec<String>,
    fail_calls: HashSet<usize>,
    hooks: HashMap<usize, CallHook>,
    calls: Arc<Mutex<Vec<String>>>,
}

type CallHook = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

impl MockTextAnalyzer {
    pub fn new() -> Self {
        Self {
            inner: LexiconAnalyzer::new(),
            fail_markers: Vec::new(),
            fail_calls: HashSet::new(),
            hooks: HashMap::new(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Fail every text containing `marker`
    pub fn failing_on(mut self, marker: &str) -> Self {
        self.fail_markers.push(marker.to_string());
        self
    }

    /// Fail the call with the given 0-based index
    pub fn failing_call(mut self, index: usize) -> Self {
        self.fail_calls.insert(index);
        self
    }

    /// Run `hook` after the call with the given 0-based index, e.g. to
    /// cancel a task or fire a shutdown token mid-analysis.
    pub fn after_call<F, Fut>(mut self, index: usize, hook: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.hooks.insert(index, Arc::new(move || hook().boxed()));
        self
    }

    /// Texts analyzed so far, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Default for MockTextAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseTextAnalyzer for MockTextAnalyzer {
    async fn analyze(&self, text: &str) -> Result<TextAnalysis> {
        let index = {
            let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
            calls.push(text.to_string());
            calls.len() - 1
        };

        let result = if self.fail_calls.contains(&index) {
            Err(anyhow::anyhow!("mock analyzer failure on call {}", index))
        } else if let Some(marker) = self.fail_markers.iter().find(|m| text.contains(m.as_str())) {
            Err(anyhow::anyhow!("mock analyzer rejected text containing {:?}", marker))
        } else {
            self.inner.analyze_text(text)
        };

        if let Some(hook) = self.hooks.get(&index) {
            hook().await;
        }
        result
    }
}

// =============================================================================
// TestDependencies Builder
// =============================================================================

/// Shared handles to the concrete test doubles behind a [`ServerDeps`].
///
/// Every [`ServerDeps`] built from the same `TestDependencies` shares these
/// stores, so a test can drive the pipeline and then assert on them directly.
pub struct TestDependencies {
    pub transport: Arc<ScriptedTransport>,
    pub task_store: Arc<InMemoryTaskStore>,
    pub job_queue: Arc<InMemoryJobQueue>,
    pub comment_store: Arc<InMemoryCommentStore>,
    pub text_analyzer: Arc<MockTextAnalyzer>,
    pub clock: Arc<dyn Clock>,
    pub client_config: ClientConfig,
    pub pipeline: PipelineConfig,
    social_client: Option<SocialApiClient>,
}

impl TestDependencies {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            transport: Arc::new(ScriptedTransport::new()),
            task_store: Arc::new(InMemoryTaskStore::with_clock(clock.clone())),
            job_queue: Arc::new(InMemoryJobQueue::with_clock(
                Self::queue_config(),
                clock.clone(),
            )),
            comment_store: Arc::new(InMemoryCommentStore::with_clock(clock.clone())),
            text_analyzer: Arc::new(MockTextAnalyzer::new()),
            clock,
            client_config: Self::client_config(),
            pipeline: PipelineConfig::default(),
            social_client: None,
        }
    }

    /// Queue settings with short retry delays so retried jobs come back quickly
    pub fn queue_config() -> QueueConfig {
        QueueConfig {
            lease_duration: Duration::from_secs(30),
            default_max_attempts: 3,
            retry_base: Duration::from_millis(1),
            retry_max: Duration::from_millis(10),
        }
    }

    /// Generous rate limit and millisecond backoff, comment pages of 10
    pub fn client_config() -> ClientConfig {
        ClientConfig {
            base_url: "http://scripted.invalid".to_string(),
            rate_limit: RateLimit {
                capacity: 50,
                refill_per_second: 100.0,
            },
            backoff: BackoffPolicy {
                base_delay: Duration::from_millis(1),
                multiplier: 2.0,
                max_delay: Duration::from_millis(5),
                jitter: 0.0,
                max_attempts: 3,
            },
            posts_page_size: 10,
            comments_page_size: 10,
            ..Default::default()
        }
    }

    /// Set a mock text analyzer
    pub fn mock_analyzer(mut self, analyzer: MockTextAnalyzer) -> Self {
        self.text_analyzer = Arc::new(analyzer);
        self
    }

    pub fn with_client_config(mut self, config: ClientConfig) -> Self {
        self.client_config = config;
        self.social_client = None;
        self
    }

    pub fn with_pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// The API client over the scripted transport, created on first use.
    pub fn social_client(&mut self) -> SocialApiClient {
        let transport = self.transport.clone();
        let config = self.client_config.clone();
        self.social_client
            .get_or_insert_with(|| SocialApiClient::with_transport(config, transport))
            .clone()
    }

    /// Build the dependency container over the shared test doubles.
    pub fn server_deps(&mut self) -> Arc<ServerDeps> {
        Arc::new(ServerDeps::new(
            self.task_store.clone(),
            self.job_queue.clone(),
            self.comment_store.clone(),
            self.social_client(),
            Arc::new(StaticCredentials::new("test-token")),
            self.text_analyzer.clone(),
            self.pipeline.clone(),
            self.clock.clone(),
        ))
    }
}

impl Default for TestDependencies {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_analyzer_fails_on_marker_and_index() {
        let analyzer = MockTextAnalyzer::new()
            .failing_on("BROKEN")
            .failing_call(2);

        assert!(analyzer.analyze("great wonderful day").await.is_ok());
        assert!(analyzer.analyze("this is BROKEN text").await.is_err());
        assert!(analyzer.analyze("another nice comment").await.is_err());
        assert!(analyzer.analyze("fine comment here").await.is_ok());
        assert_eq!(analyzer.call_count(), 4);
    }

    #[tokio::test]
    async fn after_call_hook_runs_once_at_its_index() {
        let fired = Arc::new(Mutex::new(0));
        let counter = fired.clone();
        let analyzer = MockTextAnalyzer::new().after_call(1, move || {
            let counter = counter.clone();
            async move {
                *counter.lock().unwrap() += 1;
            }
        });

        analyzer.analyze("first nice text").await.unwrap();
        assert_eq!(*fired.lock().unwrap(), 0);
        analyzer.analyze("second nice text").await.unwrap();
        analyzer.analyze("third nice text").await.unwrap();
        assert_eq!(*fired.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn deps_share_stores() {
        let mut test_deps = TestDependencies::new();
        let deps = test_deps.server_deps();
        let again = test_deps.server_deps();

        let task = crate::domains::tasks::Task::builder()
            .kind(crate::domains::tasks::TaskKind::Collect)
            .group_refs(vec![-1])
            .options(Default::default())
            .build();
        let id = deps.task_store.create(task).await.unwrap();

        assert!(again.task_store.get(id).await.is_ok());
        assert_eq!(test_deps.task_store.len().await, 1);
    }
}
