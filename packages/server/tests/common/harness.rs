//! Test harnesses for integration testing.
//!
//! [`TestHarness`] runs the whole pipeline in memory: in-memory stores and
//! queue, a scripted API transport and a controllable analyzer.
//! [`PostgresHarness`] starts one shared Postgres container (testcontainers)
//! and runs migrations once; tests using it are `#[ignore]`d since they need
//! a Docker daemon.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use server_core::domains::build_job_registry;
use server_core::domains::tasks::{Task, TaskOptions, TaskStatus};
use server_core::kernel::jobs::{
    Job, JobContext, JobResult, WorkerPool, WorkerPoolConfig, DEFAULT_QUEUE,
};
use server_core::kernel::{ServerDeps, TestDependencies};
use sqlx::PgPool;
use test_context::AsyncTestContext;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn init_tracing() {
    // Run tests with: RUST_LOG=debug cargo test -- --nocapture
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// =============================================================================
// In-memory harness
// =============================================================================

/// Pipeline over in-memory dependencies.
///
/// # Example using test-context
///
/// ```ignore
/// use test_context::test_context;
///
/// #[test_context(TestHarness)]
/// #[tokio::test]
/// async fn my_test(ctx: &TestHarness) {
///     let task_id = ctx.create_collect_task(vec![-1]).await;
///     ctx.run_jobs().await;
/// }
/// ```
pub struct TestHarness {
    pub test_deps: TestDependencies,
    pub deps: Arc<ServerDeps>,
    pub workers: WorkerPool,
}

impl AsyncTestContext for TestHarness {
    async fn setup() -> Self {
        Self::with_dependencies(TestDependencies::new())
    }

    async fn teardown(self) {
        // In-memory state is dropped with the harness
    }
}

impl TestHarness {
    pub fn with_dependencies(mut test_deps: TestDependencies) -> Self {
        init_tracing();
        let deps = test_deps.server_deps();
        let workers = WorkerPool::new(
            Arc::new(build_job_registry()),
            deps.clone(),
            Self::worker_config(),
        );
        Self {
            test_deps,
            deps,
            workers,
        }
    }

    pub fn worker_config() -> WorkerPoolConfig {
        WorkerPoolConfig {
            worker_count: 2,
            poll_interval: Duration::from_millis(5),
            heartbeat_interval: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(2),
            worker_id_prefix: "test-worker".to_string(),
            ..Default::default()
        }
    }

    pub async fn create_collect_task(&self, group_refs: Vec<i64>) -> Uuid {
        self.create_collect_task_with(group_refs, TaskOptions::default())
            .await
    }

    pub async fn create_collect_task_with(&self, group_refs: Vec<i64>, options: TaskOptions) -> Uuid {
        server_core::domains::tasks::create_task(
            &self.deps,
            server_core::domains::tasks::TaskKind::Collect,
            group_refs,
            options,
        )
        .await
        .expect("Failed to create collect task")
    }

    /// Process jobs until nothing is eligible, then once more after short
    /// pauses so millisecond retry backoffs get their turn.
    pub async fn run_jobs(&self) -> usize {
        let mut processed = 0;
        for _ in 0..5 {
            let ran = self
                .workers
                .run_until_idle()
                .await
                .expect("Failed to run jobs");
            processed += ran;
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        processed
    }

    /// Lease the next job as `worker_id` and run its handler without
    /// reporting the outcome to the queue, like a worker that dies right
    /// after doing the work. `cancel` stands in for that worker's shutdown.
    pub async fn run_unsettled(&self, worker_id: &str, cancel: CancellationToken) -> (Job, JobResult) {
        let job = self
            .deps
            .job_queue
            .dequeue(DEFAULT_QUEUE, worker_id)
            .await
            .expect("Failed to dequeue")
            .expect("No eligible job");
        let ctx = JobContext::for_job(&job, cancel);
        let result = build_job_registry()
            .execute(&job, self.deps.clone(), ctx)
            .await;
        (job, result)
    }

    pub async fn task(&self, id: Uuid) -> Task {
        self.deps.task_store.get(id).await.expect("Task not found")
    }

    /// Poll until the task is terminal or `timeout` elapses.
    pub async fn wait_for_terminal(&self, id: Uuid, timeout: Duration) -> Task {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let task = self.task(id).await;
            if task.status.is_terminal() || tokio::time::Instant::now() >= deadline {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub async fn assert_status(&self, id: Uuid, status: TaskStatus) -> Task {
        let task = self.task(id).await;
        assert_eq!(
            task.status, status,
            "task {} expected {}, got {} (errors: {:?})",
            id, status, task.status, task.errors
        );
        task
    }
}

// =============================================================================
// Postgres harness
// =============================================================================

/// Shared test infrastructure that persists across all tests.
struct SharedTestInfra {
    db_url: String,
    // Keep the container alive for the entire test run
    _postgres: ContainerAsync<Postgres>,
}

/// Global shared infrastructure - initialized once, reused by all tests.
static SHARED_INFRA: OnceCell<SharedTestInfra> = OnceCell::const_new();

impl SharedTestInfra {
    async fn init() -> Result<Self> {
        init_tracing();

        let postgres = Postgres::default()
            .with_tag("16")
            .with_cmd(["-c", "max_connections=200"])
            .start()
            .await
            .context("Failed to start Postgres container")?;

        let pg_host = postgres.get_host().await?;
        let pg_port = postgres.get_host_port_ipv4(5432).await?;
        let db_url = format!(
            "postgresql://postgres:postgres@{}:{}/postgres",
            pg_host, pg_port
        );

        // Run migrations once on the shared database
        let pool = PgPool::connect(&db_url)
            .await
            .context("Failed to connect to Postgres for migrations")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            db_url,
            _postgres: postgres,
        })
    }

    async fn get() -> &'static Self {
        SHARED_INFRA
            .get_or_init(|| async {
                Self::init()
                    .await
                    .expect("Failed to initialize shared test infrastructure")
            })
            .await
    }
}

/// Harness over the shared Postgres container.
///
/// Tests share one database, so each test should use its own ids, owner ids
/// and queue names.
pub struct PostgresHarness {
    pub db_pool: PgPool,
}

impl AsyncTestContext for PostgresHarness {
    async fn setup() -> Self {
        let infra = SharedTestInfra::get().await;
        let db_pool = PgPool::connect(&infra.db_url)
            .await
            .expect("Failed to connect to test database");
        Self { db_pool }
    }

    async fn teardown(self) {
        self.db_pool.close().await;
    }
}
