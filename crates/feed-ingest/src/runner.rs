//! Job and Runner: driving volumes through the stage map
//!
//! A job wraps one volume at one status. Running it looks up the stage the
//! package type maps to that status, executes it, and reports the new
//! status through a callback. Jobs are single-use: continuation is always
//! a new job at the new status, which gives natural retry and punt
//! semantics and lets the runner checkpoint through the queue after every
//! stage.
//!
//! Concurrency model: volumes run concurrently up to `dataset.threads`;
//! stages within one volume run serially on one worker. Workers share
//! nothing but the database.

use crate::db;
use crate::error::{IngestError, Result};
use crate::registry::Engine;
use crate::stage::status;
use crate::volume::Volume;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

/// Receives the result of every completed stage, exactly once, before any
/// subsequent stage runs
#[async_trait]
pub trait JobCallback: Send + Sync {
    async fn update(
        &self,
        namespace: &str,
        objid: &str,
        new_status: &str,
        release: bool,
        failed: bool,
    ) -> Result<()>;
}

/// Callback that checkpoints into the feed_queue table
pub struct QueueCallback {
    pool: sqlx::SqlitePool,
}

impl QueueCallback {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobCallback for QueueCallback {
    async fn update(
        &self,
        namespace: &str,
        objid: &str,
        new_status: &str,
        release: bool,
        failed: bool,
    ) -> Result<()> {
        db::update_queue(&self.pool, namespace, objid, new_status, failed, release).await
    }
}

/// One volume at one status
#[derive(Debug, Clone)]
pub struct Job {
    pub namespace: String,
    pub objid: String,
    pub pkg_type: String,
    pub status: String,
    pub failure_count: u32,
}

impl Job {
    pub fn new(
        namespace: impl Into<String>,
        objid: impl Into<String>,
        pkg_type: impl Into<String>,
        status: impl Into<String>,
        failure_count: u32,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            objid: objid.into(),
            pkg_type: pkg_type.into(),
            status: status.into(),
            failure_count,
        }
    }

    /// The stage identifier the package type maps to this job's status
    pub fn stage_id(&self, engine: &Engine) -> Option<String> {
        engine
            .packagetype(&self.pkg_type)
            .ok()
            .and_then(|pt| pt.stage_map.get(&self.status).cloned())
    }

    /// A job is runnable iff its status maps to a stage
    pub fn runnable(&self, engine: &Engine) -> bool {
        self.stage_id(engine).is_some()
    }
}

/// Result of running one job
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub new_status: String,
    pub release: bool,
    pub failed: bool,
}

pub struct Runner {
    engine: Arc<Engine>,
    callback: Arc<dyn JobCallback>,
}

impl Runner {
    pub fn new(engine: Arc<Engine>, callback: Arc<dyn JobCallback>) -> Self {
        Self { engine, callback }
    }

    /// Run a single job: execute its stage, run cleanup hooks, compute the
    /// new status from the stage's declared transitions, and fire the
    /// callback.
    pub async fn run_job(&self, job: &Job) -> Result<JobOutcome> {
        let stage_id = job.stage_id(&self.engine).ok_or_else(|| {
            IngestError::config(format!(
                "no stage mapped for status '{}' of {}",
                job.status, job.pkg_type
            ))
        })?;
        let stage = self.engine.stage(&stage_id)?;
        let stage_info = stage.stage_info();

        let mut volume = Volume::new(
            self.engine.clone(),
            &job.namespace,
            &job.pkg_type,
            &job.objid,
        )?;

        info!(
            namespace = %job.namespace,
            objid = %job.objid,
            stage = %stage_id,
            status = %job.status,
            "running stage"
        );

        let result = stage.run(&mut volume).await;
        let failed = result.is_err();

        if let Err(ref stage_error) = result {
            warn!(
                namespace = %job.namespace,
                objid = %job.objid,
                stage = %stage_id,
                error = %stage_error,
                "stage failed"
            );
            db::journal_error(
                self.engine.pool(),
                &job.namespace,
                &job.objid,
                &stage_id,
                stage_error,
            )
            .await?;
        }

        // cleanup hooks never mask the stage result
        if let Err(cleanup_error) = stage.clean_always(&mut volume).await {
            warn!(stage = %stage_id, error = %cleanup_error, "clean_always failed");
        }
        let followup = if failed {
            stage.clean_failure(&mut volume).await
        } else {
            stage.clean_success(&mut volume).await
        };
        if let Err(cleanup_error) = followup {
            warn!(stage = %stage_id, error = %cleanup_error, "cleanup hook failed");
        }

        let max_failures = self.engine.config().daemon.max_failures;
        let new_status = if failed {
            if job.failure_count + 1 >= max_failures {
                status::PUNTED.to_string()
            } else {
                stage_info.failure_state.to_string()
            }
        } else {
            stage_info.success_state.to_string()
        };
        let release = self.engine.is_release_state(&new_status);

        self.callback
            .update(&job.namespace, &job.objid, &new_status, release, failed)
            .await?;

        Ok(JobOutcome {
            new_status,
            release,
            failed,
        })
    }

    /// Drive one volume from a starting status until it releases, fails,
    /// or runs out of mapped stages. Stages run serially; a failure ends
    /// the dispatch and leaves re-dispatch to the scheduler.
    pub async fn run_volume(
        &self,
        namespace: &str,
        objid: &str,
        pkg_type: &str,
        start_status: &str,
        mut failure_count: u32,
    ) -> Result<String> {
        let mut current = Job::new(namespace, objid, pkg_type, start_status, failure_count);

        loop {
            if !current.runnable(&self.engine) {
                return Ok(current.status);
            }

            let outcome = self.run_job(&current).await?;
            if outcome.failed {
                failure_count += 1;
            }
            if outcome.release || outcome.failed {
                return Ok(outcome.new_status);
            }

            // continuation is a new job at the new status
            current = Job::new(
                namespace,
                objid,
                pkg_type,
                outcome.new_status,
                failure_count,
            );
        }
    }

    /// One scheduler pass: claim pending queue rows and run them, at most
    /// `dataset.threads` volumes at a time.
    pub async fn run_queue(&self) -> Result<usize> {
        let release_states = self.engine.config().daemon.release_states.clone();
        let rows = db::pending_rows(self.engine.pool(), &release_states).await?;
        if rows.is_empty() {
            return Ok(0);
        }

        let node = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());
        let semaphore = Arc::new(Semaphore::new(self.engine.config().dataset.threads));
        let mut handles = Vec::new();
        let mut dispatched = 0usize;

        for row in rows {
            if !db::claim(self.engine.pool(), &row.namespace, &row.id, &node).await? {
                continue;
            }
            dispatched += 1;

            let permit = semaphore.clone().acquire_owned().await.map_err(|e| {
                IngestError::operation_failed("dispatch", e.to_string())
            })?;
            let runner = Runner {
                engine: self.engine.clone(),
                callback: self.callback.clone(),
            };

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let result = runner
                    .run_volume(
                        &row.namespace,
                        &row.id,
                        &row.pkg_type,
                        &row.status,
                        row.failure_count as u32,
                    )
                    .await;

                if let Err(ref dispatch_error) = result {
                    error!(
                        namespace = %row.namespace,
                        objid = %row.id,
                        error = %dispatch_error,
                        "dispatch failed"
                    );
                }
                let _ = db::release_claim(runner.engine.pool(), &row.namespace, &row.id).await;
                result.map(|_| ())
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }

        Ok(dispatched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeedConfig;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Callback that records every update it sees
    pub struct RecordingCallback {
        pub updates: Mutex<Vec<(String, String, String, bool, bool)>>,
    }

    #[async_trait]
    impl JobCallback for RecordingCallback {
        async fn update(
            &self,
            namespace: &str,
            objid: &str,
            new_status: &str,
            release: bool,
            failed: bool,
        ) -> Result<()> {
            self.updates.lock().expect("lock poisoned").push((
                namespace.to_string(),
                objid.to_string(),
                new_status.to_string(),
                release,
                failed,
            ));
            Ok(())
        }
    }

    async fn test_engine(root: &TempDir) -> Arc<Engine> {
        let pool = crate::db::connect("sqlite::memory:").await.unwrap();
        crate::db::init_schema(&pool).await.unwrap();
        let config = FeedConfig::rooted_at(root.path());
        Arc::new(Engine::new(config, pool).unwrap())
    }

    #[tokio::test]
    async fn test_job_runnable_depends_on_stage_map() {
        let root = TempDir::new().unwrap();
        let engine = test_engine(&root).await;

        let job = Job::new("test", "obj1", "simple", "ready", 0);
        assert!(job.runnable(&engine));
        assert_eq!(job.stage_id(&engine).as_deref(), Some("unpack"));

        // release states have no mapped stage
        let job = Job::new("test", "obj1", "simple", "collated", 0);
        assert!(!job.runnable(&engine));
        let job = Job::new("test", "obj1", "simple", "no_such_status", 0);
        assert!(!job.runnable(&engine));
    }

    #[tokio::test]
    async fn test_failed_stage_reports_failure_state_and_journals() {
        let root = TempDir::new().unwrap();
        let engine = test_engine(&root).await;
        let callback = Arc::new(RecordingCallback {
            updates: Mutex::new(Vec::new()),
        });
        let runner = Runner::new(engine.clone(), callback.clone());

        // no SIP staged: unpack fails, failure_state is ready
        let job = Job::new("test", "obj1", "simple", "ready", 0);
        let outcome = runner.run_job(&job).await.unwrap();
        assert!(outcome.failed);
        assert_eq!(outcome.new_status, "ready");
        assert!(!outcome.release);

        let updates = callback.updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].2, "ready");
        assert!(updates[0].4);

        let journal: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM errors")
            .fetch_one(engine.pool())
            .await
            .unwrap();
        assert_eq!(journal, 1);
    }

    #[tokio::test]
    async fn test_repeated_failures_punt() {
        let root = TempDir::new().unwrap();
        let engine = test_engine(&root).await;
        let callback = Arc::new(RecordingCallback {
            updates: Mutex::new(Vec::new()),
        });
        let runner = Runner::new(engine.clone(), callback.clone());

        // failure_count at the threshold: this failure releases as punted
        let max = engine.config().daemon.max_failures;
        let job = Job::new("test", "obj1", "simple", "ready", max - 1);
        let outcome = runner.run_job(&job).await.unwrap();
        assert!(outcome.failed);
        assert_eq!(outcome.new_status, "punted");
        assert!(outcome.release);
    }
}
