//
// Copyright 2025 Tabs Data Inc.
//

//! The warm process pool. A worker is a child process pinned to one
//! `(function, version)` pair; the pool amortizes environment preparation across
//! invocations by keeping idle workers around until their TTL expires.
//!
//! Worker states: SPAWNING -> IDLE -> LEASED -> IDLE -> ... until the worker is
//! drained (TTL, stale version) or evicted (crash, protocol violation). Idle
//! sweeping happens lazily on lease and release; there is no background thread.

use crate::resolver::WorkerLauncher;
use mb_common::id::{self, Id};
use mb_error::{MbError, mb_error};
use mb_objects::types::function::FunctionVersion;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Notify;
use tokio::time::sleep_until;
use tracing::{debug, warn};

/// Upper bound on retained worker stderr, per worker.
const STDERR_TAIL_BYTES: usize = 64 * 1024;

#[mb_error]
pub enum PoolError {
    #[error("Timed out waiting for a worker of function '{0}'")]
    LeaseTimeout(String) = 6000,
    #[error("Cannot spawn worker for function '{0}': {1}")]
    SpawnFailed(String, #[source] std::io::Error) = 7000,
}

/// How a lease ended, as reported by the caller on release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The invocation completed over an intact protocol stream.
    Ok,
    /// The worker violated the protocol; it is evicted.
    ProtocolError,
    /// The worker crashed or was killed; it is evicted.
    Crashed,
}

/// Pool sizing knobs, sourced from runtime settings.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Idle workers kept per `(function, version)` partition.
    pub pool_size: usize,
    /// TTL of an idle worker.
    pub cold_start_ttl: Duration,
    /// Global cap on live workers, idle and leased together.
    pub spawn_cap: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 2,
            cold_start_ttl: Duration::from_secs(300),
            spawn_cap: 16,
        }
    }
}

/// A live worker process, exclusively held by its lessee.
#[derive(Debug)]
pub struct Worker {
    id: Id,
    function_name: String,
    version_id: Id,
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    stderr: Arc<Mutex<String>>,
    idle_since: Instant,
}

impl Worker {
    pub fn id(&self) -> Id {
        self.id
    }

    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    pub fn version_id(&self) -> Id {
        self.version_id
    }

    /// The protocol streams of this worker.
    pub fn io(&mut self) -> (&mut ChildStdin, &mut BufReader<ChildStdout>) {
        (&mut self.stdin, &mut self.stdout)
    }

    /// Tail of everything the worker wrote to stderr, attached to failed calls
    /// as diagnostics.
    pub fn stderr_tail(&self) -> String {
        self.stderr.lock().unwrap().clone()
    }

    fn alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    fn kill(self) {
        let mut child = self.child;
        let _ = child.start_kill();
        // reap the process off the hot path
        tokio::spawn(async move {
            let _ = child.wait().await;
        });
    }
}

struct LeasedMeta {
    function_name: String,
    version_id: Id,
    stale: bool,
}

#[derive(Default)]
struct PoolState {
    /// Idle workers per function. Version pinning is on the worker itself.
    idle: HashMap<String, Vec<Worker>>,
    /// Metadata of leased workers, keyed by worker id.
    leased: HashMap<Id, LeasedMeta>,
    /// Live workers, idle and leased together.
    live: usize,
}

/// The process pool. Partitioned by `(function, version)`; no lock is held
/// across worker I/O or process spawning.
pub struct ProcessPool {
    config: PoolConfig,
    launcher: Box<dyn WorkerLauncher>,
    state: Mutex<PoolState>,
    freed: Notify,
}

impl ProcessPool {
    pub fn new(config: PoolConfig, launcher: Box<dyn WorkerLauncher>) -> Self {
        Self {
            config,
            launcher,
            state: Mutex::new(PoolState::default()),
            freed: Notify::new(),
        }
    }

    /// Leases a worker pinned to the given version, blocking up to `deadline`.
    ///
    /// An idle worker of the version is reused when available; otherwise a new
    /// one is spawned unless the global spawn cap is reached, in which case the
    /// call waits for a slot to free.
    pub async fn lease(
        &self,
        version: &FunctionVersion,
        deadline: Instant,
    ) -> Result<Worker, MbError> {
        loop {
            let must_spawn = {
                let mut state = self.state.lock().unwrap();
                self.sweep_idle(&mut state);

                if let Some(workers) = state.idle.get_mut(version.function_name()) {
                    if let Some(pos) = workers
                        .iter()
                        .position(|w| w.version_id() == version.id())
                    {
                        let worker = workers.remove(pos);
                        state.leased.insert(
                            worker.id(),
                            LeasedMeta {
                                function_name: worker.function_name.clone(),
                                version_id: worker.version_id,
                                stale: false,
                            },
                        );
                        debug!(
                            "Leased warm worker {} for '{}'",
                            worker.id(),
                            version.function_name()
                        );
                        return Ok(worker);
                    }
                }

                if state.live < self.config.spawn_cap {
                    // reserve the slot before the lock is dropped
                    state.live += 1;
                    true
                } else {
                    false
                }
            };

            if must_spawn {
                match self.spawn(version).await {
                    Ok(worker) => {
                        let mut state = self.state.lock().unwrap();
                        state.leased.insert(
                            worker.id(),
                            LeasedMeta {
                                function_name: worker.function_name.clone(),
                                version_id: worker.version_id,
                                stale: false,
                            },
                        );
                        return Ok(worker);
                    }
                    Err(err) => {
                        let mut state = self.state.lock().unwrap();
                        state.live -= 1;
                        drop(state);
                        self.freed.notify_waiters();
                        return Err(err);
                    }
                }
            }

            tokio::select! {
                _ = self.freed.notified() => {}
                _ = sleep_until(deadline.into()) => {
                    Err(PoolError::LeaseTimeout(version.function_name().clone()))?;
                }
            }
        }
    }

    /// Returns a worker after an invocation. `Ok` outcomes put the worker back
    /// into its idle partition when it is alive, current and under the partition
    /// cap; everything else evicts it.
    pub fn release(&self, mut worker: Worker, outcome: ReleaseOutcome) {
        let mut state = self.state.lock().unwrap();
        let stale = state
            .leased
            .remove(&worker.id())
            .map(|meta| meta.stale)
            .unwrap_or(false);

        let idle_in_partition = state
            .idle
            .get(worker.function_name())
            .map(|workers| workers.len())
            .unwrap_or(0);

        let retain = outcome == ReleaseOutcome::Ok
            && !stale
            && idle_in_partition < self.config.pool_size
            && worker.alive();

        if retain {
            worker.idle_since = Instant::now();
            debug!("Worker {} back to idle", worker.id());
            state
                .idle
                .entry(worker.function_name.clone())
                .or_default()
                .push(worker);
        } else {
            debug!("Evicting worker {} ({:?})", worker.id(), outcome);
            state.live -= 1;
            worker.kill();
        }
        drop(state);
        self.freed.notify_waiters();
    }

    /// Drains workers of versions older than the active one: idle workers exit
    /// now, leased workers are marked and evicted on release.
    pub fn drain_stale(&self, function_name: &str, active_version: Id) {
        let mut state = self.state.lock().unwrap();
        if let Some(workers) = state.idle.get_mut(function_name) {
            let mut kept = Vec::with_capacity(workers.len());
            let mut evicted = 0usize;
            for worker in workers.drain(..) {
                if worker.version_id() == active_version {
                    kept.push(worker);
                } else {
                    debug!("Draining stale worker {} of '{}'", worker.id(), function_name);
                    worker.kill();
                    evicted += 1;
                }
            }
            *workers = kept;
            state.live -= evicted;
        }
        for meta in state.leased.values_mut() {
            if meta.function_name == function_name && meta.version_id != active_version {
                meta.stale = true;
            }
        }
        drop(state);
        self.freed.notify_waiters();
    }

    /// Live workers, idle and leased together.
    pub fn live_count(&self) -> usize {
        self.state.lock().unwrap().live
    }

    /// Idle workers of a function.
    pub fn idle_count(&self, function_name: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .idle
            .get(function_name)
            .map(|workers| workers.len())
            .unwrap_or(0)
    }

    fn sweep_idle(&self, state: &mut PoolState) {
        let ttl = self.config.cold_start_ttl;
        for workers in state.idle.values_mut() {
            let mut kept = Vec::with_capacity(workers.len());
            for mut worker in workers.drain(..) {
                if worker.idle_since.elapsed() > ttl || !worker.alive() {
                    debug!("Idle worker {} expired", worker.id());
                    worker.kill();
                    state.live -= 1;
                } else {
                    kept.push(worker);
                }
            }
            *workers = kept;
        }
    }

    async fn spawn(&self, version: &FunctionVersion) -> Result<Worker, MbError> {
        let mut command = self.launcher.launch(version).await?;
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = command
            .spawn()
            .map_err(|err| PoolError::SpawnFailed(version.function_name().clone(), err))?;

        let stdin = child.stdin.take().expect("worker stdin is piped");
        let stdout = BufReader::new(child.stdout.take().expect("worker stdout is piped"));
        let stderr_pipe = child.stderr.take().expect("worker stderr is piped");

        let stderr = Arc::new(Mutex::new(String::new()));
        let stderr_sink = Arc::clone(&stderr);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr_pipe).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let mut tail = stderr_sink.lock().unwrap();
                if tail.len() + line.len() + 1 > STDERR_TAIL_BYTES {
                    let excess = tail.len() + line.len() + 1 - STDERR_TAIL_BYTES;
                    let cut = tail
                        .char_indices()
                        .map(|(i, _)| i)
                        .find(|i| *i >= excess)
                        .unwrap_or(tail.len());
                    tail.drain(..cut);
                }
                tail.push_str(&line);
                tail.push('\n');
            }
        });

        let worker = Worker {
            id: id::id(),
            function_name: version.function_name().clone(),
            version_id: version.id(),
            child,
            stdin,
            stdout,
            stderr,
            idle_since: Instant::now(),
        };
        debug!(
            "Spawned worker {} for '{}' version {}",
            worker.id(),
            worker.function_name(),
            worker.version_id()
        );
        Ok(worker)
    }
}

impl Drop for ProcessPool {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap();
        for (_, workers) in state.idle.drain() {
            for worker in workers {
                warn!("Killing idle worker {} on pool shutdown", worker.id());
                worker.kill();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mb_common::time::UniqueUtc;
    use tokio::process::Command;

    /// Launches inert processes; pool tests exercise lifecycle, not the protocol.
    struct SleeperLauncher;

    #[async_trait]
    impl WorkerLauncher for SleeperLauncher {
        async fn launch(&self, _version: &FunctionVersion) -> Result<Command, MbError> {
            let mut command = Command::new("sleep");
            command.arg("300");
            Ok(command)
        }
    }

    fn version(function: &str) -> FunctionVersion {
        FunctionVersion::new(
            id::id(),
            function.to_string(),
            "hash".to_string(),
            "def main(input):\n    pass\n".to_string(),
            vec![],
            id::id(),
            UniqueUtc::now_millis(),
            String::new(),
        )
    }

    fn pool(config: PoolConfig) -> ProcessPool {
        ProcessPool::new(config, Box::new(SleeperLauncher))
    }

    fn deadline_in(millis: u64) -> Instant {
        Instant::now() + Duration::from_millis(millis)
    }

    #[tokio::test]
    async fn test_release_ok_returns_worker_to_idle() {
        let pool = pool(PoolConfig::default());
        let version = version("f");

        let worker = pool.lease(&version, deadline_in(1000)).await.unwrap();
        let first_id = worker.id();
        pool.release(worker, ReleaseOutcome::Ok);
        assert_eq!(pool.idle_count("f"), 1);

        let worker = pool.lease(&version, deadline_in(1000)).await.unwrap();
        assert_eq!(worker.id(), first_id);
        pool.release(worker, ReleaseOutcome::Ok);
    }

    #[tokio::test]
    async fn test_crashed_release_evicts() {
        let pool = pool(PoolConfig::default());
        let version = version("f");

        let worker = pool.lease(&version, deadline_in(1000)).await.unwrap();
        let first_id = worker.id();
        pool.release(worker, ReleaseOutcome::Crashed);
        assert_eq!(pool.idle_count("f"), 0);
        assert_eq!(pool.live_count(), 0);

        let worker = pool.lease(&version, deadline_in(1000)).await.unwrap();
        assert_ne!(worker.id(), first_id);
        pool.release(worker, ReleaseOutcome::Ok);
    }

    #[tokio::test]
    async fn test_spawn_cap_blocks_until_timeout() {
        let config = PoolConfig {
            spawn_cap: 1,
            ..PoolConfig::default()
        };
        let pool = pool(config);
        let version = version("f");

        let held = pool.lease(&version, deadline_in(1000)).await.unwrap();
        let err = pool.lease(&version, deadline_in(50)).await.unwrap_err();
        assert!(matches!(
            err.domain_err::<PoolError>(),
            PoolError::LeaseTimeout(_)
        ));

        pool.release(held, ReleaseOutcome::Ok);
        // the freed slot unblocks the next lease
        let worker = pool.lease(&version, deadline_in(1000)).await.unwrap();
        pool.release(worker, ReleaseOutcome::Ok);
    }

    #[tokio::test]
    async fn test_ttl_expiry_drains_idle_workers() {
        let config = PoolConfig {
            cold_start_ttl: Duration::from_millis(0),
            ..PoolConfig::default()
        };
        let pool = pool(config);
        let version = version("f");

        let worker = pool.lease(&version, deadline_in(1000)).await.unwrap();
        let first_id = worker.id();
        pool.release(worker, ReleaseOutcome::Ok);

        tokio::time::sleep(Duration::from_millis(5)).await;
        let worker = pool.lease(&version, deadline_in(1000)).await.unwrap();
        assert_ne!(worker.id(), first_id);
        pool.release(worker, ReleaseOutcome::Ok);
    }

    #[tokio::test]
    async fn test_pool_size_caps_idle_partition() {
        let config = PoolConfig {
            pool_size: 1,
            ..PoolConfig::default()
        };
        let pool = pool(config);
        let version = version("f");

        let a = pool.lease(&version, deadline_in(1000)).await.unwrap();
        let b = pool.lease(&version, deadline_in(1000)).await.unwrap();
        pool.release(a, ReleaseOutcome::Ok);
        pool.release(b, ReleaseOutcome::Ok);

        // the second release exceeded the partition cap and was evicted
        assert_eq!(pool.idle_count("f"), 1);
        assert_eq!(pool.live_count(), 1);
    }

    #[tokio::test]
    async fn test_version_change_drains_idle_and_marks_leased() {
        let pool = pool(PoolConfig::default());
        let v1 = version("f");
        let v2 = version("f");

        let leased = pool.lease(&v1, deadline_in(1000)).await.unwrap();
        let idle = pool.lease(&v1, deadline_in(1000)).await.unwrap();
        pool.release(idle, ReleaseOutcome::Ok);
        assert_eq!(pool.idle_count("f"), 1);

        pool.drain_stale("f", v2.id());
        assert_eq!(pool.idle_count("f"), 0);

        // leased stale workers finish their invocation, then get evicted
        pool.release(leased, ReleaseOutcome::Ok);
        assert_eq!(pool.idle_count("f"), 0);
        assert_eq!(pool.live_count(), 0);
    }

    #[tokio::test]
    async fn test_lease_is_pinned_to_version() {
        let pool = pool(PoolConfig::default());
        let v1 = version("f");
        let v2 = version("f");

        let worker = pool.lease(&v1, deadline_in(1000)).await.unwrap();
        pool.release(worker, ReleaseOutcome::Ok);

        // an idle worker of v1 does not satisfy a v2 lease
        let worker = pool.lease(&v2, deadline_in(1000)).await.unwrap();
        assert_eq!(worker.version_id(), v2.id());
        pool.release(worker, ReleaseOutcome::Ok);
        assert_eq!(pool.live_count(), 2);
    }
}
