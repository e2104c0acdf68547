//
// Copyright 2025 Tabs Data Inc.
//

//! The execution engine: one invocation end-to-end. Resolve the active version,
//! authorize, reserve concurrency slots, persist the call, lease a worker,
//! exchange one protocol frame pair under a deadline and a cancellation signal,
//! and record the terminal state. Counter slots and the worker are released on
//! every path.

use crate::calls::CallStore;
use crate::counter::{CounterBackend, CounterToken};
use crate::pool::{PoolError, ProcessPool, ReleaseOutcome};
use crate::protocol::{
    self, DescribePayload, ProtocolError, WorkerRequest, WorkerStatus, check_call_id,
};
use async_trait::async_trait;
use futures::future::join_all;
use mb_common::id::{self, Id};
use mb_error::{MbError, mb_error};
use mb_objects::types::call::{CallStatus, FunctionCall, TriggerType, error_types};
use mb_objects::types::function::{AuthLevel, FunctionVersion};
use mb_registry::registry::FunctionRegistry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::time::sleep_until;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Counter key of the global execution cap.
pub const GLOBAL_COUNTER_KEY: &str = "executions";

#[mb_error]
pub enum EngineError {
    #[error("Function requires an authenticated caller")]
    AuthenticationRequired = 4000,
    #[error("Function requires an admin caller")]
    AdminRequired = 3000,
}

/// Concurrency and timeout limits, read from runtime settings on every
/// invocation so edits apply without a restart.
#[derive(Debug, Clone, Copy)]
pub struct EngineLimits {
    pub max_concurrent_executions: u64,
    pub max_concurrent_functions_per_user: u64,
    pub function_timeout: Duration,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            max_concurrent_executions: 32,
            max_concurrent_functions_per_user: 4,
            function_timeout: Duration::from_secs(30),
        }
    }
}

/// Source of [`EngineLimits`]; implemented over the runtime settings service.
#[async_trait]
pub trait LimitsSource: Send + Sync {
    async fn limits(&self) -> Result<EngineLimits, MbError>;
}

/// Fixed limits, for tests and bootstrap.
pub struct StaticLimits(pub EngineLimits);

#[async_trait]
impl LimitsSource for StaticLimits {
    async fn limits(&self) -> Result<EngineLimits, MbError> {
        Ok(self.0)
    }
}

/// Who is invoking a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caller {
    /// Unauthenticated request; only `public` functions.
    Anonymous,
    /// A logged-in user.
    User { id: Id, is_admin: bool },
    /// An application token; treated as a service principal with admin reach.
    AppToken { id: Id },
    /// The scheduler. Not subject to the per-user cap.
    System,
}

impl Caller {
    pub fn id(&self) -> Option<Id> {
        match self {
            Caller::Anonymous => None,
            Caller::User { id, .. } | Caller::AppToken { id } => Some(*id),
            Caller::System => Some(mb_common::id::system_id()),
        }
    }

    fn counter_key(&self) -> Option<String> {
        match self {
            Caller::Anonymous => Some("user:anonymous".to_string()),
            Caller::User { id, .. } => Some(format!("user:{id}")),
            Caller::AppToken { id } => Some(format!("token:{id}")),
            Caller::System => None,
        }
    }

    fn authorize(&self, required: AuthLevel) -> Result<(), EngineError> {
        match required {
            AuthLevel::Public => Ok(()),
            AuthLevel::Auth => match self {
                Caller::Anonymous => Err(EngineError::AuthenticationRequired),
                _ => Ok(()),
            },
            AuthLevel::Admin => match self {
                Caller::User { is_admin: true, .. } | Caller::AppToken { .. } | Caller::System => {
                    Ok(())
                }
                Caller::User { is_admin: false, .. } => Err(EngineError::AdminRequired),
                Caller::Anonymous => Err(EngineError::AuthenticationRequired),
            },
        }
    }
}

/// The execution engine. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct ExecutionEngine {
    calls: CallStore,
    registry: Arc<FunctionRegistry>,
    pool: Arc<ProcessPool>,
    counters: Arc<dyn CounterBackend>,
    limits: Arc<dyn LimitsSource>,
    active: Arc<Mutex<HashMap<Id, CancellationToken>>>,
}

impl ExecutionEngine {
    pub fn new(
        calls: CallStore,
        registry: Arc<FunctionRegistry>,
        pool: Arc<ProcessPool>,
        counters: Arc<dyn CounterBackend>,
        limits: Arc<dyn LimitsSource>,
    ) -> Self {
        Self {
            calls,
            registry,
            pool,
            counters,
            limits,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn calls(&self) -> &CallStore {
        &self.calls
    }

    /// Marks calls left over from a prior process as failed. Run once at start.
    pub async fn recover(&self) -> Result<u64, MbError> {
        self.calls.recover_abandoned().await
    }

    /// Runs one invocation to its terminal state and returns the terminal call.
    pub async fn invoke(
        &self,
        function_name: &str,
        input: serde_json::Value,
        caller: Caller,
        trigger: TriggerType,
    ) -> Result<FunctionCall, MbError> {
        let prepared = self.prepare(function_name, input, caller, trigger).await?;
        match prepared {
            Prepared::Refused(call) => Ok(call),
            Prepared::Admitted(admitted) => Ok(self.clone().run(admitted).await),
        }
    }

    /// Persists the PENDING call, runs the body in the background, and returns
    /// immediately. Used by the scheduler and async API invocations.
    pub async fn invoke_async(
        &self,
        function_name: &str,
        input: serde_json::Value,
        caller: Caller,
        trigger: TriggerType,
    ) -> Result<FunctionCall, MbError> {
        let prepared = self.prepare(function_name, input, caller, trigger).await?;
        match prepared {
            Prepared::Refused(call) => Ok(call),
            Prepared::Admitted(admitted) => {
                let pending = admitted.call.clone();
                let engine = self.clone();
                tokio::spawn(async move {
                    engine.run(admitted).await;
                });
                Ok(pending)
            }
        }
    }

    /// Requests cancellation of a call. Idempotent: cancelling a terminal call,
    /// or the same call twice, is a no-op.
    pub async fn cancel(&self, call_id: Id) -> Result<FunctionCall, MbError> {
        let token = self.active.lock().unwrap().get(&call_id).cloned();
        match token {
            Some(token) => {
                info!("Cancelling call {}", call_id);
                token.cancel();
            }
            None => {
                let call = self.calls.get(call_id).await?;
                if !call.status().is_terminal() {
                    // the owning process is gone; flip the flag directly
                    self.calls
                        .finish(
                            call_id,
                            CallStatus::Cancelled,
                            None,
                            Some(error_types::CANCELLED),
                            Some("cancelled before execution"),
                        )
                        .await?;
                }
            }
        }
        self.calls.get(call_id).await
    }

    /// Asks a warm worker of the active version to describe the function and
    /// stores the metadata on its definition.
    pub async fn describe(&self, function_name: &str) -> Result<DescribePayload, MbError> {
        let version = self.registry.active_version(function_name).await?;
        let limits = self.limits.limits().await?;
        let deadline = Instant::now() + limits.function_timeout;

        self.pool.drain_stale(function_name, version.id());
        let mut worker = self.pool.lease(&version, deadline).await?;
        let (stdin, stdout) = worker.io();
        let result: Result<DescribePayload, ProtocolError> = async {
            protocol::write_frame(stdin, &WorkerRequest::Describe).await?;
            let response = protocol::read_frame(stdout).await?;
            response.describe.ok_or(ProtocolError::Eof)
        }
        .await;

        match result {
            Ok(describe) => {
                self.pool.release(worker, ReleaseOutcome::Ok);
                self.registry
                    .update_def_metadata(
                        function_name,
                        &describe.description,
                        describe.auth,
                        &describe.tags,
                    )
                    .await?;
                Ok(describe)
            }
            Err(err) => {
                self.pool.release(worker, ReleaseOutcome::ProtocolError);
                Err(err)?
            }
        }
    }

    // -------------------------------------------------------------- invocation

    async fn prepare(
        &self,
        function_name: &str,
        input: serde_json::Value,
        caller: Caller,
        trigger: TriggerType,
    ) -> Result<Prepared, MbError> {
        let def = self.registry.get_def(function_name).await?;
        let version = self.registry.active_version(function_name).await?;
        caller.authorize(def.auth_level())?;

        let limits = self.limits.limits().await?;
        // slots outlive the deadline a bit so a hung release cannot wedge a cap
        let slot_ttl = chrono::Duration::milliseconds(
            limits.function_timeout.as_millis() as i64 + 60_000,
        );

        let mut tokens: Vec<CounterToken> = Vec::with_capacity(2);
        if let Some(user_key) = caller.counter_key() {
            match self
                .counters
                .try_acquire(
                    &user_key,
                    limits.max_concurrent_functions_per_user,
                    slot_ttl,
                )
                .await?
            {
                Some(token) => tokens.push(token),
                None => {
                    let call = self
                        .record_rate_limited(function_name, &version, input, caller, trigger)
                        .await?;
                    return Ok(Prepared::Refused(call));
                }
            }
        }
        match self
            .counters
            .try_acquire(
                GLOBAL_COUNTER_KEY,
                limits.max_concurrent_executions,
                slot_ttl,
            )
            .await?
        {
            Some(token) => tokens.push(token),
            None => {
                self.release_tokens(&tokens).await;
                let call = self
                    .record_rate_limited(function_name, &version, input, caller, trigger)
                    .await?;
                return Ok(Prepared::Refused(call));
            }
        }

        let call = FunctionCall::pending(
            id::id(),
            function_name.to_string(),
            Some(version.id()),
            trigger,
            caller.id(),
            input.clone(),
            mb_common::time::UniqueUtc::now_millis(),
        );
        self.calls.insert(&call).await?;

        let cancel = CancellationToken::new();
        self.active.lock().unwrap().insert(call.id(), cancel.clone());

        Ok(Prepared::Admitted(Admitted {
            call,
            version,
            input,
            tokens,
            cancel,
            timeout: limits.function_timeout,
        }))
    }

    async fn record_rate_limited(
        &self,
        function_name: &str,
        version: &FunctionVersion,
        input: serde_json::Value,
        caller: Caller,
        trigger: TriggerType,
    ) -> Result<FunctionCall, MbError> {
        debug!("Rate limited invocation of '{}'", function_name);
        let call = FunctionCall::pending(
            id::id(),
            function_name.to_string(),
            Some(version.id()),
            trigger,
            caller.id(),
            input,
            mb_common::time::UniqueUtc::now_millis(),
        );
        self.calls.insert(&call).await?;
        self.calls
            .finish(
                call.id(),
                CallStatus::Failed,
                None,
                Some(error_types::RATE_LIMITED),
                Some("concurrency limit reached"),
            )
            .await
    }

    /// The invocation body. Infallible from the caller's point of view: every
    /// failure is recorded on the call row.
    async fn run(self, admitted: Admitted) -> FunctionCall {
        let call_id = admitted.call.id();
        let outcome = self.run_inner(&admitted).await;
        self.active.lock().unwrap().remove(&call_id);
        self.release_tokens(&admitted.tokens).await;
        match outcome {
            Ok(call) => call,
            Err(err) => {
                warn!("Call {} failed internally: {}", call_id, err);
                self.calls
                    .finish(
                        call_id,
                        CallStatus::Failed,
                        None,
                        Some("internal_error"),
                        Some(&err.to_string()),
                    )
                    .await
                    .unwrap_or(admitted.call)
            }
        }
    }

    async fn run_inner(&self, admitted: &Admitted) -> Result<FunctionCall, MbError> {
        let call_id = admitted.call.id();
        let version = &admitted.version;
        let function_name = version.function_name();
        let deadline = Instant::now() + admitted.timeout;

        // newer published versions retire older workers before we lease
        self.pool.drain_stale(function_name, version.id());

        let mut worker = tokio::select! {
            leased = self.pool.lease(version, deadline) => {
                match leased {
                    Ok(worker) => worker,
                    Err(err) if err.is_domain_err::<PoolError>()
                        && matches!(err.domain_err::<PoolError>(), PoolError::LeaseTimeout(_)) =>
                    {
                        return self
                            .calls
                            .finish(
                                call_id,
                                CallStatus::TimedOut,
                                None,
                                Some(error_types::TIMEOUT),
                                Some("timed out waiting for a worker"),
                            )
                            .await;
                    }
                    Err(err) => return Err(err),
                }
            }
            _ = admitted.cancel.cancelled() => {
                return self
                    .calls
                    .finish(
                        call_id,
                        CallStatus::Cancelled,
                        None,
                        Some(error_types::CANCELLED),
                        Some("cancelled while waiting for a worker"),
                    )
                    .await;
            }
        };

        if let Err(err) = self.calls.mark_running(call_id).await {
            self.pool.release(worker, ReleaseOutcome::Ok);
            return Err(err);
        }

        let (stdin, stdout) = worker.io();
        let request = WorkerRequest::Invoke {
            call_id,
            input: admitted.input.clone(),
        };
        if let Err(err) = protocol::write_frame(stdin, &request).await {
            let call = self
                .calls
                .finish(
                    call_id,
                    CallStatus::Failed,
                    None,
                    Some(error_types::PROTOCOL_ERROR),
                    Some(&err.to_string()),
                )
                .await;
            self.pool.release(worker, ReleaseOutcome::ProtocolError);
            return call;
        }

        let outcome = tokio::select! {
            response = protocol::read_frame(stdout) => WaitOutcome::Response(response),
            _ = sleep_until(deadline.into()) => WaitOutcome::Timeout,
            _ = admitted.cancel.cancelled() => WaitOutcome::Cancelled,
        };

        match outcome {
            WaitOutcome::Timeout => {
                debug!("Call {} timed out", call_id);
                let call = self
                    .calls
                    .finish(
                        call_id,
                        CallStatus::TimedOut,
                        None,
                        Some(error_types::TIMEOUT),
                        Some("function execution timed out"),
                    )
                    .await;
                self.pool.release(worker, ReleaseOutcome::Crashed);
                call
            }
            WaitOutcome::Cancelled => {
                debug!("Call {} cancelled", call_id);
                let call = self
                    .calls
                    .finish(
                        call_id,
                        CallStatus::Cancelled,
                        None,
                        Some(error_types::CANCELLED),
                        Some("cancelled by request"),
                    )
                    .await;
                self.pool.release(worker, ReleaseOutcome::Crashed);
                call
            }
            WaitOutcome::Response(Err(ProtocolError::Eof)) => {
                let tail = worker.stderr_tail();
                let message = if tail.is_empty() {
                    "worker exited before responding".to_string()
                } else {
                    format!("worker exited before responding; stderr tail:\n{tail}")
                };
                let call = self
                    .calls
                    .finish(
                        call_id,
                        CallStatus::Failed,
                        None,
                        Some(error_types::CRASHED),
                        Some(&message),
                    )
                    .await;
                self.pool.release(worker, ReleaseOutcome::Crashed);
                call
            }
            WaitOutcome::Response(Err(err)) => {
                let call = self
                    .calls
                    .finish(
                        call_id,
                        CallStatus::Failed,
                        None,
                        Some(error_types::PROTOCOL_ERROR),
                        Some(&err.to_string()),
                    )
                    .await;
                self.pool.release(worker, ReleaseOutcome::ProtocolError);
                call
            }
            WaitOutcome::Response(Ok(response)) => {
                if let Err(err) = check_call_id(&response, call_id) {
                    let call = self
                        .calls
                        .finish(
                            call_id,
                            CallStatus::Failed,
                            None,
                            Some(error_types::PROTOCOL_ERROR),
                            Some(&err.to_string()),
                        )
                        .await;
                    self.pool.release(worker, ReleaseOutcome::ProtocolError);
                    return call;
                }
                let call = match response.status {
                    WorkerStatus::Ok => {
                        self.calls
                            .finish(call_id, CallStatus::Succeeded, response.output, None, None)
                            .await
                    }
                    WorkerStatus::Error => {
                        self.calls
                            .finish(
                                call_id,
                                CallStatus::Failed,
                                None,
                                response.error_type.as_deref().or(Some("error")),
                                response.error_message.as_deref(),
                            )
                            .await
                    }
                };
                self.pool.release(worker, ReleaseOutcome::Ok);
                call
            }
        }
    }

    async fn release_tokens(&self, tokens: &[CounterToken]) {
        let releases = tokens.iter().map(|token| self.counters.release(token));
        for result in join_all(releases).await {
            // double release is reported and deliberately ignored
            if let Err(err) = result {
                debug!("Counter release: {}", err);
            }
        }
    }
}

enum Prepared {
    /// The invocation was refused at admission; the call row is terminal.
    Refused(FunctionCall),
    Admitted(Admitted),
}

struct Admitted {
    call: FunctionCall,
    version: FunctionVersion,
    input: serde_json::Value,
    tokens: Vec<CounterToken>,
    cancel: CancellationToken,
    timeout: Duration,
}

enum WaitOutcome {
    Response(Result<protocol::WorkerResponse, ProtocolError>),
    Timeout,
    Cancelled,
}

#[cfg(test)]
mod tests;
