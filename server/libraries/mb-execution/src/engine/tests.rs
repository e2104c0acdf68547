//
// Copyright 2025 Tabs Data Inc.
//

use super::*;
use crate::counter::MemoryCounterBackend;
use crate::pool::PoolConfig;
use crate::resolver::{RUNNER_SOURCE, WorkerLauncher};
use mb_objects::types::call::JsonPayload;
use serde_json::json;
use std::path::PathBuf;
use testdir::testdir;
use tokio::process::Command;

/// Runs the real runner shim on the system Python, staging each version's
/// source as its script. No environment preparation involved.
struct SystemPythonLauncher {
    dir: PathBuf,
}

impl SystemPythonLauncher {
    fn new(dir: PathBuf) -> Self {
        std::fs::write(dir.join("runner.py"), RUNNER_SOURCE).unwrap();
        Self { dir }
    }
}

#[async_trait]
impl WorkerLauncher for SystemPythonLauncher {
    async fn launch(&self, version: &FunctionVersion) -> Result<Command, MbError> {
        let script = self
            .dir
            .join(format!("{}-{}.py", version.function_name(), version.id()));
        if !script.exists() {
            std::fs::write(&script, version.source_text()).unwrap();
        }
        let mut command = Command::new("python3");
        command.arg(self.dir.join("runner.py")).arg(script);
        Ok(command)
    }
}

fn python3_available() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

struct Fixture {
    engine: ExecutionEngine,
    registry: Arc<FunctionRegistry>,
    pool: Arc<ProcessPool>,
    counters: Arc<MemoryCounterBackend>,
}

async fn fixture(limits: EngineLimits) -> Fixture {
    let dir = testdir!();
    let db = mb_database::test_utils::db().await.unwrap();
    let registry = Arc::new(FunctionRegistry::new(db.clone(), dir.join("functions")));
    let pool = Arc::new(ProcessPool::new(
        PoolConfig::default(),
        Box::new(SystemPythonLauncher::new(dir)),
    ));
    let counters = Arc::new(MemoryCounterBackend::new());
    let engine = ExecutionEngine::new(
        CallStore::new(db),
        Arc::clone(&registry),
        Arc::clone(&pool),
        counters.clone(),
        Arc::new(StaticLimits(limits)),
    );
    Fixture {
        engine,
        registry,
        pool,
        counters,
    }
}

fn user() -> Caller {
    Caller::User {
        id: id::id(),
        is_admin: true,
    }
}

const ECHO: &str = "def main(input):\n    return {\"doubled\": input[\"n\"] * 2}\n";
const FAILING: &str = "def main(input):\n    raise ValueError(\"nope\")\n";
const SLEEPER: &str = "import time\n\ndef main(input):\n    time.sleep(30)\n    return None\n";
const EXITING: &str = "import os\n\ndef main(input):\n    os._exit(1)\n";

#[tokio::test]
async fn test_invoke_unknown_function() {
    let fixture = fixture(EngineLimits::default()).await;
    let err = fixture
        .engine
        .invoke("ghost", json!({}), user(), TriggerType::Manual)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Function not found"));
}

#[tokio::test]
async fn test_authorization_levels() {
    let fixture = fixture(EngineLimits::default()).await;
    fixture
        .registry
        .put_version("f", ECHO, "", id::id())
        .await
        .unwrap();

    // default auth level is admin
    let err = fixture
        .engine
        .invoke("f", json!({}), Caller::Anonymous, TriggerType::Api)
        .await
        .unwrap_err();
    assert!(matches!(
        err.domain_err::<EngineError>(),
        EngineError::AuthenticationRequired
    ));

    let err = fixture
        .engine
        .invoke(
            "f",
            json!({}),
            Caller::User {
                id: id::id(),
                is_admin: false,
            },
            TriggerType::Api,
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err.domain_err::<EngineError>(),
        EngineError::AdminRequired
    ));
}

#[tokio::test]
async fn test_per_user_cap_records_failed_call_without_pending_leftover() {
    let limits = EngineLimits {
        max_concurrent_functions_per_user: 0,
        ..EngineLimits::default()
    };
    let fixture = fixture(limits).await;
    fixture
        .registry
        .put_version("f", ECHO, "", id::id())
        .await
        .unwrap();

    let caller = user();
    let call = fixture
        .engine
        .invoke("f", json!({"n": 1}), caller, TriggerType::Manual)
        .await
        .unwrap();
    assert_eq!(call.status(), CallStatus::Failed);
    assert_eq!(call.error_type().as_deref(), Some(error_types::RATE_LIMITED));

    // no PENDING left behind, no global slot leaked, no worker leased
    let (calls, total) = fixture
        .engine
        .calls()
        .list(&Default::default(), 10, 0)
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert!(calls.iter().all(|c| c.status().is_terminal()));
    assert_eq!(fixture.counters.count(GLOBAL_COUNTER_KEY).await.unwrap(), 0);
    assert_eq!(fixture.pool.live_count(), 0);
}

#[tokio::test]
async fn test_global_cap_releases_user_slot() {
    let limits = EngineLimits {
        max_concurrent_executions: 0,
        ..EngineLimits::default()
    };
    let fixture = fixture(limits).await;
    fixture
        .registry
        .put_version("f", ECHO, "", id::id())
        .await
        .unwrap();

    let caller = user();
    let call = fixture
        .engine
        .invoke("f", json!({}), caller, TriggerType::Manual)
        .await
        .unwrap();
    assert_eq!(call.status(), CallStatus::Failed);
    assert_eq!(call.error_type().as_deref(), Some(error_types::RATE_LIMITED));

    // the user slot reserved before the refused global slot was rolled back
    let key = format!("user:{}", caller.id().unwrap());
    assert_eq!(fixture.counters.count(&key).await.unwrap(), 0);
}

#[tokio::test]
async fn test_recover_marks_stale_calls_abandoned() {
    let fixture = fixture(EngineLimits::default()).await;
    let call = FunctionCall::pending(
        id::id(),
        "f".to_string(),
        None,
        TriggerType::Manual,
        None,
        json!({}),
        mb_common::time::UniqueUtc::now_millis(),
    );
    fixture.engine.calls().insert(&call).await.unwrap();

    let recovered = fixture.engine.recover().await.unwrap();
    assert_eq!(recovered, 1);
    let call = fixture.engine.calls().get(call.id()).await.unwrap();
    assert_eq!(call.status(), CallStatus::Failed);
    assert_eq!(call.error_type().as_deref(), Some(error_types::ABANDONED));
}

#[tokio::test]
async fn test_cancel_is_idempotent_on_terminal_calls() {
    let fixture = fixture(EngineLimits::default()).await;
    let call = FunctionCall::pending(
        id::id(),
        "f".to_string(),
        None,
        TriggerType::Manual,
        None,
        json!({}),
        mb_common::time::UniqueUtc::now_millis(),
    );
    fixture.engine.calls().insert(&call).await.unwrap();

    let cancelled = fixture.engine.cancel(call.id()).await.unwrap();
    assert_eq!(cancelled.status(), CallStatus::Cancelled);

    // terminal states never change
    let again = fixture.engine.cancel(call.id()).await.unwrap();
    assert_eq!(again.status(), CallStatus::Cancelled);
    assert_eq!(again.ended_at(), cancelled.ended_at());
}

#[tokio::test]
async fn test_invoke_success_roundtrip() {
    if !python3_available() {
        eprintln!("python3 not available, skipping");
        return;
    }
    let fixture = fixture(EngineLimits::default()).await;
    fixture
        .registry
        .put_version("doubler", ECHO, "", id::id())
        .await
        .unwrap();

    let call = fixture
        .engine
        .invoke("doubler", json!({"n": 21}), user(), TriggerType::Manual)
        .await
        .unwrap();
    assert_eq!(call.status(), CallStatus::Succeeded);
    assert_eq!(
        call.output(),
        &Some(JsonPayload(json!({"doubled": 42})))
    );
    assert!(call.duration_ms().is_some());
    assert!(call.started_at().is_some());
    assert!(call.ended_at().is_some());

    // the worker is warm for the next invocation
    assert_eq!(fixture.pool.idle_count("doubler"), 1);
    let again = fixture
        .engine
        .invoke("doubler", json!({"n": 2}), user(), TriggerType::Manual)
        .await
        .unwrap();
    assert_eq!(again.status(), CallStatus::Succeeded);

    // all slots were released
    assert_eq!(fixture.counters.count(GLOBAL_COUNTER_KEY).await.unwrap(), 0);
}

#[tokio::test]
async fn test_user_code_error_keeps_worker() {
    if !python3_available() {
        eprintln!("python3 not available, skipping");
        return;
    }
    let fixture = fixture(EngineLimits::default()).await;
    fixture
        .registry
        .put_version("failing", FAILING, "", id::id())
        .await
        .unwrap();

    let call = fixture
        .engine
        .invoke("failing", json!({}), user(), TriggerType::Manual)
        .await
        .unwrap();
    assert_eq!(call.status(), CallStatus::Failed);
    assert_eq!(call.error_type().as_deref(), Some("ValueError"));
    assert_eq!(call.error_message().as_deref(), Some("nope"));

    // user-code errors do not terminate the worker
    assert_eq!(fixture.pool.idle_count("failing"), 1);
}

#[tokio::test]
async fn test_timeout_evicts_worker() {
    if !python3_available() {
        eprintln!("python3 not available, skipping");
        return;
    }
    let limits = EngineLimits {
        function_timeout: Duration::from_secs(1),
        ..EngineLimits::default()
    };
    let fixture = fixture(limits).await;
    fixture
        .registry
        .put_version("sleeper", SLEEPER, "", id::id())
        .await
        .unwrap();

    let call = fixture
        .engine
        .invoke("sleeper", json!({}), user(), TriggerType::Manual)
        .await
        .unwrap();
    assert_eq!(call.status(), CallStatus::TimedOut);
    assert_eq!(call.error_type().as_deref(), Some(error_types::TIMEOUT));
    let duration = call.duration_ms().unwrap();
    assert!((500..10_000).contains(&duration), "duration {duration}ms");

    // the worker was killed; a later invocation leases a fresh one
    assert_eq!(fixture.pool.idle_count("sleeper"), 0);
}

#[tokio::test]
async fn test_worker_exit_is_crashed() {
    if !python3_available() {
        eprintln!("python3 not available, skipping");
        return;
    }
    let fixture = fixture(EngineLimits::default()).await;
    fixture
        .registry
        .put_version("exiting", EXITING, "", id::id())
        .await
        .unwrap();

    let call = fixture
        .engine
        .invoke("exiting", json!({}), user(), TriggerType::Manual)
        .await
        .unwrap();
    assert_eq!(call.status(), CallStatus::Failed);
    assert_eq!(call.error_type().as_deref(), Some(error_types::CRASHED));
    assert_eq!(fixture.pool.idle_count("exiting"), 0);
}

#[tokio::test]
async fn test_cancel_inflight_call() {
    if !python3_available() {
        eprintln!("python3 not available, skipping");
        return;
    }
    let fixture = fixture(EngineLimits::default()).await;
    fixture
        .registry
        .put_version("sleeper", SLEEPER, "", id::id())
        .await
        .unwrap();

    let pending = fixture
        .engine
        .invoke_async("sleeper", json!({}), user(), TriggerType::Manual)
        .await
        .unwrap();
    assert_eq!(pending.status(), CallStatus::Pending);

    // give the background task time to reach the worker exchange
    tokio::time::sleep(Duration::from_millis(500)).await;
    fixture.engine.cancel(pending.id()).await.unwrap();

    let mut call = fixture.engine.calls().get(pending.id()).await.unwrap();
    for _ in 0..50 {
        if call.status().is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        call = fixture.engine.calls().get(pending.id()).await.unwrap();
    }
    assert_eq!(call.status(), CallStatus::Cancelled);
}

#[tokio::test]
async fn test_describe_updates_definition() {
    if !python3_available() {
        eprintln!("python3 not available, skipping");
        return;
    }
    let fixture = fixture(EngineLimits::default()).await;
    let source = r#"from minibase import register

@register(description="Greets the caller", auth="auth", tags=["demo"])
def greet(input):
    return "hello"
"#;
    fixture
        .registry
        .put_version("greet", source, "", id::id())
        .await
        .unwrap();

    let describe = fixture.engine.describe("greet").await.unwrap();
    assert_eq!(describe.name, "greet");
    assert_eq!(describe.auth, AuthLevel::Auth);

    let def = fixture.registry.get_def("greet").await.unwrap();
    assert_eq!(def.auth_level(), AuthLevel::Auth);
    assert_eq!(def.description(), "Greets the caller");
    assert_eq!(def.tags().0, vec!["demo".to_string()]);
}
