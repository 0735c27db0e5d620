//! Run state machine tests against the scripted engine.

mod common;

use common::{FakeEngine, TEST_TOKEN, WaitScript, spec};
use cursor_runner::container::{EngineError, RunnerError};
use cursor_runner::{ContainerExecutor, ContainerSpecBuilder, RunOptions};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(10);

fn executor(engine: &Arc<FakeEngine>) -> ContainerExecutor {
    ContainerExecutor::new(engine.clone())
}

#[test]
fn test_clean_exit_returns_output_without_error() {
    let engine = Arc::new(FakeEngine::exiting(0).with_logs("cursor 1.0.0"));
    let mut request = common::request(RunOptions::default().timeout(TIMEOUT));
    request.command = vec!["cursor".to_string(), "--version".to_string()];
    let spec = ContainerSpecBuilder::new().build(&request).unwrap();

    let result = executor(&engine).run(&spec, TIMEOUT).unwrap();

    assert_eq!(result.exit_code, 0);
    assert_eq!(result.output, "cursor 1.0.0");
    assert_eq!(result.error, "");
    assert!(result.success());
    assert!(!result.timed_out);
    assert_eq!(engine.specs()[0].command, vec!["cursor", "--version"]);
}

#[test]
fn test_non_zero_exit_mirrors_output_into_error() {
    let engine = Arc::new(FakeEngine::exiting(1).with_logs("bad flag"));

    let result = executor(&engine).run(&spec(None), TIMEOUT).unwrap();

    assert_eq!(result.exit_code, 1);
    assert_eq!(result.output, "bad flag");
    assert_eq!(result.error, "bad flag");
    assert!(!result.success());
    assert!(result.observed());
}

#[test]
fn test_exit_codes_are_reported_verbatim() {
    for code in [0, 1, 2, 42, 127, 255] {
        let engine = Arc::new(FakeEngine::exiting(code).with_logs("log line"));

        let result = executor(&engine).run(&spec(None), TIMEOUT).unwrap();

        assert_eq!(result.exit_code, code);
        assert_eq!(result.error.is_empty(), code == 0, "exit code {}", code);
    }
}

#[test]
fn test_wait_failure_is_reported_not_raised() {
    let engine = Arc::new(
        FakeEngine::with_wait(WaitScript::Fail("connection reset".to_string()))
            .with_logs("partial output"),
    );

    let result = executor(&engine).run(&spec(None), TIMEOUT).unwrap();

    assert_eq!(result.exit_code, -1);
    assert_eq!(result.output, "partial output");
    assert_eq!(result.error, "connection reset");
    assert!(!result.timed_out);
    assert!(engine.live_containers().is_empty());
    assert_eq!(engine.removes_of(&result.container_id), 1);
}

#[test]
fn test_creation_failure_raises_and_removes_nothing() {
    let engine = Arc::new(FakeEngine::exiting(0).failing_create("no such image"));

    let err = executor(&engine).run(&spec(None), TIMEOUT).unwrap_err();

    assert!(matches!(err, RunnerError::Creation(EngineError::Other(_))));
    assert!(err.to_string().contains("no such image"));
    assert_eq!(engine.create_attempts(), 1);
    assert_eq!(engine.creates(), 0);
    assert!(engine.remove_calls().is_empty());
}

#[test]
fn test_timeout_removes_container_and_reports_deadline() {
    let engine = Arc::new(FakeEngine::hanging().with_logs("still thinking"));

    let result = executor(&engine)
        .run(&spec(None), Duration::from_millis(50))
        .unwrap();

    assert_eq!(result.exit_code, -1);
    assert!(result.timed_out);
    assert!(!result.error.is_empty());
    assert!(result.error.contains("timed out"));
    assert_eq!(result.output, "still thinking");
    assert!(engine.live_containers().is_empty());
}

#[test]
fn test_every_outcome_removes_what_it_created() {
    let engines = vec![
        FakeEngine::exiting(0),
        FakeEngine::exiting(3),
        FakeEngine::with_wait(WaitScript::Fail("boom".to_string())),
        FakeEngine::hanging(),
        FakeEngine::exiting(0).failing_logs("log stream closed"),
    ];

    for engine in engines {
        let engine = Arc::new(engine);
        let executor = executor(&engine);

        for _ in 0..3 {
            executor
                .run(&spec(None), Duration::from_millis(20))
                .unwrap();
        }

        assert_eq!(engine.creates(), 3);
        assert_eq!(engine.remove_calls().len(), 3);
        assert!(engine.live_containers().is_empty());
    }
}

#[test]
fn test_logs_failure_after_exit_is_unobserved() {
    let engine = Arc::new(FakeEngine::exiting(0).failing_logs("log stream closed"));

    let result = executor(&engine).run(&spec(None), TIMEOUT).unwrap();

    assert_eq!(result.exit_code, -1);
    assert_eq!(result.output, "");
    assert_eq!(result.error, "log stream closed");
    assert!(!result.observed());
}

#[test]
fn test_logs_failure_after_wait_failure_keeps_wait_error() {
    let engine = Arc::new(
        FakeEngine::with_wait(WaitScript::Fail("connection reset".to_string()))
            .failing_logs("log stream closed"),
    );

    let result = executor(&engine).run(&spec(None), TIMEOUT).unwrap();

    assert_eq!(result.exit_code, -1);
    assert_eq!(result.output, "");
    assert_eq!(result.error, "connection reset");
}

#[test]
fn test_remove_failure_is_swallowed() {
    let engine = Arc::new(
        FakeEngine::exiting(0)
            .with_logs("done")
            .failing_remove("daemon went away"),
    );
    let executor = executor(&engine);

    let result = executor.run(&spec(Some("flaky-remove")), TIMEOUT).unwrap();

    assert_eq!(result.exit_code, 0);
    assert_eq!(result.output, "done");
    assert_eq!(engine.remove_calls().len(), 1);
    assert!(!executor.registry().contains("flaky-remove"));
}

#[test]
fn test_named_run_is_deregistered_after_completion() {
    let engine = Arc::new(FakeEngine::exiting(0));
    let executor = executor(&engine);

    executor.run(&spec(Some("cursor-analyze")), TIMEOUT).unwrap();

    assert!(executor.registry().is_empty());
}

#[test]
fn test_named_run_is_tracked_under_requested_name() {
    let engine = Arc::new(FakeEngine::hanging().with_anonymous_handles());
    let executor = executor(&engine);

    let worker = {
        let executor = executor.clone();
        std::thread::spawn(move || executor.run(&spec(Some("cursor-review")), TIMEOUT))
    };

    assert!(engine.wait_for_waiters(1, TIMEOUT));
    assert!(executor.registry().contains("cursor-review"));
    assert!(executor.registry().stop("cursor-review"));

    let result = worker.join().unwrap().unwrap();
    assert_eq!(result.exit_code, common::STOPPED_EXIT_CODE);
    assert!(executor.registry().is_empty());
    assert!(engine.live_containers().is_empty());
}

#[test]
fn test_anonymous_handle_is_deregistered_after_completion() {
    let engine = Arc::new(FakeEngine::exiting(0).with_anonymous_handles());
    let executor = executor(&engine);

    executor.run(&spec(Some("cursor-analyze")), TIMEOUT).unwrap();

    assert!(executor.registry().is_empty());
}

#[test]
fn test_unnamed_run_is_never_registered() {
    let engine = Arc::new(FakeEngine::hanging());
    let executor = executor(&engine);

    let worker = {
        let executor = executor.clone();
        std::thread::spawn(move || executor.run(&spec(None), Duration::from_millis(500)))
    };

    assert!(engine.wait_for_waiters(1, TIMEOUT));
    assert!(executor.registry().is_empty());

    let result = worker.join().unwrap().unwrap();
    assert!(result.timed_out);
}

#[test]
fn test_panic_inside_engine_still_removes_container() {
    let engine = Arc::new(FakeEngine::with_wait(WaitScript::Panic));
    let executor = executor(&engine);

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        executor.run(&spec(Some("panicky")), TIMEOUT)
    }));

    assert!(outcome.is_err());
    assert_eq!(engine.creates(), 1);
    assert_eq!(engine.remove_calls().len(), 1);
    assert!(engine.live_containers().is_empty());
    assert!(!executor.registry().contains("panicky"));
}

#[test]
fn test_container_receives_fixed_environment_and_mounts() {
    let engine = Arc::new(FakeEngine::exiting(0));

    executor(&engine).run(&spec(None), TIMEOUT).unwrap();

    let specs = engine.specs();
    let created = &specs[0];
    assert_eq!(created.env["CURSOR_TOKEN"], TEST_TOKEN);
    assert_eq!(created.env["WORKSPACE_PATH"], "/workspace");
    assert_eq!(created.env["OUTPUT_PATH"], "/output");
    assert_eq!(created.env["CURSOR_CONFIG"], "/config/cursor-config.json");
    assert_eq!(created.working_dir, "/workspace");
    assert_eq!(created.user, "cursor-user");
    assert!(created.detach);
    assert!(!created.auto_remove);
    assert_eq!(
        created.binds(),
        vec![
            "/tmp/cursor-project:/workspace:ro",
            "/tmp/cursor-output:/output:rw",
            "/tmp/cursor-config:/config:rw",
        ]
    );
}
