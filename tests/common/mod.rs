//! Scripted in-memory container engine for integration tests.

#![allow(dead_code)]

use chrono::Utc;
use cursor_runner::container::{
    ContainerDetails, ContainerEngine, ContainerHandle, ContainerSpec, ContainerSpecBuilder,
    EngineError, RunOptions, RunRequest,
};
use secrecy::SecretString;
use std::collections::HashMap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

pub const TEST_TOKEN: &str = "test-token-123";

/// Exit code the fake reports for a container that was stopped mid-run.
pub const STOPPED_EXIT_CODE: i64 = 137;

/// How `wait` behaves.
#[derive(Debug, Clone)]
pub enum WaitScript {
    /// Report this exit code immediately
    Exit(i64),
    /// Fail with this message
    Fail(String),
    /// Block until the container is stopped or removed, or the deadline passes
    Hang,
    /// Panic inside the engine call
    Panic,
}

#[derive(Debug, Clone)]
struct Script {
    create_error: Option<String>,
    wait: WaitScript,
    logs: Vec<u8>,
    logs_error: Option<String>,
    remove_error: Option<String>,
    stop_error: Option<String>,
    create_delay: Duration,
    anonymous_handles: bool,
}

#[derive(Debug, Default)]
struct Container {
    name: Option<String>,
    stopped: bool,
    removed: bool,
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    containers: HashMap<String, Container>,
    specs: Vec<ContainerSpec>,
    create_attempts: usize,
    remove_calls: Vec<String>,
    stop_calls: Vec<String>,
    waiting: usize,
}

pub struct FakeEngine {
    script: Script,
    state: Mutex<State>,
    changed: Condvar,
}

impl FakeEngine {
    /// Engine whose containers exit with `code`.
    pub fn exiting(code: i64) -> Self {
        Self::with_wait(WaitScript::Exit(code))
    }

    /// Engine whose containers run until stopped or timed out.
    pub fn hanging() -> Self {
        Self::with_wait(WaitScript::Hang)
    }

    pub fn with_wait(wait: WaitScript) -> Self {
        Self {
            script: Script {
                create_error: None,
                wait,
                logs: Vec::new(),
                logs_error: None,
                remove_error: None,
                stop_error: None,
                create_delay: Duration::ZERO,
                anonymous_handles: false,
            },
            state: Mutex::new(State::default()),
            changed: Condvar::new(),
        }
    }

    pub fn with_logs(mut self, logs: impl Into<Vec<u8>>) -> Self {
        self.script.logs = logs.into();
        self
    }

    pub fn failing_create(mut self, message: &str) -> Self {
        self.script.create_error = Some(message.to_string());
        self
    }

    pub fn failing_logs(mut self, message: &str) -> Self {
        self.script.logs_error = Some(message.to_string());
        self
    }

    pub fn failing_remove(mut self, message: &str) -> Self {
        self.script.remove_error = Some(message.to_string());
        self
    }

    pub fn failing_stop(mut self, message: &str) -> Self {
        self.script.stop_error = Some(message.to_string());
        self
    }

    /// Take `delay` to create each container.
    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.script.create_delay = delay;
        self
    }

    /// Return handles without a name, as an engine that does not echo it would.
    pub fn with_anonymous_handles(mut self) -> Self {
        self.script.anonymous_handles = true;
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of containers actually created.
    pub fn creates(&self) -> usize {
        self.state().containers.len()
    }

    /// Number of `create_and_start` calls, successful or not.
    pub fn create_attempts(&self) -> usize {
        self.state().create_attempts
    }

    /// Container ids passed to `remove`, in call order.
    pub fn remove_calls(&self) -> Vec<String> {
        self.state().remove_calls.clone()
    }

    pub fn removes_of(&self, id: &str) -> usize {
        self.state()
            .remove_calls
            .iter()
            .filter(|called| called.as_str() == id)
            .count()
    }

    pub fn stop_calls(&self) -> Vec<String> {
        self.state().stop_calls.clone()
    }

    /// Ids of containers that were created and not yet removed.
    pub fn live_containers(&self) -> Vec<String> {
        let mut live: Vec<String> = self
            .state()
            .containers
            .iter()
            .filter(|(_, container)| !container.removed)
            .map(|(id, _)| id.clone())
            .collect();
        live.sort();
        live
    }

    /// Specs passed to `create_and_start`, in call order.
    pub fn specs(&self) -> Vec<ContainerSpec> {
        self.state().specs.clone()
    }

    /// Block until at least `count` runs are inside `wait`.
    pub fn wait_for_waiters(&self, count: usize, timeout: Duration) -> bool {
        let state = self.state();
        let (state, result) = self
            .changed
            .wait_timeout_while(state, timeout, |state| state.waiting < count)
            .unwrap_or_else(PoisonError::into_inner);
        drop(state);
        !result.timed_out()
    }
}

impl ContainerEngine for FakeEngine {
    fn create_and_start(&self, spec: &ContainerSpec) -> Result<ContainerHandle, EngineError> {
        if !self.script.create_delay.is_zero() {
            std::thread::sleep(self.script.create_delay);
        }

        let mut state = self.state();
        state.create_attempts += 1;
        state.specs.push(spec.clone());

        if let Some(message) = &self.script.create_error {
            return Err(EngineError::Other(message.clone()));
        }

        state.next_id += 1;
        let id = format!("fake{:060x}", state.next_id);
        state.containers.insert(
            id.clone(),
            Container {
                name: spec.name.clone(),
                ..Container::default()
            },
        );
        let name = if self.script.anonymous_handles {
            None
        } else {
            spec.name.clone()
        };
        Ok(ContainerHandle::new(id, name))
    }

    fn wait(&self, handle: &ContainerHandle, timeout: Duration) -> Result<i64, EngineError> {
        match &self.script.wait {
            WaitScript::Exit(code) => Ok(*code),
            WaitScript::Fail(message) => Err(EngineError::Other(message.clone())),
            WaitScript::Panic => panic!("engine exploded while waiting"),
            WaitScript::Hang => {
                let deadline = Instant::now() + timeout;
                let mut state = self.state();
                state.waiting += 1;
                self.changed.notify_all();

                loop {
                    let done = state
                        .containers
                        .get(&handle.id)
                        .is_none_or(|container| container.stopped || container.removed);
                    if done {
                        state.waiting -= 1;
                        return Ok(STOPPED_EXIT_CODE);
                    }

                    let now = Instant::now();
                    if now >= deadline {
                        state.waiting -= 1;
                        return Err(EngineError::Timeout(timeout));
                    }

                    state = self
                        .changed
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
    }

    fn logs(&self, _handle: &ContainerHandle) -> Result<Vec<u8>, EngineError> {
        match &self.script.logs_error {
            Some(message) => Err(EngineError::Other(message.clone())),
            None => Ok(self.script.logs.clone()),
        }
    }

    fn remove(&self, handle: &ContainerHandle, _force: bool) -> Result<(), EngineError> {
        let mut state = self.state();
        state.remove_calls.push(handle.id.clone());

        if let Some(message) = &self.script.remove_error {
            return Err(EngineError::Other(message.clone()));
        }

        if let Some(container) = state.containers.get_mut(&handle.id) {
            container.removed = true;
        }
        self.changed.notify_all();
        Ok(())
    }

    fn stop(&self, handle: &ContainerHandle) -> Result<(), EngineError> {
        let mut state = self.state();
        state.stop_calls.push(handle.id.clone());

        if let Some(message) = &self.script.stop_error {
            return Err(EngineError::Other(message.clone()));
        }

        if let Some(container) = state.containers.get_mut(&handle.id) {
            container.stopped = true;
        }
        self.changed.notify_all();
        Ok(())
    }

    fn inspect(&self, handle: &ContainerHandle) -> Result<ContainerDetails, EngineError> {
        let state = self.state();
        let container = state
            .containers
            .get(&handle.id)
            .filter(|container| !container.removed)
            .ok_or_else(|| EngineError::NotFound(handle.id.clone()))?;

        let status = if container.stopped { "exited" } else { "running" };
        Ok(ContainerDetails {
            id: handle.id.clone(),
            name: container.name.clone().unwrap_or_default(),
            engine_status: status.to_string(),
            created_at: Some(Utc::now()),
            raw_state: serde_json::json!({ "Status": status }),
        })
    }
}

/// Request for `cursor analyze` with fixed host paths.
pub fn request(options: RunOptions) -> RunRequest {
    RunRequest::new(
        "cursor-cli:latest",
        ["cursor", "analyze", "/workspace"],
        "/tmp/cursor-project",
        "/tmp/cursor-output",
        "/tmp/cursor-config",
        SecretString::from(TEST_TOKEN.to_string()),
    )
    .with_options(options)
}

/// Container spec for an optionally named run.
pub fn spec(name: Option<&str>) -> ContainerSpec {
    let options = match name {
        Some(name) => RunOptions::default().name(name),
        None => RunOptions::default(),
    };
    ContainerSpecBuilder::new()
        .build(&request(options))
        .expect("test request is valid")
}
