//! Named in-flight container tracking.
//!
//! Named runs register their container here while they execute so other
//! callers can query or stop them by name, and so shutdown can sweep whatever
//! is still running.

use crate::container::{ContainerDetails, ContainerEngine, ContainerHandle, Result};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Map of container name to live container handle.
///
/// Cloning is cheap; clones share the same map and engine.
#[derive(Clone)]
pub struct ContainerRegistry {
    engine: Arc<dyn ContainerEngine>,
    containers: Arc<DashMap<String, ContainerHandle>>,
}

impl ContainerRegistry {
    /// Create an empty registry backed by `engine`.
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self {
            engine,
            containers: Arc::new(DashMap::new()),
        }
    }

    /// The engine used for status refreshes and stops.
    pub fn engine(&self) -> Arc<dyn ContainerEngine> {
        self.engine.clone()
    }

    /// Track `handle` under `name`, returning whatever was tracked there before.
    ///
    /// Name uniqueness is the caller's concern; an existing entry is replaced.
    pub fn register(&self, name: &str, handle: ContainerHandle) -> Option<ContainerHandle> {
        debug!("Registering container {} as '{}'", handle.short_id(), name);
        let previous = self.containers.insert(name.to_string(), handle);
        if let Some(prev) = &previous {
            warn!(
                "Container name '{}' was tracking {}, now replaced",
                name,
                prev.short_id()
            );
        }
        previous
    }

    /// Handle tracked under `name`.
    pub fn get(&self, name: &str) -> Option<ContainerHandle> {
        self.containers.get(name).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.containers.contains_key(name)
    }

    /// Names currently tracked, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .containers
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    /// Current engine-side state of the container tracked under `name`.
    ///
    /// Returns `Ok(None)` if nothing is tracked under that name.
    ///
    /// # Errors
    ///
    /// Returns error if the engine cannot inspect the container.
    pub fn status(&self, name: &str) -> Result<Option<ContainerDetails>> {
        let Some(handle) = self.get(name) else {
            return Ok(None);
        };

        let details = self.engine.inspect(&handle)?;
        Ok(Some(details))
    }

    /// Stop and remove the container tracked under `name`.
    ///
    /// The entry is evicted whatever happens. Returns `false` if the name is
    /// unknown or an engine call failed; never fails otherwise.
    pub fn stop(&self, name: &str) -> bool {
        let Some((_, handle)) = self.containers.remove(name) else {
            debug!("No container tracked as '{}'", name);
            return false;
        };

        info!("Stopping container '{}' ({})", name, handle.short_id());

        let stopped = match self.engine.stop(&handle) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to stop container '{}': {}", name, e);
                false
            }
        };

        // A container that refused to stop is force-removed instead.
        let removed = match self.engine.remove(&handle, !stopped) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to remove container '{}': {}", name, e);
                false
            }
        };

        stopped && removed
    }

    /// Stop every tracked container, best effort.
    ///
    /// Every entry present when the sweep starts is evicted by the time it
    /// returns. Returns how many containers were stopped cleanly.
    pub fn cleanup_all(&self) -> usize {
        let names = self.names();
        if names.is_empty() {
            return 0;
        }

        info!("Cleaning up {} tracked container(s)", names.len());
        let stopped = names.iter().filter(|name| self.stop(name)).count();

        if stopped < names.len() {
            warn!(
                "{} of {} container(s) could not be stopped cleanly",
                names.len() - stopped,
                names.len()
            );
        }
        stopped
    }

    /// Sweep the registry until `run` finishes, then return its output.
    ///
    /// A run that registers after a sweep started is caught by the next one,
    /// `interval` later. Awaiting the run keeps the runtime alive while its
    /// own cleanup removes the container.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Join`](crate::container::RunnerError::Join) if
    /// the run or a sweep panicked.
    pub async fn drain<T>(&self, mut run: JoinHandle<T>, interval: Duration) -> Result<T>
    where
        T: Send + 'static,
    {
        loop {
            let registry = self.clone();
            let stopped = tokio::task::spawn_blocking(move || registry.cleanup_all()).await?;
            if stopped > 0 {
                info!("Stopped {} container(s) while draining", stopped);
            }

            tokio::select! {
                output = &mut run => return Ok(output?),
                _ = tokio::time::sleep(interval) => {
                    debug!("Run still active, sweeping again");
                }
            }
        }
    }

    /// Scope guard that runs [`cleanup_all`](Self::cleanup_all) when dropped.
    pub fn scoped(&self) -> RegistryCleanup {
        RegistryCleanup {
            registry: self.clone(),
        }
    }

    /// Evict `name` only if it still refers to container `id`.
    pub(crate) fn deregister(&self, name: &str, id: &str) -> bool {
        self.containers
            .remove_if(name, |_, handle| handle.id == id)
            .is_some()
    }
}

/// Sweeps its registry on drop.
///
/// Drop performs blocking engine calls, so keep the guard off async tasks.
pub struct RegistryCleanup {
    registry: ContainerRegistry,
}

impl RegistryCleanup {
    pub fn registry(&self) -> &ContainerRegistry {
        &self.registry
    }
}

impl Drop for RegistryCleanup {
    fn drop(&mut self) {
        self.registry.cleanup_all();
    }
}
