//! Scanner Controller — the per-container scanner substate machine.
//!
//! The scanner is an external object supplied by the artifact runtime
//! (out of scope per spec.md §1); [`ScannerHandle`] is the narrow
//! interface the host depends on instead, in the same "trait + fake
//! double" shape as [`crate::container::ArtifactHandle`].

use async_trait::async_trait;

use crate::container::{ArtifactHandle, ContainerInstance};
use crate::error::HostError;
use crate::messages::ContainerMessageLog;
use crate::model::{Message, ScannerResource, ScannerStatus};
use std::sync::Arc;

/// The scanner-runtime's own status vocabulary, distinct from the
/// host-facing [`ScannerStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScannerRuntimeStatus {
    Starting,
    Running,
    Scanning,
    Updating,
    Stopped,
    Shutdown,
}

/// Map a scanner-runtime status to the host-facing [`ScannerStatus`]
/// (spec.md §4.E).
pub fn map_runtime_status(status: ScannerRuntimeStatus) -> ScannerStatus {
    match status {
        ScannerRuntimeStatus::Starting => ScannerStatus::Created,
        ScannerRuntimeStatus::Running => ScannerStatus::Started,
        ScannerRuntimeStatus::Scanning | ScannerRuntimeStatus::Updating => ScannerStatus::Scanning,
        ScannerRuntimeStatus::Stopped => ScannerStatus::Stopped,
        ScannerRuntimeStatus::Shutdown => ScannerStatus::Disposed,
    }
}

/// A running scanner instance bound to one container's artifact.
#[async_trait]
pub trait ScannerHandle: Send + Sync {
    async fn status(&self) -> ScannerRuntimeStatus;
    async fn start(&self, poll_interval_ms: u64) -> Result<(), String>;
    async fn stop(&self) -> Result<(), String>;
    async fn scan_now(&self) -> Result<(), String>;
    async fn shutdown(&self) -> Result<(), String>;
}

/// Instantiates a [`ScannerHandle`] bound to a container's materialized
/// artifact.
pub trait ScannerFactory: Send + Sync {
    fn create(&self, artifact: &Arc<dyn ArtifactHandle>) -> Box<dyn ScannerHandle>;
}

pub struct ScannerController {
    factory: Arc<dyn ScannerFactory>,
}

impl ScannerController {
    pub fn new(factory: Arc<dyn ScannerFactory>) -> Self {
        ScannerController { factory }
    }

    /// Read-only scanner status for `getScannerInfo`. Does not mutate state
    /// or touch the message log.
    pub async fn info(&self, instance: &ContainerInstance) -> ScannerResource {
        let guard = instance.lock().await;
        match &guard.scanner {
            None => ScannerResource::new(ScannerStatus::Unknown),
            Some(scanner) => {
                let runtime_status = scanner.status().await;
                ScannerResource::new(map_runtime_status(runtime_status))
            }
        }
    }

    /// Drive the scanner substate machine toward `target.status`, per the
    /// transition table in spec.md §4.E. Every transition — successful or
    /// not — clears the per-container message log and appends one
    /// INFO/WARN line describing the outcome.
    pub async fn update(
        &self,
        container_id: &str,
        instance: &ContainerInstance,
        messages: &ContainerMessageLog,
        target: &ScannerResource,
    ) -> Result<ScannerResource, HostError> {
        messages.clear(container_id);

        let mut guard = instance.lock().await;
        let artifact = guard.artifact_handle.clone();

        let result = match target.status {
            ScannerStatus::Created => self.transition_created(&mut guard, &artifact),
            ScannerStatus::Started => {
                self.transition_started(&mut guard, &artifact, target.poll_interval).await
            }
            ScannerStatus::Stopped => self.transition_stopped(&mut guard).await,
            ScannerStatus::Scanning => {
                self.transition_scanning(&mut guard, &artifact).await
            }
            ScannerStatus::Disposed => self.transition_disposed(&mut guard).await,
            ScannerStatus::Unknown => Err("cannot request transition to UNKNOWN".to_string()),
        };

        match result {
            Ok(resource) => {
                messages.append(
                    container_id,
                    Message::info(format!("scanner transitioned to {:?}", resource.status)),
                );
                Ok(resource)
            }
            Err(reason) => {
                messages.append(container_id, Message::warn(reason.clone()));
                Err(HostError::Conflict {
                    message: reason,
                    existing: None,
                })
            }
        }
    }

    fn transition_created(
        &self,
        guard: &mut tokio::sync::MutexGuard<'_, crate::container::ContainerInner>,
        artifact: &Option<Arc<dyn ArtifactHandle>>,
    ) -> Result<ScannerResource, String> {
        if guard.scanner.is_some() {
            return Err("scanner already exists".to_string());
        }
        let artifact = artifact
            .as_ref()
            .ok_or_else(|| "container has no artifact to bind a scanner to".to_string())?;
        guard.scanner = Some(self.factory.create(artifact));
        Ok(ScannerResource::new(ScannerStatus::Created))
    }

    async fn transition_started(
        &self,
        guard: &mut tokio::sync::MutexGuard<'_, crate::container::ContainerInner>,
        artifact: &Option<Arc<dyn ArtifactHandle>>,
        poll_interval: Option<u64>,
    ) -> Result<ScannerResource, String> {
        let poll_interval = poll_interval.filter(|p| *p > 0).ok_or_else(|| {
            "pollInterval must be > 0 to start the scanner".to_string()
        })?;

        if guard.scanner.is_none() {
            let artifact = artifact
                .as_ref()
                .ok_or_else(|| "container has no artifact to bind a scanner to".to_string())?;
            guard.scanner = Some(self.factory.create(artifact));
        } else {
            let current = guard.scanner.as_ref().unwrap().status().await;
            if map_runtime_status(current) != ScannerStatus::Stopped {
                return Err(format!(
                    "scanner must be STOPPED to start, was {:?}",
                    map_runtime_status(current)
                ));
            }
        }

        guard
            .scanner
            .as_ref()
            .unwrap()
            .start(poll_interval)
            .await
            .map_err(|e| format!("failed to start scanner: {e}"))?;

        Ok(ScannerResource::with_poll_interval(
            ScannerStatus::Started,
            poll_interval,
        ))
    }

    async fn transition_stopped(
        &self,
        guard: &mut tokio::sync::MutexGuard<'_, crate::container::ContainerInner>,
    ) -> Result<ScannerResource, String> {
        let scanner = guard
            .scanner
            .as_ref()
            .ok_or_else(|| "no scanner to stop".to_string())?;
        let current = map_runtime_status(scanner.status().await);
        if !matches!(current, ScannerStatus::Started | ScannerStatus::Scanning) {
            return Err(format!("scanner must be STARTED or SCANNING to stop, was {current:?}"));
        }
        scanner
            .stop()
            .await
            .map_err(|e| format!("failed to stop scanner: {e}"))?;
        Ok(ScannerResource::new(ScannerStatus::Stopped))
    }

    async fn transition_scanning(
        &self,
        guard: &mut tokio::sync::MutexGuard<'_, crate::container::ContainerInner>,
        artifact: &Option<Arc<dyn ArtifactHandle>>,
    ) -> Result<ScannerResource, String> {
        if guard.scanner.is_none() {
            let artifact = artifact
                .as_ref()
                .ok_or_else(|| "container has no artifact to bind a scanner to".to_string())?;
            guard.scanner = Some(self.factory.create(artifact));
        } else {
            let current = map_runtime_status(guard.scanner.as_ref().unwrap().status().await);
            if !matches!(
                current,
                ScannerStatus::Stopped | ScannerStatus::Created | ScannerStatus::Started
            ) {
                return Err(format!(
                    "scanner must be STOPPED, CREATED or STARTED to scan now, was {current:?}"
                ));
            }
        }

        guard
            .scanner
            .as_ref()
            .unwrap()
            .scan_now()
            .await
            .map_err(|e| format!("failed to trigger scan: {e}"))?;

        Ok(ScannerResource::new(ScannerStatus::Scanning))
    }

    async fn transition_disposed(
        &self,
        guard: &mut tokio::sync::MutexGuard<'_, crate::container::ContainerInner>,
    ) -> Result<ScannerResource, String> {
        if let Some(scanner) = guard.scanner.as_ref() {
            let current = map_runtime_status(scanner.status().await);
            if matches!(current, ScannerStatus::Started | ScannerStatus::Scanning) {
                scanner
                    .stop()
                    .await
                    .map_err(|e| format!("failed to stop scanner before disposal: {e}"))?;
            }
            scanner
                .shutdown()
                .await
                .map_err(|e| format!("failed to shut down scanner: {e}"))?;
        }
        guard.scanner = None;
        Ok(ScannerResource::new(ScannerStatus::Disposed))
    }
}

#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;
    use tokio::sync::Mutex;

    pub struct FakeScanner {
        pub status: Mutex<ScannerRuntimeStatus>,
        pub fail_start: bool,
        pub fail_stop: bool,
    }

    impl FakeScanner {
        pub fn new() -> Self {
            FakeScanner {
                status: Mutex::new(ScannerRuntimeStatus::Stopped),
                fail_start: false,
                fail_stop: false,
            }
        }
    }

    #[async_trait]
    impl ScannerHandle for FakeScanner {
        async fn status(&self) -> ScannerRuntimeStatus {
            *self.status.lock().await
        }
        async fn start(&self, _poll_interval_ms: u64) -> Result<(), String> {
            if self.fail_start {
                return Err("start failed".to_string());
            }
            *self.status.lock().await = ScannerRuntimeStatus::Running;
            Ok(())
        }
        async fn stop(&self) -> Result<(), String> {
            if self.fail_stop {
                return Err("stop failed".to_string());
            }
            *self.status.lock().await = ScannerRuntimeStatus::Stopped;
            Ok(())
        }
        async fn scan_now(&self) -> Result<(), String> {
            *self.status.lock().await = ScannerRuntimeStatus::Scanning;
            Ok(())
        }
        async fn shutdown(&self) -> Result<(), String> {
            *self.status.lock().await = ScannerRuntimeStatus::Shutdown;
            Ok(())
        }
    }

    pub struct FakeScannerFactory;

    impl ScannerFactory for FakeScannerFactory {
        fn create(&self, _artifact: &Arc<dyn ArtifactHandle>) -> Box<dyn ScannerHandle> {
            Box::new(FakeScanner::new())
        }
    }
}
