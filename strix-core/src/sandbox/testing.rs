//! In-memory runtime for unit tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::environment::SandboxHandle;
use super::runtime::{
    CapabilityOutput, CapabilityRequest, ManagedSandbox, ProvisionSpec, SandboxRuntime,
};
use crate::{Error, Result};

#[derive(Default)]
pub struct FakeRuntime {
    live: Mutex<HashMap<String, String>>,
    provision_failures: AtomicUsize,
    destroy_failures: AtomicUsize,
    interrupts: AtomicUsize,
    executions: AtomicUsize,
    counter: AtomicUsize,
    /// Every execute sleeps this long before answering
    pub exec_delay: Mutex<Option<Duration>>,
    requests: Mutex<Vec<CapabilityRequest>>,
}

#[allow(clippy::unwrap_used)]
impl FakeRuntime {
    pub fn fail_next_provisions(&self, n: usize) {
        self.provision_failures.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_destroys(&self, n: usize) {
        self.destroy_failures.store(n, Ordering::SeqCst);
    }

    pub fn set_exec_delay(&self, delay: Duration) {
        *self.exec_delay.lock().unwrap() = Some(delay);
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().unwrap().len()
    }

    pub fn interrupts(&self) -> usize {
        self.interrupts.load(Ordering::SeqCst)
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    /// Most recent capability call that reached the runtime
    pub fn last_request(&self) -> Option<CapabilityRequest> {
        self.requests.lock().unwrap().last().cloned()
    }

    pub fn seed_orphan(&self, run_id: &str) {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        self.live
            .lock()
            .unwrap()
            .insert(format!("orphan-{n}"), run_id.to_string());
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[allow(clippy::unwrap_used)]
#[async_trait]
impl SandboxRuntime for FakeRuntime {
    fn name(&self) -> &str {
        "fake"
    }

    async fn provision(&self, spec: &ProvisionSpec) -> Result<SandboxHandle> {
        if Self::take_failure(&self.provision_failures) {
            return Err(Error::Provision("injected failure".to_string()));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let id = format!("fake-{n}");
        self.live
            .lock()
            .unwrap()
            .insert(id.clone(), spec.run_id.clone());
        Ok(SandboxHandle {
            name: format!("strix-{}-{}", spec.run_id, spec.env_id),
            id,
        })
    }

    async fn execute(
        &self,
        handle: &SandboxHandle,
        request: &CapabilityRequest,
    ) -> Result<CapabilityOutput> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        let delay = *self.exec_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if !self.live.lock().unwrap().contains_key(&handle.id) {
            return Err(Error::EnvironmentNotFound(handle.id.clone()));
        }
        let stdout = match request {
            CapabilityRequest::Terminal { command, .. } => command.clone(),
            CapabilityRequest::Python { code } => code.clone(),
            CapabilityRequest::Proxy { action, .. }
            | CapabilityRequest::Browser { action, .. }
            | CapabilityRequest::Files { action, .. } => action.clone(),
        };
        Ok(CapabilityOutput {
            stdout,
            ..Default::default()
        })
    }

    async fn interrupt(&self, _handle: &SandboxHandle) -> Result<()> {
        self.interrupts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn destroy(&self, handle: &SandboxHandle) -> Result<()> {
        if Self::take_failure(&self.destroy_failures) {
            return Err(Error::Teardown("injected failure".to_string()));
        }
        self.live.lock().unwrap().remove(&handle.id);
        Ok(())
    }

    async fn list_managed(&self) -> Result<Vec<ManagedSandbox>> {
        Ok(self
            .live
            .lock()
            .unwrap()
            .iter()
            .map(|(id, run_id)| ManagedSandbox {
                handle: SandboxHandle {
                    id: id.clone(),
                    name: id.clone(),
                },
                run_id: run_id.clone(),
            })
            .collect())
    }
}
