//! Isolated execution environments and their pool

mod docker;
mod environment;
mod pool;
mod runtime;
#[cfg(test)]
pub(crate) mod testing;

pub use docker::{DockerRuntime, ENV_LABEL, MANAGED_LABEL, RUN_LABEL};
pub use environment::{EnvBinding, EnvId, EnvState, SandboxEnvironment, SandboxHandle};
pub use pool::{EnvCheckout, PoolConfig, SandboxPool, SweepReport};
pub use runtime::{
    CapabilityOutput, CapabilityRequest, ManagedSandbox, ProvisionSpec, SandboxRuntime,
};
