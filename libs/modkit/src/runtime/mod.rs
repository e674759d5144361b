mod instances;
mod monitor;
mod order;
mod runner;
mod sampler;
mod supervisor;
mod tracker;

pub use instances::{InstanceRegistry, InstanceRuntimeState, InstanceState, ModuleInstance};
pub use order::LoadingOrder;
pub use runner::{run, RunOptions, ShutdownOptions};
pub use sampler::{ExecutionSampler, SampleWindow};
pub use supervisor::{LoadFailure, LoadReport, ModuleSupervisor};
pub use tracker::{CleanupReport, ReferenceTracker};
