pub mod cancel;
pub mod config;
pub mod device;
pub mod error;
pub mod monitor;
pub mod pipeline;
pub mod probe;
pub mod project;
pub mod toolchain;
pub mod util;

pub use cancel::CancelToken;
pub use config::OrchestratorConfig;
pub use device::{DeviceManager, DeviceStatus, SdkClient, StopReport, VdkCli};
pub use error::{Error, Result};
pub use monitor::{
    CleanupOptions, CleanupOutcome, HostMemory, MemorySample, MemorySampler, MemoryWatch,
    ResourceMonitor,
};
pub use pipeline::{BuildPipeline, BuildResult, BuildRunner, NpmBuildRunner};
pub use probe::{HostProbe, ProcessProbe, Signal};
pub use project::{locate_project, ProjectRoot};
pub use util::CommandOutput;
