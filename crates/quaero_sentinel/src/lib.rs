//! Step Monitor: watches a step's worker-job children and drives the
//! step to a terminal `JobStatus`, with panic containment so one step's
//! failure can never take down the host process.

mod monitor;
mod supervisor;

pub use monitor::{monitor_step, MonitorConfig, StepMonitorContext};
pub use supervisor::supervise_step;
