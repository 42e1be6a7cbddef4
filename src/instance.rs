mod handle;
mod types;

pub use handle::{CommandOutcome, ProcessSupervisor};
pub use types::InstanceStatus;
