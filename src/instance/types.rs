/// Lifecycle of the supervised server process.
///
/// `Exited` is terminal and carries the exit code captured when the
/// process was reaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    NotStarted,
    Running,
    Exited(i32),
}

impl InstanceStatus {
    pub fn is_running(&self) -> bool {
        *self == InstanceStatus::Running
    }
}
