//! Keeps a Bedrock dedicated server instance up to date and supervises it.
//!
//! The usual flow is [`VersionResolver`] to find the latest build,
//! [`PackageInstaller::update`] to sync the install directory, then a
//! [`ProcessSupervisor`] to run the server and forward console commands that
//! pass the [`CommandValidator`].

pub mod command;
pub mod config;
pub mod error;
pub mod installer;
pub mod instance;
pub mod resolver;
pub mod stream;
pub mod version;

pub use command::{COMMAND_GRAMMAR, CommandRule, CommandValidator};
pub use config::LauncherConfig;
pub use error::{ConfigError, ResolveError, ServerError, UpdateError, VersionError};
pub use installer::{PackageInstaller, SyncSummary, UpdateReport};
pub use instance::{CommandOutcome, InstanceStatus, ProcessSupervisor};
pub use resolver::VersionResolver;
pub use version::{Platform, ResolvedVersion, ServerVersion};
