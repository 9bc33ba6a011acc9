//! Tool Executor - Cross-platform bundled tool runner with staged inputs
//!
//! This crate runs a bundled command-line tool with:
//! - Argument normalization (raw line or pre-tokenized list)
//! - Staging of in-memory buffers into a working directory
//! - Data-driven platform-to-executable resolution
//! - Blocking and non-blocking execution with full stream capture
//! - Exactly-once completion delivery under racing exit/close signals

pub mod invocation;
pub mod outcome;
pub mod platform;
pub mod runner;
pub mod staging;
pub mod toolchain;

pub use invocation::{
    ConfPlacement, InvocationConfig, InvocationError, NamedBuffer, Params, Token,
};
pub use outcome::{ProcessEnd, RunOutcome};
pub use platform::{BindingTable, Platform, PlatformError, ToolBinding};
pub use runner::{RunHandle, RunnerError, ToolRunner};
pub use staging::{IoFlags, Staged, StagedArtifact, StagingError};
pub use toolchain::{ConfArg, ConfFile, ResolvedTool, Toolchain};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
