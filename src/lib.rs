//! sandterm - terminal emulation and execution bridge for a code sandbox
//!
//! Program output containing ANSI styling and carriage-return redraws is
//! composed into an ordered log of styled terminal lines. A session
//! controller runs code through an embedded runtime, suspends it while it
//! waits for interactive input, and substitutes harmless mock results for
//! operations the sandbox cannot perform instead of failing the run.
//!
//! # Modules
//!
//! - **core**: decoder, compositor, output log, input bridge, session
//! - **runtime**: the runtime boundary and a line-oriented script runtime
//! - **ui**: crossterm console renderer
//! - **config**: TOML configuration

pub mod config;
pub mod core;
pub mod runtime;
pub mod ui;

pub use crate::config::Config;
pub use crate::core::session::{RunOutcome, Session, SessionError, SessionEvent, SessionState, Submission};
pub use crate::runtime::{Runtime, ScriptRuntime};
