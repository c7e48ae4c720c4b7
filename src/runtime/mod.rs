//! Embedded runtime boundary.
//!
//! A runtime evaluates source text on behalf of a [`Session`]. It reports
//! program output through the [`ExecContext`] it is handed, parks on
//! [`ExecContext::read_line`] when the program wants input, and asks
//! [`ExecContext::intercept`] before attempting anything the sandbox cannot
//! do.
//!
//! - **script**: a small line-oriented runtime used by the binary and tests
//!
//! [`Session`]: crate::core::session::Session

use async_trait::async_trait;
use thiserror::Error;

use crate::core::session::ExecContext;

pub mod script;

pub use script::ScriptRuntime;

/// The runtime could not be initialized; the session is unusable
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct BootFailure {
    pub message: String,
}

impl BootFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// User code raised an error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct EvaluationFault {
    pub message: String,
}

impl EvaluationFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait Runtime: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Initialize the runtime. Called once per session.
    async fn boot(&self) -> Result<(), BootFailure>;

    /// Evaluate source text, returning the value of the final expression
    async fn evaluate(
        &self,
        source: &str,
        ctx: &ExecContext,
    ) -> Result<Option<String>, EvaluationFault>;

    /// Fetch and install a package by name
    async fn install_package(&self, name: &str) -> Result<(), EvaluationFault>;
}
