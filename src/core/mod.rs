//! Core terminal emulation and execution components.
//!
//! - **term**: SGR decoding, markup rendering and line composition
//! - **output**: the ordered output log renderers read from
//! - **bridge**: single-slot input rendezvous
//! - **resilience**: substitutes for operations the sandbox cannot perform
//! - **session**: the execution session controller
//!
//! # Architecture
//!
//! ```text
//! Session
//! ├── Runtime (evaluates source, writes through ExecContext)
//! ├── InputBridge (pending input request)
//! ├── CapabilityTable (intercepted operations)
//! └── Compositor
//!     ├── Decoder (ANSI SGR -> styled runs)
//!     └── OutputLog (terminal lines)
//! ```

pub mod bridge;
pub mod output;
pub mod resilience;
pub mod session;
pub mod term;
