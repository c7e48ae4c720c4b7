//! User interface rendering.
//!
//! - **renderer**: streams the output log to a console with crossterm

pub mod renderer;

pub use renderer::ConsoleRenderer;
