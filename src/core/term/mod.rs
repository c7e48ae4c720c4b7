//! Terminal text handling
//!
//! Decodes ANSI SGR sequences into styled runs and composes stream output
//! into terminal lines.

pub mod compositor;
pub mod decoder;
pub mod markup;
pub mod style;

pub use compositor::Compositor;
pub use decoder::{decode, Decoded};
pub use markup::to_markup;
pub use style::{AttrFlags, Color, LineId, LineKind, Style, StyledRun, TerminalLine};
