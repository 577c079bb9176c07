//! UI layer: the line-oriented chat shell and transcript rendering.

mod command;
pub mod line_source;
pub mod shell;
pub mod transcript;

pub use line_source::StdinLineSource;
pub use shell::ChatShell;
