//! Embeddable interactive code console: a small scripting language executed
//! against per-tab namespaces, with stdout/stderr captured into per-tab
//! output sinks.

pub mod cli;
pub mod config;
pub mod console;
pub mod execution;
pub mod handlers;
pub mod host;
pub mod interp;
pub mod logger;
pub mod output;
pub mod printer;
pub mod redirect;
pub mod session;
pub mod tui;
