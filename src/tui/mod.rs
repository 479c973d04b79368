//! Full-screen console panel built on Ratatui.

pub mod app;
pub mod editor;
pub mod events;
pub mod handler;
pub mod ui;

pub use handler::run_tui_repl;
