//! Interactive mode: the full-screen console panel.

use std::io;
use std::path::PathBuf;

use anyhow::Result;
use is_terminal::IsTerminal;
use tracing::info;

use crate::console::ConsoleController;
use crate::tui::run_tui_repl;

pub async fn run(console: ConsoleController, state_path: Option<PathBuf>) -> Result<()> {
    if !io::stdout().is_terminal() {
        eprintln!("Warning: the console panel is not available without a terminal.");
        eprintln!("Use --exec FILE or pipe a script on stdin to run in batch mode.");
        return Err(anyhow::anyhow!("the console panel requires a terminal"));
    }

    info!(tabs = console.sessions().len(), "starting console panel");
    run_tui_repl(console, state_path).await
}
