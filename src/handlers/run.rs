//! Batch mode: run one script in the active tab and print what it produced.

use std::io;

use anyhow::Result;
use is_terminal::IsTerminal;
use tracing::debug;

use crate::console::ConsoleController;
use crate::printer::{JsonPrinter, TextPrinter};

/// Returns true when the script ended in an error.
pub fn run(console: &mut ConsoleController, source: &str, json: bool) -> Result<bool> {
    let start = console.sessions().active().sink().len();
    let result = console.execute_source(source)?;
    let segments = console.sessions().active().sink().segments_since(start);
    debug!(segments = segments.len(), "batch run finished");

    if json {
        for segment in &segments {
            JsonPrinter.print(segment)?;
        }
    } else {
        let printer = TextPrinter {
            color: io::stdout().is_terminal(),
        };
        for segment in &segments {
            printer.print(segment)?;
        }
    }

    Ok(result.is_some_and(|r| r.is_error()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::ControllerOptions;
    use crate::session::{HostBindings, SessionManager, TabDefaults};

    fn controller() -> ConsoleController {
        let defaults = TabDefaults {
            echo: false,
            ..TabDefaults::default()
        };
        ConsoleController::new(
            SessionManager::new(HostBindings::new(), defaults),
            ControllerOptions::default(),
        )
    }

    #[test]
    fn failing_script_reports_error() {
        let mut console = controller();
        assert!(run(&mut console, "1 / 0", true).unwrap());
    }

    #[test]
    fn clean_script_reports_success() {
        let mut console = controller();
        assert!(!run(&mut console, "x = 2\nprint(x * 3)", true).unwrap());
        assert_eq!(console.sessions().active().output_text(), "6\n");
    }

    #[test]
    fn blank_script_is_not_an_error() {
        let mut console = controller();
        assert!(!run(&mut console, "\n\n", false).unwrap());
    }
}
