use std::fs;
use std::io::{self, Read};

use anyhow::{anyhow, Context, Result};
use is_terminal::IsTerminal;
use tracing::warn;

use dcc_console::cli::Cli;
use dcc_console::config::Config;
use dcc_console::console::{ConsoleController, ControllerOptions};
use dcc_console::handlers;
use dcc_console::host;
use dcc_console::logger::{self, LogLevel, LogTarget};
use dcc_console::session::{SessionManager, SessionSnapshot, TabDefaults};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    // Load config
    let cfg = Config::load();

    // A script from --exec or piped stdin means batch mode
    let script = if let Some(path) = &args.exec {
        Some(fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?)
    } else if !io::stdin().is_terminal() {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf)?;
        Some(buf)
    } else {
        None
    };
    let batch = script.is_some();

    // Logging: stderr for batch runs, a file under the panel (the screen
    // belongs to the UI)
    let level = match args.log_level.clone().or_else(|| cfg.get("LOG_LEVEL")) {
        Some(name) => name.parse::<LogLevel>().map_err(|e| anyhow!(e))?,
        None => LogLevel::Info,
    };
    if batch {
        logger::init_with_level(level, LogTarget::Stderr)?;
    } else if let Some(path) = cfg.log_file() {
        logger::init_with_level(level, LogTarget::File(&path))?;
    }

    let bindings = host::default_bindings();
    let show_welcome = !batch && !args.no_welcome && cfg.get_bool("SHOW_WELCOME");
    let defaults = TabDefaults {
        echo: if batch {
            args.echo
        } else {
            Cli::switch(args.echo, args.no_echo, cfg.get_bool("CONSOLE_ECHO"))
        },
        line_numbers: Cli::switch(
            args.line_numbers,
            args.no_line_numbers,
            cfg.get_bool("CONSOLE_LINE_NUMBERS"),
        ),
        welcome: show_welcome.then(|| host::welcome_message(&bindings)),
    };
    let options = ControllerOptions {
        tee: args.tee || cfg.get_bool("CONSOLE_TEE"),
        recursion_limit: args
            .recursion_limit
            .or_else(|| cfg.get_usize("RECURSION_LIMIT")),
        reader: None,
    };

    if let Some(source) = script {
        let mut console = ConsoleController::new(SessionManager::new(bindings, defaults), options);
        if handlers::run::run(&mut console, &source, args.json)? {
            std::process::exit(1);
        }
        return Ok(());
    }

    // Resolve the saved tab layout: CLI overrides config
    let state_path = args.state_file.clone().or_else(|| cfg.tab_state_path());
    let restore = !args.no_restore && cfg.get_bool("RESTORE_TABS");
    let sessions = match &state_path {
        Some(path) if restore && path.exists() => match SessionSnapshot::load(path) {
            Ok(snapshot) => SessionManager::restore(bindings, defaults, &snapshot),
            Err(e) => {
                warn!("ignoring saved tabs: {}", e);
                SessionManager::new(bindings, defaults)
            }
        },
        _ => SessionManager::new(bindings, defaults),
    };

    let console = ConsoleController::new(sessions, options);
    handlers::repl::run(console, state_path).await
}
