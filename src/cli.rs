use std::path::PathBuf;

use clap::{ArgGroup, Parser};

#[derive(Parser, Debug, Clone)]
#[command(name = "dcc-console", about = "Interactive code console with tabbed sessions", version)]
#[command(group(ArgGroup::new("echo_switch").args(["echo", "no_echo"]).multiple(false)))]
#[command(group(ArgGroup::new("line_numbers_switch").args(["line_numbers", "no_line_numbers"]).multiple(false)))]
pub struct Cli {
    /// Run a script once and print its output instead of opening the panel.
    ///
    /// Piped stdin is treated the same way.
    #[arg(long, value_name = "FILE")]
    pub exec: Option<PathBuf>,

    /// Print batch output as one JSON object per segment.
    #[arg(long)]
    pub json: bool,

    /// Echo executed input into the output.
    #[arg(long)]
    pub echo: bool,
    /// Do not echo executed input.
    #[arg(long = "no-echo")]
    pub no_echo: bool,

    /// Show line numbers in the input editor.
    #[arg(long = "line-numbers")]
    pub line_numbers: bool,
    /// Hide line numbers in the input editor.
    #[arg(long = "no-line-numbers")]
    pub no_line_numbers: bool,

    /// Also write captured output to the real stdout/stderr.
    #[arg(long)]
    pub tee: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long = "log-level")]
    pub log_level: Option<String>,

    /// Maximum call depth before RecursionError.
    #[arg(long = "recursion-limit", value_parser = clap::value_parser!(usize))]
    pub recursion_limit: Option<usize>,

    /// Start with a single fresh tab instead of the saved layout.
    #[arg(long = "no-restore")]
    pub no_restore: bool,

    /// Do not write the welcome message into new tabs.
    #[arg(long = "no-welcome")]
    pub no_welcome: bool,

    /// Where the tab layout is saved on exit.
    #[arg(long = "state-file", value_name = "FILE")]
    pub state_file: Option<PathBuf>,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    /// Resolves a `--flag` / `--no-flag` pair against a configured default.
    pub fn switch(on: bool, off: bool, default: bool) -> bool {
        if off {
            false
        } else if on {
            true
        } else {
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switches_override_the_default() {
        assert!(!Cli::switch(false, true, true));
        assert!(Cli::switch(true, false, false));
        assert!(Cli::switch(false, false, true));
    }

    #[test]
    fn echo_flags_conflict() {
        let parsed = <Cli as Parser>::try_parse_from(["dcc-console", "--echo", "--no-echo"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn batch_flags_parse() {
        let cli = <Cli as Parser>::try_parse_from([
            "dcc-console",
            "--exec",
            "script.py",
            "--json",
            "--recursion-limit",
            "50",
        ])
        .unwrap();
        assert_eq!(cli.exec, Some(PathBuf::from("script.py")));
        assert!(cli.json);
        assert_eq!(cli.recursion_limit, Some(50));
    }
}
