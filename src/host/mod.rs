//! Bindings the standalone console injects into every tab, standing in for
//! the handles a host application would provide.

use std::env;
use std::process;

use tracing::info;

use crate::interp::{ExcType, HostObject, NativeFunction, PyException, Value};
use crate::session::HostBindings;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const DESCRIPTIONS: &[(&str, &str)] = &[
    ("session", "The interpreter session is available via the 'session' variable"),
    ("platform", "A data-platform handle is available via the 'platform' variable"),
    ("context", "Your current context is stored in the 'context' variable"),
    ("engine", "The host engine can be accessed via the 'engine' variable"),
];

fn optional_env(name: &str) -> Value {
    env::var(name).map(|v| Value::str(&v)).unwrap_or(Value::None)
}

fn cwd() -> Value {
    env::current_dir()
        .map(|p| Value::str(&p.display().to_string()))
        .unwrap_or(Value::None)
}

fn session_handle() -> Value {
    let pid = process::id();
    HostObject::new("Session")
        .with_repr(format!("<Session pid={}>", pid))
        .with_attr("pid", Value::Int(i64::from(pid)))
        .with_attr("cwd", cwd())
        .into_value()
}

fn platform_handle() -> Value {
    HostObject::new("Platform")
        .with_repr(format!("<Platform {}-{}>", env::consts::OS, env::consts::ARCH))
        .with_attr("os", Value::str(env::consts::OS))
        .with_attr("arch", Value::str(env::consts::ARCH))
        .with_attr("family", Value::str(env::consts::FAMILY))
        .into_value()
}

fn context_handle() -> Value {
    let project = optional_env("DCC_PROJECT");
    let repr = match &project {
        Value::None => "<Context (no project)>".to_string(),
        other => format!("<Context {}>", other.to_str()),
    };
    HostObject::new("Context")
        .with_repr(repr)
        .with_attr("project", project)
        .with_attr("user", optional_env("USER"))
        .with_attr("cwd", cwd())
        .into_value()
}

fn engine_handle() -> Value {
    HostObject::new("Engine")
        .with_repr(format!("<Engine dcc-console {}>", VERSION))
        .with_attr("name", Value::str("dcc-console"))
        .with_attr("version", Value::str(VERSION))
        .with_attr(
            "log",
            NativeFunction::value("log", |_, args| {
                args.reject_keywords("log")?;
                let message = args
                    .positional
                    .iter()
                    .map(Value::to_str)
                    .collect::<Vec<_>>()
                    .join(" ");
                if message.is_empty() {
                    return Err(PyException::new(
                        ExcType::TypeError,
                        "log() requires a message",
                    ));
                }
                info!(target: "engine", "{}", message);
                Ok(Value::None)
            }),
        )
        .into_value()
}

/// The four handles every standalone tab starts with.
pub fn default_bindings() -> HostBindings {
    HostBindings::new()
        .with_factory("session", session_handle)
        .with_factory("platform", platform_handle)
        .with_factory("context", context_handle)
        .with_factory("engine", engine_handle)
}

/// Greeting written at the top of each tab, listing what was injected.
pub fn welcome_message(bindings: &HostBindings) -> String {
    let mut out = format!("Welcome to the DCC Console!\n\nInterpreter {}\n\n", VERSION);
    for name in bindings.names() {
        match DESCRIPTIONS.iter().find(|(known, _)| *known == name) {
            Some((_, text)) => out.push_str(&format!("- {}\n", text)),
            None => out.push_str(&format!("- '{}' is provided by the host\n", name)),
        }
    }
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::Namespace;

    #[test]
    fn defaults_seed_all_four_handles() {
        let ns = Namespace::new();
        default_bindings().seed(&ns);
        for name in ["session", "platform", "context", "engine"] {
            assert!(ns.contains(name), "missing {}", name);
        }
        assert_eq!(
            ns.get("platform").map(|v| v.type_name().to_string()),
            Some("Platform".to_string())
        );
    }

    #[test]
    fn welcome_lists_each_binding() {
        let bindings = default_bindings().with_value("scene", Value::None);
        let text = welcome_message(&bindings);
        assert!(text.starts_with("Welcome to the DCC Console!"));
        assert!(text.contains("'engine' variable"));
        assert!(text.contains("- 'scene' is provided by the host\n"));
    }
}
