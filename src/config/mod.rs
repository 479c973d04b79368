use std::{
    collections::HashMap,
    env, fs,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};

use directories::BaseDirs;

const APP_DIR: &str = "dcc_console";

#[derive(Debug, Clone)]
pub struct Config {
    inner: HashMap<String, String>,
    pub config_path: PathBuf,
}

impl Config {
    pub fn load() -> Self {
        Self::load_from(&default_config_path())
    }

    /// Defaults, then `KEY=VALUE` lines from `config_path`, then the
    /// environment.
    pub fn load_from(config_path: &Path) -> Self {
        let mut map = default_map();

        if let Ok(file) = fs::File::open(config_path) {
            let reader = BufReader::new(file);
            for line in reader.lines().map_while(Result::ok) {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if let Some((k, v)) = line.split_once('=') {
                    map.insert(k.trim().to_string(), v.trim().to_string());
                }
            }
        }

        for (k, v) in env::vars() {
            if is_config_key(&k) {
                map.insert(k, v);
            }
        }

        Self {
            inner: map,
            config_path: config_path.to_path_buf(),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        // ENV first
        if let Ok(v) = env::var(key) {
            return Some(v);
        }
        self.inner.get(key).cloned()
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.inner.insert(key.to_string(), value.into());
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key)
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false)
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.get(key).and_then(|v| v.parse::<usize>().ok())
    }

    pub fn get_path(&self, key: &str) -> Option<PathBuf> {
        self.get(key)
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
    }

    pub fn tab_state_path(&self) -> Option<PathBuf> {
        self.get_path("TAB_STATE_PATH")
    }

    pub fn log_file(&self) -> Option<PathBuf> {
        self.get_path("LOG_FILE")
    }
}

fn is_config_key(k: &str) -> bool {
    const KEYS: &[&str] = &[
        "CONSOLE_ECHO",
        "CONSOLE_LINE_NUMBERS",
        "CONSOLE_TEE",
        "RECURSION_LIMIT",
        "LOG_LEVEL",
        "LOG_FILE",
        "TAB_STATE_PATH",
        "RESTORE_TABS",
        "SHOW_WELCOME",
    ];

    KEYS.contains(&k) || k.starts_with("DCC_CONSOLE_")
}

fn config_base() -> PathBuf {
    BaseDirs::new()
        .map(|b| b.config_dir().to_path_buf())
        .unwrap_or_else(|| env::temp_dir())
        .join(APP_DIR)
}

fn default_config_path() -> PathBuf {
    config_base().join(".consolerc")
}

fn default_map() -> HashMap<String, String> {
    let mut m = HashMap::new();
    let state_dir = BaseDirs::new()
        .map(|b| b.data_local_dir().join(APP_DIR))
        .unwrap_or_else(|| env::temp_dir().join(APP_DIR));

    // Paths
    m.insert(
        "TAB_STATE_PATH".into(),
        state_dir.join("tabs.json").to_string_lossy().into_owned(),
    );
    m.insert(
        "LOG_FILE".into(),
        state_dir.join("console.log").to_string_lossy().into_owned(),
    );

    // Numbers
    m.insert("RECURSION_LIMIT".into(), "100".into());

    // Strings
    m.insert("LOG_LEVEL".into(), "info".into());

    // Bools as strings
    m.insert("CONSOLE_ECHO".into(), "true".into());
    m.insert("CONSOLE_LINE_NUMBERS".into(), "true".into());
    m.insert("CONSOLE_TEE".into(), "false".into());
    m.insert("RESTORE_TABS".into(), "true".into());
    m.insert("SHOW_WELCOME".into(), "true".into());

    m
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rc_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let rc = dir.path().join(".consolerc");
        fs::write(
            &rc,
            "# console settings\n\nDCC_CONSOLE_TEST_ECHO = false\nDCC_CONSOLE_TEST_LIMIT=250\nnot a setting\n",
        )
        .unwrap();

        let cfg = Config::load_from(&rc);
        assert_eq!(cfg.config_path, rc);
        assert!(!cfg.get_bool("DCC_CONSOLE_TEST_ECHO"));
        assert_eq!(cfg.get_usize("DCC_CONSOLE_TEST_LIMIT"), Some(250));
        assert_eq!(cfg.get("not a setting"), None);
    }

    #[test]
    fn missing_rc_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load_from(&dir.path().join("absent"));
        assert_eq!(cfg.get_usize("DCC_CONSOLE_TEST_MISSING"), None);
        assert!(cfg.tab_state_path().is_some());
    }

    #[test]
    fn typed_getters() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = Config::load_from(&dir.path().join("absent"));
        cfg.set("DCC_CONSOLE_TEST_FLAG", "TRUE");
        cfg.set("DCC_CONSOLE_TEST_NUM", "abc");
        cfg.set("DCC_CONSOLE_TEST_PATH", "  ");
        assert!(cfg.get_bool("DCC_CONSOLE_TEST_FLAG"));
        assert_eq!(cfg.get_usize("DCC_CONSOLE_TEST_NUM"), None);
        assert_eq!(cfg.get_path("DCC_CONSOLE_TEST_PATH"), None);
    }
}
