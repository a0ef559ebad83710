//! Load config from file and environment.

use serde::Deserialize;
use std::path::PathBuf;

/// Client configuration. File: ~/.config/lantern/config.toml or /etc/lantern/config.toml.
/// Env overrides: LANTERN_LISTEN_ADDR, LANTERN_TICK_MILLIS, LANTERN_STATE_FILE.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Transport listen address; the bound address becomes our peer id (default 127.0.0.1:0).
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Length of one core tick in milliseconds (default 1000).
    #[serde(default = "default_tick_millis")]
    pub tick_millis: u64,
    /// History and preferences file (default ~/.local/share/lantern/state.json).
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    /// Show alerts for messages that arrive while away (default true).
    #[serde(default = "default_notifications")]
    pub notifications: bool,
}

fn default_listen_addr() -> String {
    "127.0.0.1:0".to_string()
}
fn default_tick_millis() -> u64 {
    1000
}
fn default_state_file() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(h) => PathBuf::from(h).join(".local/share/lantern/state.json"),
        None => PathBuf::from("lantern-state.json"),
    }
}
fn default_notifications() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            tick_millis: default_tick_millis(),
            state_file: default_state_file(),
            notifications: default_notifications(),
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let c = load_file().unwrap_or_default();
    apply_env(c, |key| std::env::var(key).ok())
}

pub fn parse(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str(s)
}

/// Apply env overrides through `lookup`. Unparseable values are ignored.
fn apply_env(mut c: Config, lookup: impl Fn(&str) -> Option<String>) -> Config {
    if let Some(s) = lookup("LANTERN_LISTEN_ADDR") {
        c.listen_addr = s;
    }
    if let Some(s) = lookup("LANTERN_TICK_MILLIS") {
        match s.parse::<u64>() {
            Ok(ms) if ms > 0 => c.tick_millis = ms,
            _ => tracing::warn!(value = %s, "ignoring invalid LANTERN_TICK_MILLIS"),
        }
    }
    if let Some(s) = lookup("LANTERN_STATE_FILE") {
        c.state_file = PathBuf::from(s);
    }
    c
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/lantern/config.toml"));
    }
    out.push(PathBuf::from("/etc/lantern/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            let s = match std::fs::read_to_string(&p) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(path = %p.display(), error = %e, "cannot read config");
                    break;
                }
            };
            match parse(&s) {
                Ok(c) => return Some(c),
                Err(e) => tracing::warn!(path = %p.display(), error = %e, "invalid config; using defaults"),
            }
            break;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_gives_defaults() {
        let c = parse("").unwrap();
        assert_eq!(c, Config::default());
        assert_eq!(c.tick_millis, 1000);
        assert!(c.notifications);
    }

    #[test]
    fn partial_file() {
        let c = parse("listen_addr = \"0.0.0.0:4500\"\nnotifications = false\n").unwrap();
        assert_eq!(c.listen_addr, "0.0.0.0:4500");
        assert!(!c.notifications);
        assert_eq!(c.tick_millis, 1000);
    }

    #[test]
    fn unknown_field_rejected() {
        assert!(parse("proxy_port = 3128").is_err());
    }

    #[test]
    fn env_overrides() {
        let env: HashMap<&str, &str> = [
            ("LANTERN_LISTEN_ADDR", "127.0.0.1:4600"),
            ("LANTERN_TICK_MILLIS", "250"),
            ("LANTERN_STATE_FILE", "/tmp/lantern.json"),
        ]
        .into_iter()
        .collect();
        let c = apply_env(Config::default(), |k| env.get(k).map(|v| v.to_string()));
        assert_eq!(c.listen_addr, "127.0.0.1:4600");
        assert_eq!(c.tick_millis, 250);
        assert_eq!(c.state_file, PathBuf::from("/tmp/lantern.json"));
    }

    #[test]
    fn bad_env_tick_ignored() {
        let c = apply_env(Config::default(), |k| {
            (k == "LANTERN_TICK_MILLIS").then(|| "0".to_string())
        });
        assert_eq!(c.tick_millis, 1000);
    }
}
