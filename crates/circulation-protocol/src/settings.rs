// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Layered settings lookup.
//!
//! Every setting is resolved in three tiers: a non-empty environment variable,
//! then a non-empty entry in the properties file, then a compiled default.
//!
//! The properties file uses `key=value` lines (with `#` comments) and is read
//! from `CIRCULATION_PROPERTIES`, or `circulation.properties` in the working
//! directory. A missing file is not an error.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use thiserror::Error;
use tracing::debug;

/// Environment variable naming the properties file.
pub const PROPERTIES_PATH_ENV: &str = "CIRCULATION_PROPERTIES";

/// Properties file used when `CIRCULATION_PROPERTIES` is not set.
pub const DEFAULT_PROPERTIES_PATH: &str = "circulation.properties";

/// Errors raised while loading or interpreting settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read properties file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: dotenvy::Error,
    },

    #[error("invalid value '{value}' for {key}")]
    Invalid { key: String, value: String },
}

/// Key/value pairs loaded from a properties file.
#[derive(Debug, Clone, Default)]
pub struct Properties {
    values: HashMap<String, String>,
}

impl Properties {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load the properties file named by `CIRCULATION_PROPERTIES`, falling back
    /// to `circulation.properties`. Returns an empty set when the file is absent.
    pub fn load() -> Result<Self, SettingsError> {
        let path = std::env::var(PROPERTIES_PATH_ENV)
            .ok()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PROPERTIES_PATH.to_string());

        if !Path::new(&path).exists() {
            debug!(path = %path, "no properties file, using environment and defaults");
            return Ok(Self::empty());
        }
        Self::from_path(&path)
    }

    /// Parse a specific properties file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let read_error = |source| SettingsError::Read {
            path: path.display().to_string(),
            source,
        };

        let mut values = HashMap::new();
        for item in dotenvy::from_path_iter(path).map_err(read_error)? {
            let (key, value) = item.map_err(read_error)?;
            values.insert(key, value);
        }
        debug!(path = %path.display(), entries = values.len(), "loaded properties");
        Ok(Self { values })
    }

    /// Builder-style insert, mostly useful in tests.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Raw, non-empty property value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Resolve a setting from environment, then properties. `None` when neither is set.
    pub fn lookup(&self, env_key: &str, property_key: &str) -> Option<String> {
        std::env::var(env_key)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .or_else(|| self.get(property_key).map(str::to_string))
    }

    /// Resolve a setting, falling back to `default`.
    pub fn resolve(&self, env_key: &str, property_key: &str, default: &str) -> String {
        self.lookup(env_key, property_key)
            .unwrap_or_else(|| default.to_string())
    }

    /// Resolve and parse a setting, falling back to `default` when unset.
    pub fn resolve_parsed<T: FromStr>(
        &self,
        env_key: &str,
        property_key: &str,
        default: T,
    ) -> Result<T, SettingsError> {
        match self.lookup(env_key, property_key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|_| SettingsError::Invalid {
                key: env_key.to_string(),
                value: raw,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::io::Write;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { vars: Vec::new() }
        }

        fn set(&mut self, key: &str, value: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX
            unsafe { env::remove_var(key) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    #[test]
    fn test_environment_wins_over_property() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.set("CIRCULATION_TEST_TIER", "from-env");

        let props = Properties::empty().with("test.tier", "from-props");
        assert_eq!(
            props.resolve("CIRCULATION_TEST_TIER", "test.tier", "default"),
            "from-env"
        );
    }

    #[test]
    fn test_property_then_default() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.remove("CIRCULATION_TEST_TIER");

        let props = Properties::empty().with("test.tier", "from-props");
        assert_eq!(
            props.resolve("CIRCULATION_TEST_TIER", "test.tier", "default"),
            "from-props"
        );
        assert_eq!(
            Properties::empty().resolve("CIRCULATION_TEST_TIER", "test.tier", "default"),
            "default"
        );
    }

    #[test]
    fn test_blank_values_fall_through() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.set("CIRCULATION_TEST_TIER", "   ");

        let props = Properties::empty().with("test.tier", "");
        assert_eq!(
            props.resolve("CIRCULATION_TEST_TIER", "test.tier", "default"),
            "default"
        );
    }

    #[test]
    fn test_resolve_parsed() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.remove("CIRCULATION_TEST_NUMBER");

        let props = Properties::empty().with("test.number", "42");
        let value: u32 = props
            .resolve_parsed("CIRCULATION_TEST_NUMBER", "test.number", 7)
            .unwrap();
        assert_eq!(value, 42);

        let bad = Properties::empty().with("test.number", "many");
        let err = bad
            .resolve_parsed::<u32>("CIRCULATION_TEST_NUMBER", "test.number", 7)
            .unwrap_err();
        assert!(matches!(err, SettingsError::Invalid { value, .. } if value == "many"));
    }

    #[test]
    fn test_from_path_reads_dotted_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# circulation settings").unwrap();
        writeln!(file, "gc.rep=tcp://*:6555").unwrap();
        writeln!(file, "storage.endpoints=tcp://a:1,tcp://b:2").unwrap();

        let props = Properties::from_path(file.path()).unwrap();
        assert_eq!(props.get("gc.rep"), Some("tcp://*:6555"));
        assert_eq!(props.get("storage.endpoints"), Some("tcp://a:1,tcp://b:2"));
        assert_eq!(props.get("missing"), None);
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.set(PROPERTIES_PATH_ENV, "/nonexistent/circulation.properties");

        let props = Properties::load().unwrap();
        assert_eq!(props.get("gc.rep"), None);
    }
}
