//! Runtime environment selection
//!
//! The active environment decides which env-specific config class is merged
//! for each bundle (`DevConfig`, `ProdConfig`, `StagingConfig` or
//! `TestConfig`). It is read from `FLASK_ENV`; `FLASK_DEBUG` independently
//! forces the debug flag on or off.

use std::{fmt, str::FromStr};

use crate::error::{Error, Result};

/// Environment variable selecting the active [`Env`]
pub const ENV_VAR: &str = "FLASK_ENV";

/// Environment variable forcing the debug flag
pub const DEBUG_VAR: &str = "FLASK_DEBUG";

/// The environment an application is booted for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Env {
    Development,
    #[default]
    Production,
    Staging,
    Test,
}

impl Env {
    /// All environments, in declaration order
    pub const ALL: [Self; 4] = [
        Self::Development,
        Self::Production,
        Self::Staging,
        Self::Test,
    ];

    /// Read the environment from `FLASK_ENV`, defaulting to production
    pub fn from_environment() -> Result<Self> {
        match std::env::var(ENV_VAR) {
            Ok(value) if !value.trim().is_empty() => value.parse(),
            _ => Ok(Self::default()),
        }
    }

    /// Canonical lowercase name, as accepted by `FLASK_ENV`
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Staging => "staging",
            Self::Test => "test",
        }
    }

    /// Name of the env-specific config class merged for this environment
    pub const fn config_class_name(&self) -> &'static str {
        match self {
            Self::Development => "DevConfig",
            Self::Production => "ProdConfig",
            Self::Staging => "StagingConfig",
            Self::Test => "TestConfig",
        }
    }

    /// Whether debug mode is on by default in this environment
    pub const fn default_debug(&self) -> bool {
        matches!(self, Self::Development | Self::Test)
    }
}

impl FromStr for Env {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "staging" => Ok(Self::Staging),
            "test" => Ok(Self::Test),
            _ => Err(Error::InvalidEnv {
                value: value.to_owned(),
            }),
        }
    }
}

impl fmt::Display for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read `FLASK_DEBUG`, returning `None` when it is unset
pub fn debug_from_environment() -> Option<bool> {
    std::env::var(DEBUG_VAR).ok().map(|value| is_truthy(&value))
}

/// Interpret a flag-like string the way shells and dotenv files spell booleans
pub fn is_truthy(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "" | "0" | "false" | "no" | "off" | "n"
    )
}

/// A scoped guard for setting an environment variable and restoring it on drop.
///
/// Tests that exercise `FLASK_ENV` or `FLASK_DEBUG` hold one of these (and run
/// under `serial_test`) so the process environment is restored even if the
/// test panics.
///
/// ```rust
/// use unchained::env::EnvVarGuard;
/// let _guard = EnvVarGuard::set("FLASK_ENV", "test");
/// // FLASK_ENV is "test" until _guard goes out of scope
/// ```
#[must_use = "EnvVarGuard must be held in scope to ensure cleanup"]
#[derive(Debug)]
pub struct EnvVarGuard {
    key: &'static str,
    /// The original value, `None` if the variable was unset
    original_value: Option<String>,
}

impl EnvVarGuard {
    /// Set `key` to `value` until the guard is dropped
    pub fn set(key: &'static str, value: &str) -> Self {
        let original_value = std::env::var(key).ok();

        // SAFETY: only used from serialized tests and single-threaded CLI startup;
        // the original value is restored on drop.
        unsafe {
            std::env::set_var(key, value);
        }

        Self {
            key,
            original_value,
        }
    }

    /// Remove `key` until the guard is dropped
    pub fn unset(key: &'static str) -> Self {
        let original_value = std::env::var(key).ok();

        // SAFETY: see `EnvVarGuard::set`
        unsafe {
            std::env::remove_var(key);
        }

        Self {
            key,
            original_value,
        }
    }
}

impl Drop for EnvVarGuard {
    fn drop(&mut self) {
        // Restore even while unwinding; a second panic here would abort.
        #[allow(clippy::disallowed_methods)]
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            // SAFETY: restores the environment to its state before the guard
            unsafe {
                match self.original_value.take() {
                    Some(original) => std::env::set_var(self.key, original),
                    None => std::env::remove_var(self.key),
                }
            }
        }));
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    #[test]
    fn test_parse_aliases() {
        assert_eq!("dev".parse::<Env>().unwrap(), Env::Development);
        assert_eq!("Development".parse::<Env>().unwrap(), Env::Development);
        assert_eq!("prod".parse::<Env>().unwrap(), Env::Production);
        assert_eq!("staging".parse::<Env>().unwrap(), Env::Staging);
        assert_eq!("test".parse::<Env>().unwrap(), Env::Test);
        assert!(matches!(
            "qa".parse::<Env>(),
            Err(Error::InvalidEnv { value }) if value == "qa"
        ));
    }

    #[test]
    fn test_config_class_names() {
        let names: Vec<_> = Env::ALL.iter().map(Env::config_class_name).collect();
        assert_eq!(names, ["DevConfig", "ProdConfig", "StagingConfig", "TestConfig"]);
    }

    #[test]
    fn test_truthiness() {
        for value in ["1", "true", "yes", "on", "True"] {
            assert!(is_truthy(value), "{value} should be truthy");
        }
        for value in ["", "0", "false", "no", "off", "FALSE"] {
            assert!(!is_truthy(value), "{value} should be falsy");
        }
    }

    #[test]
    #[serial]
    fn test_env_from_environment() {
        {
            let _guard = EnvVarGuard::set(ENV_VAR, "dev");
            assert_eq!(Env::from_environment().unwrap(), Env::Development);
        }
        {
            let _guard = EnvVarGuard::unset(ENV_VAR);
            assert_eq!(Env::from_environment().unwrap(), Env::Production);
        }
        let _guard = EnvVarGuard::set(ENV_VAR, "nope");
        assert!(Env::from_environment().is_err());
    }

    #[test]
    #[serial]
    fn test_debug_from_environment() {
        let _unset = EnvVarGuard::unset(DEBUG_VAR);
        assert_eq!(debug_from_environment(), None);
        let _set = EnvVarGuard::set(DEBUG_VAR, "1");
        assert_eq!(debug_from_environment(), Some(true));
    }
}
