//! # Configuration
//!
//! Controller and server settings read from environment variables, with
//! defaults from [`crate::constants`].

mod controller;
mod server;

pub use controller::{ControllerConfig, RequeueIntervals};
pub use server::ServerConfig;

use std::str::FromStr;
use tracing::warn;

/// Parse `name` from the environment, falling back to `default` when unset or invalid
pub fn env_var_or_default<T>(name: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(
                    variable = name,
                    value = %raw,
                    default = %default,
                    "Invalid value in environment variable, using default"
                );
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_or_default_unset() {
        assert_eq!(env_var_or_default("LIFECYCLE_MANAGER_TEST_UNSET_VAR", 42u64), 42);
    }

    #[test]
    fn test_env_var_or_default_invalid_falls_back() {
        // SAFETY: test-local variable name, not read concurrently by other tests
        unsafe { std::env::set_var("LIFECYCLE_MANAGER_TEST_INVALID_VAR", "not-a-number") };
        assert_eq!(env_var_or_default("LIFECYCLE_MANAGER_TEST_INVALID_VAR", 7u16), 7);
        unsafe { std::env::remove_var("LIFECYCLE_MANAGER_TEST_INVALID_VAR") };
    }
}
