// src/utils/env.rs
use log::{info, warn};

/// Loads `.env` if present. Variables already set in the environment win.
pub fn load_env() {
    match dotenv::dotenv() {
        Ok(path) => info!("Loaded environment from {}", path.display()),
        Err(e) => warn!(
            "No .env file loaded ({}). Proceeding with system environment variables.",
            e
        ),
    }
}

/// Reads a typed env var, falling back to `default` when unset or unparsable.
pub fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    parse_or(std::env::var(key).ok(), default)
}

/// Process environment as a lookup function, for `from_lookup` constructors.
pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

pub fn parse_or<T: std::str::FromStr>(raw: Option<String>, default: T) -> T {
    raw.and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_or_trims_and_falls_back() {
        assert_eq!(parse_or(Some(" 42 ".to_string()), 7u32), 42);
        assert_eq!(parse_or(Some("forty".to_string()), 7u32), 7);
        assert!(parse_or::<bool>(None, true));
    }
}
