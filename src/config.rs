//! Router and server configuration.
//!
//! Both structs have working defaults and can be loaded from environment
//! variables with `from_env`, or deserialized from any serde format.

use std::time::Duration;

use serde::Deserialize;

/// Fallback behaviour of a [`Router`](crate::Router).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Redirect to the path with or without a trailing slash when only that
    /// variant has a route. `301` for `GET`, `307` otherwise.
    pub redirect_trailing_slash: bool,

    /// Clean the path and retry a case-insensitive lookup, redirecting to
    /// the registered spelling on a hit.
    pub redirect_fixed_path: bool,

    /// Answer `405 Method Not Allowed` when another method matches the path.
    pub handle_method_not_allowed: bool,

    /// Answer `OPTIONS` requests automatically with an `Allow` header.
    pub handle_options: bool,

    /// Released contexts kept for reuse.
    pub max_idle_contexts: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            redirect_trailing_slash: true,
            redirect_fixed_path: true,
            handle_method_not_allowed: true,
            handle_options: true,
            max_idle_contexts: 1024,
        }
    }
}

impl RouterConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `WEND_REDIRECT_TRAILING_SLASH` | `true` |
    /// | `WEND_REDIRECT_FIXED_PATH` | `true` |
    /// | `WEND_HANDLE_METHOD_NOT_ALLOWED` | `true` |
    /// | `WEND_HANDLE_OPTIONS` | `true` |
    /// | `WEND_MAX_IDLE_CONTEXTS` | `1024` |
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("WEND_REDIRECT_TRAILING_SLASH") {
            config.redirect_trailing_slash = parse_bool(&v);
        }
        if let Ok(v) = std::env::var("WEND_REDIRECT_FIXED_PATH") {
            config.redirect_fixed_path = parse_bool(&v);
        }
        if let Ok(v) = std::env::var("WEND_HANDLE_METHOD_NOT_ALLOWED") {
            config.handle_method_not_allowed = parse_bool(&v);
        }
        if let Ok(v) = std::env::var("WEND_HANDLE_OPTIONS") {
            config.handle_options = parse_bool(&v);
        }
        if let Ok(v) = std::env::var("WEND_MAX_IDLE_CONTEXTS") {
            if let Ok(n) = v.parse::<usize>() {
                config.max_idle_contexts = n;
            }
        }

        config
    }
}

/// Connection-level limits of a [`Server`](crate::Server).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Upper bound on reading the request body. Expiry answers `408`.
    pub read_timeout: Option<Duration>,

    /// Upper bound on producing the response. Expiry answers `503`.
    pub write_timeout: Option<Duration>,

    /// Upper bound on reading HTTP/1 request headers.
    pub read_header_timeout: Option<Duration>,

    /// How long a graceful shutdown waits for in-flight connections before
    /// closing them.
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            read_timeout: None,
            write_timeout: None,
            read_header_timeout: None,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables. Durations are in
    /// milliseconds; unset means no limit.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `WEND_READ_TIMEOUT_MS` | unset |
    /// | `WEND_WRITE_TIMEOUT_MS` | unset |
    /// | `WEND_READ_HEADER_TIMEOUT_MS` | unset |
    /// | `WEND_SHUTDOWN_TIMEOUT_MS` | `30000` |
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(d) = env_millis("WEND_READ_TIMEOUT_MS") {
            config.read_timeout = Some(d);
        }
        if let Some(d) = env_millis("WEND_WRITE_TIMEOUT_MS") {
            config.write_timeout = Some(d);
        }
        if let Some(d) = env_millis("WEND_READ_HEADER_TIMEOUT_MS") {
            config.read_header_timeout = Some(d);
        }
        if let Some(d) = env_millis("WEND_SHUTDOWN_TIMEOUT_MS") {
            config.shutdown_timeout = d;
        }

        config
    }
}

/// Parse a string as a boolean, accepting `"1"` and `"true"` (case-insensitive).
fn parse_bool(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

fn env_millis(key: &str) -> Option<Duration> {
    let v = std::env::var(key).ok()?;
    v.trim().parse::<u64>().ok().map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_defaults() {
        let config = RouterConfig::default();
        assert!(config.redirect_trailing_slash);
        assert!(config.redirect_fixed_path);
        assert!(config.handle_method_not_allowed);
        assert!(config.handle_options);
        assert_eq!(config.max_idle_contexts, 1024);
    }

    #[test]
    fn server_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.read_timeout, None);
        assert_eq!(config.write_timeout, None);
        assert_eq!(config.read_header_timeout, None);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: RouterConfig =
            serde_json::from_str(r#"{"redirect_fixed_path":false,"max_idle_contexts":8}"#).unwrap();
        assert!(!config.redirect_fixed_path);
        assert!(config.redirect_trailing_slash);
        assert_eq!(config.max_idle_contexts, 8);
    }

    #[test]
    fn parses_booleans() {
        assert!(parse_bool("1"));
        assert!(parse_bool("TRUE"));
        assert!(!parse_bool("yes"));
        assert!(!parse_bool("0"));
    }

    #[test]
    fn loads_from_env() {
        let config = RouterConfig::from_env();
        assert!(config.max_idle_contexts > 0 || std::env::var("WEND_MAX_IDLE_CONTEXTS").is_ok());
        let _ = ServerConfig::from_env();
    }
}
