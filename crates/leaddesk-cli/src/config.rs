//! CLI configuration.
//!
//! Loads settings from environment variables with defaults. Command-line
//! flags are applied on top by `main`.

use std::path::PathBuf;
use std::time::Duration;

use leaddesk_store::Variant;

/// Default OAuth redirect target.
pub const DEFAULT_REDIRECT_URL: &str = "http://localhost:5173/dashboard.html";

/// Resolved CLI configuration.
#[derive(Clone)]
pub struct CliConfig {
    /// Store base URL (empty when not configured).
    pub supabase_url: String,
    /// Public API key (empty when not configured).
    pub anon_key: String,
    /// HTTP timeout for store requests.
    pub timeout: Duration,
    /// Marketing variant stamped into submitted leads.
    pub variant: Variant,
    /// Where OAuth sends the browser after sign-in.
    pub redirect_url: String,
    /// Where the signed-in session is persisted between invocations.
    pub session_file: PathBuf,
    /// Log filter used when `RUST_LOG` is unset.
    pub log_level: String,
    /// Direct database connection (only with the `postgres-backend` feature).
    pub database_url: Option<String>,
}

impl std::fmt::Debug for CliConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CliConfig")
            .field("supabase_url", &self.supabase_url)
            .field("anon_key", &"[redacted]")
            .field("timeout", &self.timeout)
            .field("variant", &self.variant)
            .field("redirect_url", &self.redirect_url)
            .field("session_file", &self.session_file)
            .field("log_level", &self.log_level)
            .field("database_url", &self.database_url.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

impl CliConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `LEADDESK_SUPABASE_URL` / `SUPABASE_URL`: store base URL
    /// - `LEADDESK_SUPABASE_ANON_KEY` / `SUPABASE_ANON_KEY`: public API key
    /// - `LEADDESK_TIMEOUT_SECS`: request timeout (default: `10`)
    /// - `LEADDESK_VARIANT`: `base` or `sales` (default: `base`)
    /// - `LEADDESK_REDIRECT_URL`: OAuth redirect (default: [`DEFAULT_REDIRECT_URL`])
    /// - `LEADDESK_SESSION_FILE`: session file (default: `~/.leaddesk/session.json`)
    /// - `LEADDESK_LOG_LEVEL`: log filter (default: `warn`)
    /// - `DATABASE_URL`: `PostgreSQL` connection string
    #[must_use]
    pub fn from_env() -> Self {
        let supabase_url = first_env(&["LEADDESK_SUPABASE_URL", "SUPABASE_URL"]).unwrap_or_default();
        let anon_key =
            first_env(&["LEADDESK_SUPABASE_ANON_KEY", "SUPABASE_ANON_KEY"]).unwrap_or_default();

        let timeout = std::env::var("LEADDESK_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map_or(Duration::from_secs(10), Duration::from_secs);

        let variant = std::env::var("LEADDESK_VARIANT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_default();

        let redirect_url = first_env(&["LEADDESK_REDIRECT_URL"])
            .unwrap_or_else(|| DEFAULT_REDIRECT_URL.to_owned());

        let session_file = first_env(&["LEADDESK_SESSION_FILE"])
            .map_or_else(default_session_file, PathBuf::from);

        let log_level = first_env(&["LEADDESK_LOG_LEVEL"]).unwrap_or_else(|| "warn".to_owned());

        let database_url = first_env(&["DATABASE_URL"]);

        Self {
            supabase_url,
            anon_key,
            timeout,
            variant,
            redirect_url,
            session_file,
            log_level,
            database_url,
        }
    }

    /// Whether the Supabase store has both a URL and a key.
    #[must_use]
    pub fn store_configured(&self) -> bool {
        !self.supabase_url.trim().is_empty() && !self.anon_key.trim().is_empty()
    }
}

/// First set, non-blank variable among `names`.
fn first_env(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|value| !value.trim().is_empty())
}

fn default_session_file() -> PathBuf {
    std::env::var_os("HOME")
        .map_or_else(|| PathBuf::from("."), PathBuf::from)
        .join(".leaddesk")
        .join("session.json")
}
