//! Verification command and timeout resolution.

use std::fs;
use std::path::Path;

use tracing::{debug, warn};

/// Command used when neither the caller nor pyproject.toml names one.
pub const DEFAULT_VERIFY_CMD: &str = "python -m pytest -q";

/// Timeout used when no override is present.
pub const DEFAULT_VERIFY_TIMEOUT_SECS: u64 = 300;

const TIMEOUT_ENV: &str = "MEND_VERIFY_TIMEOUT";

/// Resolved verification settings for one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyConfig {
    command: String,
    timeout_secs: u64,
    /// The command came from an explicit caller override, which disables
    /// the compile-only fallback.
    forced: bool,
}

impl VerifyConfig {
    /// Resolves command and timeout for `root`.
    ///
    /// Command precedence: `explicit_command` > `[tool.mend] verify_cmd` >
    /// [`DEFAULT_VERIFY_CMD`]. Timeout precedence: `explicit_timeout` >
    /// `MEND_VERIFY_TIMEOUT` > `[tool.mend] verify_timeout` >
    /// [`DEFAULT_VERIFY_TIMEOUT_SECS`].
    #[must_use]
    pub fn resolve(
        root: &Path,
        explicit_command: Option<&str>,
        explicit_timeout: Option<u64>,
    ) -> Self {
        let env_timeout = std::env::var(TIMEOUT_ENV).ok();
        Self::resolve_with_env(root, explicit_command, explicit_timeout, env_timeout.as_deref())
    }

    fn resolve_with_env(
        root: &Path,
        explicit_command: Option<&str>,
        explicit_timeout: Option<u64>,
        env_timeout: Option<&str>,
    ) -> Self {
        let tool = read_tool_table(root);
        let command = explicit_command
            .map(str::to_owned)
            .or_else(|| tool.verify_cmd.clone())
            .unwrap_or_else(|| DEFAULT_VERIFY_CMD.to_owned());
        let timeout_secs = explicit_timeout
            .or_else(|| parse_env_timeout(env_timeout))
            .or(tool.verify_timeout)
            .unwrap_or(DEFAULT_VERIFY_TIMEOUT_SECS);
        let config = Self {
            command,
            timeout_secs,
            forced: explicit_command.is_some(),
        };
        debug!(command = %config.command, timeout = config.timeout_secs, "verify config resolved");
        config
    }

    #[inline]
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    #[inline]
    #[must_use]
    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    /// Whether the caller forced the command explicitly.
    #[inline]
    #[must_use]
    pub fn forced(&self) -> bool {
        self.forced
    }
}

#[derive(Debug, Default)]
struct ToolTable {
    verify_cmd: Option<String>,
    verify_timeout: Option<u64>,
}

fn parse_env_timeout(value: Option<&str>) -> Option<u64> {
    let raw = value?.trim();
    match raw.parse::<u64>() {
        Ok(secs) => Some(secs),
        Err(_) => {
            warn!(value = raw, "ignoring unparseable {TIMEOUT_ENV}");
            None
        }
    }
}

/// Reads `[tool.mend]` out of pyproject.toml; anything unreadable is
/// treated as absent.
fn read_tool_table(root: &Path) -> ToolTable {
    let path = root.join("pyproject.toml");
    let Ok(text) = fs::read_to_string(&path) else {
        return ToolTable::default();
    };
    let parsed: toml::Value = match text.parse() {
        Ok(value) => value,
        Err(err) => {
            warn!(file = %path.display(), error = %err, "unparseable pyproject.toml");
            return ToolTable::default();
        }
    };
    let mend = parsed.get("tool").and_then(|tool| tool.get("mend"));
    let Some(mend) = mend else {
        return ToolTable::default();
    };
    ToolTable {
        verify_cmd: mend
            .get("verify_cmd")
            .and_then(toml::Value::as_str)
            .map(str::to_owned),
        verify_timeout: mend
            .get("verify_timeout")
            .and_then(toml::Value::as_integer)
            .and_then(|t| u64::try_from(t).ok()),
    }
}
