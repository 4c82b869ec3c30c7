//! Minimal runtime configuration helpers.
//! Defaults match a single-host deployment (Raspberry Pi next to the OBD
//! adapter, API server on the same box).

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_DATABASE_URL: &str = "readings.db";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";
pub const DEFAULT_INGEST_URL: &str = "http://localhost:8000";
pub const DEFAULT_DEVICE_PATH: &str = "/dev/rfcomm0";
pub const DEFAULT_BAUD_RATE: u32 = 38400;
pub const DEFAULT_TICK_SECS: u64 = 1;
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Configuration for the acquisition loop binary.
#[derive(Debug, Clone)]
pub struct AcquireConfig {
    /// Serial device path of the ELM327 adapter. A missing device triggers
    /// the simulated fallback rather than a startup failure.
    pub device_path: String,
    pub baud_rate: u32,
    /// Acquisition cadence; one reading is emitted per tick.
    pub tick_interval: Duration,
    /// Consecutive poll failures before a forced reconnect cycle.
    pub failure_threshold: u32,
    /// Base URL of the ingestion API. `None` disables posting (stdout only).
    pub ingest_url: Option<String>,
}

impl AcquireConfig {
    pub fn from_env() -> Result<Self, String> {
        let device_path = std::env::var("OBD_DEVICE").unwrap_or_else(|_| DEFAULT_DEVICE_PATH.to_string());

        let baud_rate = match std::env::var("OBD_BAUD_RATE") {
            Ok(s) => s
                .parse::<u32>()
                .map_err(|_| "OBD_BAUD_RATE must be a positive integer".to_string())?,
            Err(_) => DEFAULT_BAUD_RATE,
        };

        let tick_secs = std::env::var("TICK_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TICK_SECS);

        let failure_threshold = std::env::var("FAILURE_THRESHOLD")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_FAILURE_THRESHOLD);

        // Empty string disables the API sink (stdout-only mode).
        let ingest_url = match std::env::var("INGEST_URL") {
            Ok(v) if v.trim().is_empty() => None,
            Ok(v) => Some(v.trim().trim_end_matches('/').to_string()),
            Err(_) => Some(DEFAULT_INGEST_URL.to_string()),
        };

        Ok(AcquireConfig {
            device_path,
            baud_rate,
            tick_interval: Duration::from_secs(tick_secs.max(1)),
            failure_threshold,
            ingest_url,
        })
    }
}

/// Configuration for the API server binary.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// SQLite database path (a file path, not a URL scheme).
    pub database_url: String,
    pub bind_addr: SocketAddr,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, String> {
        let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());

        let bind_raw = std::env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_raw
            .parse::<SocketAddr>()
            .map_err(|_| format!("BIND_ADDR is not a valid socket address: {}", bind_raw))?;

        Ok(ServerConfig { database_url, bind_addr })
    }
}

#[derive(Debug)]
pub struct LoadedEnvFile {
    pub path: PathBuf,
    pub explicit: bool,
}

/// Process `--env-file <path>` from the command line, falling back to a
/// `.env` in the working directory. Values already present in the process
/// environment take precedence.
pub fn configure_env_from_cli() -> Result<Option<LoadedEnvFile>, String> {
    let mut args = std::env::args_os();
    args.next(); // skip program name

    let mut env_file: Option<PathBuf> = None;

    while let Some(arg) = args.next() {
        match arg.to_str() {
            Some("--env-file") => {
                if env_file.is_some() {
                    return Err("`--env-file` provided more than once".to_string());
                }
                let value = args
                    .next()
                    .ok_or_else(|| "`--env-file` requires a path argument".to_string())?;
                env_file = Some(PathBuf::from(value));
            }
            Some(s) if s.starts_with("--env-file=") => {
                if env_file.is_some() {
                    return Err("`--env-file` provided more than once".to_string());
                }
                let path_str = &s["--env-file=".len()..];
                if path_str.is_empty() {
                    return Err("`--env-file` requires a path argument".to_string());
                }
                env_file = Some(PathBuf::from(path_str));
            }
            Some("--") => break,
            Some(other) => return Err(format!("unrecognised argument: {}", other)),
            None => return Err("argument contains invalid UTF-8".to_string()),
        }
    }

    if let Some(path) = env_file {
        if !path.is_file() {
            return Err(format!("env file not found: {}", path.display()));
        }
        load_env_file(&path)?;
        Ok(Some(LoadedEnvFile { path, explicit: true }))
    } else {
        let cwd = std::env::current_dir().map_err(|e| format!("unable to read current directory: {}", e))?;
        let default_path = cwd.join(".env");
        if default_path.is_file() {
            load_env_file(&default_path)?;
            Ok(Some(LoadedEnvFile {
                path: default_path,
                explicit: false,
            }))
        } else {
            Ok(None)
        }
    }
}

fn load_env_file(path: &Path) -> Result<(), String> {
    use std::fs::File;
    use std::io::{BufRead, BufReader};

    let file = File::open(path).map_err(|e| format!("failed to open {}: {}", path.display(), e))?;
    let reader = BufReader::new(file);

    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| format!("failed to read {} at line {}: {}", path.display(), index + 1, e))?;
        match parse_env_assignment(&line) {
            Ok(Some((key, value))) => {
                // Preserve any value that was already supplied via the process environment.
                if std::env::var_os(&key).is_none() {
                    // Updating process-level environment variables is unsafe on some targets.
                    unsafe {
                        std::env::set_var(key, value);
                    }
                }
            }
            Ok(None) => {}
            Err(e) => {
                return Err(format!("{}:{}: {}", path.display(), index + 1, e));
            }
        }
    }

    Ok(())
}

fn parse_env_assignment(line: &str) -> Result<Option<(String, String)>, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let without_export = trimmed
        .strip_prefix("export ")
        .map(|s| s.trim_start())
        .unwrap_or(trimmed);

    let mut parts = without_export.splitn(2, '=');
    let key = parts
        .next()
        .map(str::trim)
        .ok_or_else(|| "missing environment variable name".to_string())?;
    let value_part = parts.next().ok_or_else(|| "missing '=' in assignment".to_string())?;

    if key.is_empty() {
        return Err("environment variable name cannot be empty".to_string());
    }
    if key.chars().any(|c| c.is_whitespace()) {
        return Err(format!("environment variable name contains whitespace: {}", key));
    }

    let value = parse_env_value(value_part)?;
    Ok(Some((key.to_string(), value)))
}

fn parse_env_value(raw: &str) -> Result<String, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(String::new());
    }

    if let Some(rest) = trimmed.strip_prefix('"') {
        parse_double_quoted(rest)
    } else if let Some(rest) = trimmed.strip_prefix('\'') {
        parse_single_quoted(rest)
    } else {
        let value = trimmed.splitn(2, '#').next().unwrap_or_default().trim_end();
        Ok(value.to_string())
    }
}

fn parse_double_quoted(input: &str) -> Result<String, String> {
    let mut result = String::new();
    let mut chars = input.chars();
    let mut escape = false;

    while let Some(ch) = chars.next() {
        if escape {
            let value = match ch {
                'n' => '\n',
                'r' => '\r',
                't' => '\t',
                '\\' => '\\',
                '"' => '"',
                other => other,
            };
            result.push(value);
            escape = false;
            continue;
        }

        match ch {
            '\\' => escape = true,
            '"' => {
                let remainder = chars.as_str().trim();
                if remainder.is_empty() || remainder.starts_with('#') {
                    return Ok(result);
                } else {
                    return Err("unexpected characters after closing double quote".to_string());
                }
            }
            other => result.push(other),
        }
    }

    if escape {
        Err("unterminated escape sequence in double-quoted value".to_string())
    } else {
        Err("unterminated double-quoted value".to_string())
    }
}

fn parse_single_quoted(input: &str) -> Result<String, String> {
    let mut result = String::new();
    let mut chars = input.chars();

    while let Some(ch) = chars.next() {
        if ch == '\'' {
            let remainder = chars.as_str().trim();
            if remainder.is_empty() || remainder.starts_with('#') {
                return Ok(result);
            } else {
                return Err("unexpected characters after closing single quote".to_string());
            }
        } else {
            result.push(ch);
        }
    }

    Err("unterminated single-quoted value".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignment_parsing_handles_quotes_and_comments() {
        assert_eq!(parse_env_assignment("# comment").unwrap(), None);
        assert_eq!(parse_env_assignment("   ").unwrap(), None);
        assert_eq!(
            parse_env_assignment("OBD_DEVICE=/dev/rfcomm0 # trailing").unwrap(),
            Some(("OBD_DEVICE".to_string(), "/dev/rfcomm0".to_string()))
        );
        assert_eq!(
            parse_env_assignment("export BIND_ADDR=\"0.0.0.0:8000\"").unwrap(),
            Some(("BIND_ADDR".to_string(), "0.0.0.0:8000".to_string()))
        );
        assert_eq!(
            parse_env_assignment("NAME='single # not a comment'").unwrap(),
            Some(("NAME".to_string(), "single # not a comment".to_string()))
        );
        assert!(parse_env_assignment("NO_EQUALS").is_err());
        assert!(parse_env_assignment("BAD KEY=1").is_err());
    }
}
