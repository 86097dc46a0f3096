// ABOUTME: Connection parameter loading from KEY=value environment files
// ABOUTME: Supplies defaults for absent keys and skips malformed lines with a warning

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tokio_postgres::config::SslMode;

const DEFAULT_USER: &str = "default_user";
const DEFAULT_PASSWORD: &str = "default_password";
const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 5432;
const DEFAULT_DB_NAME: &str = "default_db";

/// Connection parameters for one PostgreSQL database.
///
/// Loaded once from an environment file and owned for the lifetime of a sync
/// run. Every field falls back to a documented default when its key is absent.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionParams {
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub ssl_mode: SslMode,
}

impl ConnectionParams {
    /// Load connection parameters from an environment file.
    ///
    /// The file holds `KEY=value` lines. Blank lines and lines starting with
    /// `#` are ignored. Lines without an `=` delimiter are skipped with a
    /// warning. A missing or unreadable file is fatal.
    ///
    /// Recognized keys: `DB_USER`, `DB_PASSWORD`, `DB_HOST`, `DB_PORT`,
    /// `DB_NAME`, `DB_SSL_MODE`.
    pub fn from_env_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read environment file {}", path.display()))?;

        tracing::debug!("Loaded connection parameters from {}", path.display());
        Ok(Self::from_env_lines(&contents))
    }

    /// Parse connection parameters from env-file contents.
    fn from_env_lines(contents: &str) -> Self {
        let mut user = None;
        let mut password = None;
        let mut host = None;
        let mut port = None;
        let mut dbname = None;
        let mut ssl_mode = None;

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                tracing::warn!("Skipping malformed line: {}", line);
                continue;
            };
            match key.trim() {
                "DB_USER" => user = Some(value.to_string()),
                "DB_PASSWORD" => password = Some(value.to_string()),
                "DB_HOST" => host = Some(value.to_string()),
                "DB_PORT" => port = Some(value.to_string()),
                "DB_NAME" => dbname = Some(value.to_string()),
                "DB_SSL_MODE" => ssl_mode = Some(value.to_string()),
                other => tracing::debug!("Ignoring unrecognized key: {}", other),
            }
        }

        let port = match port {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                tracing::warn!("Invalid DB_PORT value {:?}, using {}", raw, DEFAULT_PORT);
                DEFAULT_PORT
            }),
            None => DEFAULT_PORT,
        };

        Self {
            user: user.unwrap_or_else(|| DEFAULT_USER.to_string()),
            password: password.unwrap_or_else(|| DEFAULT_PASSWORD.to_string()),
            host: host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
            dbname: dbname.unwrap_or_else(|| DEFAULT_DB_NAME.to_string()),
            ssl_mode: ssl_mode.map_or(SslMode::Prefer, |raw| parse_ssl_mode(&raw)),
        }
    }
}

/// Map an ssl mode string to the tokio-postgres setting.
///
/// Unknown values are warned about and fall back to `prefer`.
fn parse_ssl_mode(raw: &str) -> SslMode {
    match raw {
        "disable" => SslMode::Disable,
        "prefer" => SslMode::Prefer,
        "require" => SslMode::Require,
        other => {
            tracing::warn!("Unknown DB_SSL_MODE {:?}, using prefer", other);
            SslMode::Prefer
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_for_empty_file() {
        let params = ConnectionParams::from_env_lines("");
        assert_eq!(params.user, "default_user");
        assert_eq!(params.password, "default_password");
        assert_eq!(params.host, "localhost");
        assert_eq!(params.port, 5432);
        assert_eq!(params.dbname, "default_db");
        assert_eq!(params.ssl_mode, SslMode::Prefer);
    }

    #[test]
    fn test_full_file() {
        let contents = "DB_USER=alice\n\
                        DB_PASSWORD=s3cret\n\
                        DB_HOST=db.internal\n\
                        DB_PORT=5433\n\
                        DB_NAME=orders\n\
                        DB_SSL_MODE=require\n";
        let params = ConnectionParams::from_env_lines(contents);
        assert_eq!(params.user, "alice");
        assert_eq!(params.password, "s3cret");
        assert_eq!(params.host, "db.internal");
        assert_eq!(params.port, 5433);
        assert_eq!(params.dbname, "orders");
        assert_eq!(params.ssl_mode, SslMode::Require);
    }

    #[test]
    fn test_comments_and_blank_lines_ignored() {
        let contents = "# production credentials\n\nDB_NAME=prod\n";
        let params = ConnectionParams::from_env_lines(contents);
        assert_eq!(params.dbname, "prod");
        assert_eq!(params.user, "default_user");
    }

    #[test]
    fn test_malformed_line_skipped() {
        let contents = "DB_USER=bob\nthis line has no delimiter\nDB_NAME=mydb\n";
        let params = ConnectionParams::from_env_lines(contents);
        assert_eq!(params.user, "bob");
        assert_eq!(params.dbname, "mydb");
    }

    #[test]
    fn test_value_may_contain_equals() {
        let contents = "DB_PASSWORD=a=b=c\n";
        let params = ConnectionParams::from_env_lines(contents);
        assert_eq!(params.password, "a=b=c");
    }

    #[test]
    fn test_invalid_port_falls_back() {
        let params = ConnectionParams::from_env_lines("DB_PORT=not-a-port\n");
        assert_eq!(params.port, 5432);
    }

    #[test]
    fn test_unknown_ssl_mode_falls_back() {
        let params = ConnectionParams::from_env_lines("DB_SSL_MODE=verify-bogus\n");
        assert_eq!(params.ssl_mode, SslMode::Prefer);
    }
}
