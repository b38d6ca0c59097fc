//! Database configuration resolved from the environment.
//!
//! The backend is chosen once here; everything downstream dispatches on the
//! resulting [`BackendConfig`] variant.

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgSslMode};
use tracing::warn;

use crate::error::ConfigError;

pub const ENV_DRIVER: &str = "DB_DRIVER";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_HOST: &str = "DB_HOST";
pub const ENV_PORT: &str = "DB_PORT";
pub const ENV_USER: &str = "DB_USER";
pub const ENV_PASSWORD: &str = "DB_PASSWORD";
pub const ENV_DB_NAME: &str = "DB_NAME";
pub const ENV_SSL_MODE: &str = "DB_SSL_MODE";
pub const ENV_REQUIRE_PASSWORD: &str = "DB_REQUIRE_PASSWORD";
pub const ENV_SQLITE_PATH: &str = "DB_SQLITE_PATH";
pub const ENV_DATA_ROOT: &str = "DB_DATA_ROOT";
pub const ENV_EMBEDDED_PORT: &str = "DB_EMBEDDED_PORT";
pub const ENV_CONNECT_TIMEOUT_MS: &str = "DB_CONNECT_TIMEOUT_MS";

pub const DEFAULT_DATA_ROOT: &str = "database";
pub const PG_DATA_DIR: &str = "postgres_data";
pub const CREDENTIAL_FILE: &str = ".pgpassword";
pub const SQLITE_FILE: &str = "reesource_tracker.db";

pub const DEFAULT_DB_NAME: &str = "reesource_tracker";
pub const DEFAULT_PG_PORT: u16 = 5432;
pub const DEFAULT_PG_USER: &str = "postgres";
pub const DEFAULT_PG_PASSWORD: &str = "postgres";
/// Keeps the self-managed instance off the conventional port of a system install.
pub const EMBEDDED_PG_PORT: u16 = 5433;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;

const SQLITE_MEMORY: &str = ":memory:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Sqlite,
    Postgres,
}

impl BackendKind {
    /// Map a `DB_DRIVER` token. Unknown tokens fall back to SQLite with a warning.
    pub fn from_token(token: Option<&str>) -> Self {
        let Some(raw) = token.map(str::trim).filter(|t| !t.is_empty()) else {
            return BackendKind::Sqlite;
        };

        match raw.to_ascii_lowercase().as_str() {
            "sqlite" => BackendKind::Sqlite,
            "postgres" | "postgresql" => BackendKind::Postgres,
            _ => {
                warn!(driver = raw, "unknown DB_DRIVER, defaulting to sqlite");
                BackendKind::Sqlite
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Sqlite => "sqlite",
            BackendKind::Postgres => "postgres",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SslMode {
    Disable,
    Allow,
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

impl FromStr for SslMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disable" => Ok(SslMode::Disable),
            "allow" => Ok(SslMode::Allow),
            "prefer" => Ok(SslMode::Prefer),
            "require" => Ok(SslMode::Require),
            "verify-ca" => Ok(SslMode::VerifyCa),
            "verify-full" => Ok(SslMode::VerifyFull),
            _ => Err(ConfigError::InvalidSslMode {
                value: s.to_string(),
            }),
        }
    }
}

impl From<SslMode> for PgSslMode {
    fn from(mode: SslMode) -> Self {
        match mode {
            SslMode::Disable => PgSslMode::Disable,
            SslMode::Allow => PgSslMode::Allow,
            SslMode::Prefer => PgSslMode::Prefer,
            SslMode::Require => PgSslMode::Require,
            SslMode::VerifyCa => PgSslMode::VerifyCa,
            SslMode::VerifyFull => PgSslMode::VerifyFull,
        }
    }
}

/// Fixed on-disk layout under the data root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pg_data_dir(&self) -> PathBuf {
        self.root.join(PG_DATA_DIR)
    }

    /// Sibling of the engine data directory so engine init/cleanup never touches it.
    pub fn credential_file(&self) -> PathBuf {
        self.root.join(CREDENTIAL_FILE)
    }

    pub fn sqlite_file(&self) -> PathBuf {
        self.root.join(SQLITE_FILE)
    }
}

impl Default for DataLayout {
    fn default() -> Self {
        Self::new(DEFAULT_DATA_ROOT)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqliteTarget {
    File(PathBuf),
    Memory,
}

/// Parameters for an externally managed server.
#[derive(Clone, PartialEq, Eq)]
pub struct PgParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub db_name: String,
    pub ssl_mode: SslMode,
}

impl PgParams {
    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.db_name)
            .ssl_mode(self.ssl_mode.into())
    }
}

impl fmt::Debug for PgParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("db_name", &self.db_name)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// A server process owned by this process, bound to a local data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfManaged {
    pub data_dir: PathBuf,
    pub credential_file: PathBuf,
    pub port: u16,
    pub user: String,
    pub db_name: String,
}

#[derive(Clone, PartialEq, Eq)]
pub enum PostgresTarget {
    /// Full connection URL, used as given.
    Url(String),
    External(PgParams),
    SelfManaged(SelfManaged),
}

impl fmt::Debug for PostgresTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PostgresTarget::Url(url) => f
                .debug_tuple("Url")
                .field(&crate::infra::db::core::sanitize_db_url(url))
                .finish(),
            PostgresTarget::External(params) => f.debug_tuple("External").field(params).finish(),
            PostgresTarget::SelfManaged(sm) => f.debug_tuple("SelfManaged").field(sm).finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    Sqlite(SqliteTarget),
    Postgres(PostgresTarget),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub backend: BackendConfig,
    pub layout: DataLayout,
    pub connect_timeout: Duration,
}

impl DbConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(|key| env::var(key).ok(), None)
    }

    /// Like [`DbConfig::from_env`], but `backend` overrides `DB_DRIVER`.
    pub fn from_env_for(backend: BackendKind) -> Result<Self, ConfigError> {
        Self::load(|key| env::var(key).ok(), Some(backend))
    }

    /// Resolve configuration through `lookup`. Blank values count as unset.
    /// Values are trimmed, except `DB_PASSWORD` which is taken verbatim.
    pub fn load<F>(lookup: F, backend: Option<BackendKind>) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let verbatim = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let kind = backend.unwrap_or_else(|| BackendKind::from_token(var(ENV_DRIVER).as_deref()));
        let layout = DataLayout::new(var(ENV_DATA_ROOT).unwrap_or_else(|| DEFAULT_DATA_ROOT.to_string()));
        let connect_timeout = Duration::from_millis(parse_number(
            ENV_CONNECT_TIMEOUT_MS,
            var(ENV_CONNECT_TIMEOUT_MS),
            DEFAULT_CONNECT_TIMEOUT_MS,
        )?);

        let backend = match kind {
            BackendKind::Sqlite => BackendConfig::Sqlite(match var(ENV_SQLITE_PATH) {
                Some(path) if path == SQLITE_MEMORY => SqliteTarget::Memory,
                Some(path) => SqliteTarget::File(PathBuf::from(path)),
                None => SqliteTarget::File(layout.sqlite_file()),
            }),
            BackendKind::Postgres => BackendConfig::Postgres(postgres_target(&var, &verbatim, &layout)?),
        };

        Ok(Self {
            backend,
            layout,
            connect_timeout,
        })
    }

    pub fn kind(&self) -> BackendKind {
        match self.backend {
            BackendConfig::Sqlite(_) => BackendKind::Sqlite,
            BackendConfig::Postgres(_) => BackendKind::Postgres,
        }
    }
}

fn postgres_target<V, R>(
    var: &V,
    verbatim: &R,
    layout: &DataLayout,
) -> Result<PostgresTarget, ConfigError>
where
    V: Fn(&str) -> Option<String>,
    R: Fn(&str) -> Option<String>,
{
    let db_name = var(ENV_DB_NAME).unwrap_or_else(|| DEFAULT_DB_NAME.to_string());

    if let Some(url) = var(ENV_DATABASE_URL) {
        PgConnectOptions::from_str(&url).map_err(|e| ConfigError::InvalidUrl {
            message: e.to_string(),
        })?;
        return Ok(PostgresTarget::Url(url));
    }

    let Some(host) = var(ENV_HOST) else {
        return Ok(PostgresTarget::SelfManaged(SelfManaged {
            data_dir: layout.pg_data_dir(),
            credential_file: layout.credential_file(),
            port: parse_port(ENV_EMBEDDED_PORT, var(ENV_EMBEDDED_PORT), EMBEDDED_PG_PORT)?,
            user: DEFAULT_PG_USER.to_string(),
            db_name,
        }));
    };

    let port = parse_port(ENV_PORT, var(ENV_PORT), DEFAULT_PG_PORT)?;
    let ssl_mode = match var(ENV_SSL_MODE) {
        Some(mode) => mode.parse()?,
        None => SslMode::Disable,
    };
    let require_password = parse_bool(ENV_REQUIRE_PASSWORD, var(ENV_REQUIRE_PASSWORD))?;

    let password = match verbatim(ENV_PASSWORD) {
        Some(password) => password,
        None if require_password => return Err(ConfigError::MissingPassword),
        None => {
            warn!(
                code = "DB_PASSWORD_DEFAULTED",
                host = %host,
                "DB_PASSWORD is not set; connecting with the default password"
            );
            DEFAULT_PG_PASSWORD.to_string()
        }
    };

    Ok(PostgresTarget::External(PgParams {
        host,
        port,
        user: var(ENV_USER).unwrap_or_else(|| DEFAULT_PG_USER.to_string()),
        password,
        db_name,
        ssl_mode,
    }))
}

fn parse_port(var: &'static str, value: Option<String>, default: u16) -> Result<u16, ConfigError> {
    match value {
        None => Ok(default),
        Some(raw) => match raw.parse::<u16>() {
            Ok(port) if port != 0 => Ok(port),
            _ => Err(ConfigError::InvalidPort { var, value: raw }),
        },
    }
}

fn parse_number(var: &'static str, value: Option<String>, default: u64) -> Result<u64, ConfigError> {
    match value {
        None => Ok(default),
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidNumber { var, value: raw }),
    }
}

fn parse_bool(var: &'static str, value: Option<String>) -> Result<bool, ConfigError> {
    match value.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None | Some("false") | Some("0") | Some("no") => Ok(false),
        Some("true") | Some("1") | Some("yes") => Ok(true),
        Some(_) => Err(ConfigError::InvalidBool {
            var,
            value: value.unwrap_or_default(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(pairs: &[(&str, &str)]) -> Result<DbConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        DbConfig::load(|key| map.get(key).cloned(), None)
    }

    fn postgres_target_of(config: DbConfig) -> PostgresTarget {
        match config.backend {
            BackendConfig::Postgres(target) => target,
            other => panic!("expected postgres backend, got {other:?}"),
        }
    }

    #[test]
    fn backend_token_mapping() {
        assert_eq!(BackendKind::from_token(None), BackendKind::Sqlite);
        assert_eq!(BackendKind::from_token(Some("")), BackendKind::Sqlite);
        assert_eq!(BackendKind::from_token(Some("sqlite")), BackendKind::Sqlite);
        assert_eq!(BackendKind::from_token(Some("postgres")), BackendKind::Postgres);
        assert_eq!(BackendKind::from_token(Some("postgresql")), BackendKind::Postgres);
        assert_eq!(BackendKind::from_token(Some(" Postgres ")), BackendKind::Postgres);
    }

    #[test]
    fn unknown_backend_token_falls_back_to_sqlite() {
        assert_eq!(BackendKind::from_token(Some("mysql")), BackendKind::Sqlite);

        let config = load(&[("DB_DRIVER", "oracle")]).unwrap();
        assert_eq!(config.kind(), BackendKind::Sqlite);
    }

    #[test]
    fn sqlite_defaults_to_file_under_data_root() {
        let config = load(&[]).unwrap();
        assert_eq!(
            config.backend,
            BackendConfig::Sqlite(SqliteTarget::File(PathBuf::from("database/reesource_tracker.db")))
        );
        assert_eq!(config.connect_timeout, Duration::from_millis(5000));
    }

    #[test]
    fn sqlite_memory_and_custom_paths() {
        let config = load(&[("DB_SQLITE_PATH", ":memory:")]).unwrap();
        assert_eq!(config.backend, BackendConfig::Sqlite(SqliteTarget::Memory));

        let config = load(&[("DB_SQLITE_PATH", "/tmp/x.db")]).unwrap();
        assert_eq!(
            config.backend,
            BackendConfig::Sqlite(SqliteTarget::File(PathBuf::from("/tmp/x.db")))
        );
    }

    #[test]
    fn postgres_without_host_is_self_managed() {
        let config = load(&[("DB_DRIVER", "postgres"), ("DB_DATA_ROOT", "/srv/data")]).unwrap();

        let target = postgres_target_of(config);
        assert_eq!(
            target,
            PostgresTarget::SelfManaged(SelfManaged {
                data_dir: PathBuf::from("/srv/data/postgres_data"),
                credential_file: PathBuf::from("/srv/data/.pgpassword"),
                port: EMBEDDED_PG_PORT,
                user: "postgres".to_string(),
                db_name: "reesource_tracker".to_string(),
            })
        );
    }

    #[test]
    fn credential_file_is_outside_engine_data_dir() {
        let layout = DataLayout::default();
        assert!(!layout.credential_file().starts_with(layout.pg_data_dir()));
        assert_eq!(layout.credential_file().parent(), layout.pg_data_dir().parent());
    }

    #[test]
    fn postgres_external_defaults() {
        let config = load(&[
            ("DB_DRIVER", "postgresql"),
            ("DB_HOST", "db.internal"),
            ("DB_PASSWORD", "s3cret"),
        ])
        .unwrap();

        let target = postgres_target_of(config);
        assert_eq!(
            target,
            PostgresTarget::External(PgParams {
                host: "db.internal".to_string(),
                port: 5432,
                user: "postgres".to_string(),
                password: "s3cret".to_string(),
                db_name: "reesource_tracker".to_string(),
                ssl_mode: SslMode::Disable,
            })
        );
    }

    #[test]
    fn postgres_external_overrides() {
        let config = load(&[
            ("DB_DRIVER", "postgres"),
            ("DB_HOST", "db.internal"),
            ("DB_PORT", "6543"),
            ("DB_USER", "tracker"),
            ("DB_PASSWORD", "pw"),
            ("DB_NAME", "tracker_prod"),
            ("DB_SSL_MODE", "verify-full"),
        ])
        .unwrap();

        let PostgresTarget::External(params) = postgres_target_of(config) else {
            panic!("expected external target");
        };
        assert_eq!(params.port, 6543);
        assert_eq!(params.user, "tracker");
        assert_eq!(params.db_name, "tracker_prod");
        assert_eq!(params.ssl_mode, SslMode::VerifyFull);
    }

    #[test]
    fn missing_password_defaults_unless_required() {
        let config = load(&[("DB_DRIVER", "postgres"), ("DB_HOST", "db")]).unwrap();
        let PostgresTarget::External(params) = postgres_target_of(config) else {
            panic!("expected external target");
        };
        assert_eq!(params.password, DEFAULT_PG_PASSWORD);

        let err = load(&[
            ("DB_DRIVER", "postgres"),
            ("DB_HOST", "db"),
            ("DB_REQUIRE_PASSWORD", "true"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingPassword));
    }

    #[test]
    fn url_override_wins_over_host() {
        let config = load(&[
            ("DB_DRIVER", "postgres"),
            ("DB_HOST", "ignored"),
            ("DATABASE_URL", "postgres://u:p@example.com:5432/app"),
        ])
        .unwrap();
        assert_eq!(
            postgres_target_of(config),
            PostgresTarget::Url("postgres://u:p@example.com:5432/app".to_string())
        );
    }

    #[test]
    fn invalid_values_are_config_errors() {
        let err = load(&[("DB_DRIVER", "postgres"), ("DB_HOST", "h"), ("DB_PORT", "99999")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPort { var: "DB_PORT", .. }));

        let err = load(&[("DB_DRIVER", "postgres"), ("DB_HOST", "h"), ("DB_SSL_MODE", "maybe")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSslMode { .. }));

        let err = load(&[("DB_DRIVER", "postgres"), ("DATABASE_URL", "not a url")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { .. }));

        let err = load(&[("DB_CONNECT_TIMEOUT_MS", "soon")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNumber { .. }));
    }

    #[test]
    fn sqlite_ignores_postgres_settings() {
        let config = load(&[("DB_PORT", "not-a-port"), ("DB_HOST", "h")]).unwrap();
        assert_eq!(config.kind(), BackendKind::Sqlite);
    }

    #[test]
    fn explicit_backend_overrides_driver_token() {
        let config = DbConfig::load(
            |key| (key == ENV_DRIVER).then(|| "postgres".to_string()),
            Some(BackendKind::Sqlite),
        )
        .unwrap();
        assert_eq!(config.kind(), BackendKind::Sqlite);
    }

    #[test]
    fn debug_output_masks_passwords() {
        let config = load(&[
            ("DB_DRIVER", "postgres"),
            ("DB_HOST", "h"),
            ("DB_PASSWORD", "hunter2"),
        ])
        .unwrap();
        assert!(!format!("{config:?}").contains("hunter2"));

        let config = load(&[
            ("DB_DRIVER", "postgres"),
            ("DATABASE_URL", "postgres://u:hunter2@h/db"),
        ])
        .unwrap();
        assert!(!format!("{config:?}").contains("hunter2"));

        let config = load(&[
            ("DB_DRIVER", "postgres"),
            ("DATABASE_URL", "postgres://u@h:5432/db?password=hunter2"),
        ])
        .unwrap();
        assert!(!format!("{config:?}").contains("hunter2"));
    }

    #[test]
    fn password_is_taken_verbatim() {
        let password_of = |value: &str| {
            match postgres_target_of(
                load(&[
                    ("DB_DRIVER", "postgres"),
                    ("DB_HOST", " db "),
                    ("DB_PASSWORD", value),
                ])
                .unwrap(),
            ) {
                PostgresTarget::External(params) => (params.host, params.password),
                other => panic!("expected external target, got {other:?}"),
            }
        };

        assert_eq!(password_of(" pass "), ("db".to_string(), " pass ".to_string()));
        assert_eq!(password_of("   "), ("db".to_string(), "   ".to_string()));
    }
}
