use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments; CLI wins.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub session_ttl_minutes: i64,
    pub info_cache_ttl_secs: u64,
    pub max_chunk_bytes: usize,
    pub max_bundle_bytes: usize,
    pub sweep_interval_secs: u64,
    pub upload_limit: u64,
    pub download_limit: u64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "End-to-end encrypted file transfer server")]
pub struct Args {
    /// Host to bind to (overrides SEALDROP_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides SEALDROP_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where payloads are stored (overrides SEALDROP_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides SEALDROP_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Idle lifetime of an upload session in minutes
    #[arg(long)]
    pub session_ttl_minutes: Option<i64>,

    /// Lifetime of cached file info in seconds
    #[arg(long)]
    pub info_cache_ttl_secs: Option<u64>,

    /// Largest accepted chunk body in bytes
    #[arg(long)]
    pub max_chunk_bytes: Option<usize>,

    /// Largest accepted bundle request in bytes
    #[arg(long)]
    pub max_bundle_bytes: Option<usize>,

    /// Seconds between orphaned chunk sweeps
    #[arg(long)]
    pub sweep_interval_secs: Option<u64>,

    /// Upload requests allowed per client per minute
    #[arg(long)]
    pub upload_limit: Option<u64>,

    /// Download requests allowed per client per minute
    #[arg(long)]
    pub download_limit: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::merge(args, |name| env::var(name))?, migrate))
    }

    /// Merge parsed args over values looked up through `lookup`.
    fn merge<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        let cfg = Self {
            host: match args.host {
                Some(v) => v,
                None => env_or(&lookup, "SEALDROP_HOST", "0.0.0.0".to_string())?,
            },
            port: match args.port {
                Some(v) => v,
                None => env_or(&lookup, "SEALDROP_PORT", 3000)?,
            },
            storage_dir: match args.storage_dir {
                Some(v) => v,
                None => env_or(&lookup, "SEALDROP_STORAGE_DIR", "./data/objects".to_string())?,
            },
            database_url: match args.database_url {
                Some(v) => v,
                None => env_or(
                    &lookup,
                    "SEALDROP_DATABASE_URL",
                    "sqlite://./data/meta/sealdrop.db".to_string(),
                )?,
            },
            session_ttl_minutes: match args.session_ttl_minutes {
                Some(v) => v,
                None => env_or(&lookup, "SEALDROP_SESSION_TTL_MINUTES", 30)?,
            },
            info_cache_ttl_secs: match args.info_cache_ttl_secs {
                Some(v) => v,
                None => env_or(&lookup, "SEALDROP_INFO_CACHE_TTL_SECS", 300)?,
            },
            max_chunk_bytes: match args.max_chunk_bytes {
                Some(v) => v,
                None => env_or(&lookup, "SEALDROP_MAX_CHUNK_BYTES", 64 * 1024 * 1024)?,
            },
            max_bundle_bytes: match args.max_bundle_bytes {
                Some(v) => v,
                None => env_or(&lookup, "SEALDROP_MAX_BUNDLE_BYTES", 2 * 1024 * 1024 * 1024)?,
            },
            sweep_interval_secs: match args.sweep_interval_secs {
                Some(v) => v,
                None => env_or(&lookup, "SEALDROP_SWEEP_INTERVAL_SECS", 300)?,
            },
            upload_limit: match args.upload_limit {
                Some(v) => v,
                None => env_or(&lookup, "SEALDROP_UPLOAD_LIMIT", 20)?,
            },
            download_limit: match args.download_limit {
                Some(v) => v,
                None => env_or(&lookup, "SEALDROP_DOWNLOAD_LIMIT", 100)?,
            },
        };

        if cfg.session_ttl_minutes < 1 {
            anyhow::bail!("session TTL must be at least one minute");
        }
        if cfg.sweep_interval_secs == 0 {
            anyhow::bail!("sweep interval must be positive");
        }

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Read `name`, falling back to `default` only when it is unset.
fn env_or<T, F>(lookup: &F, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Result<String, env::VarError>,
{
    match lookup(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(
        pairs: &[(&str, &str)],
    ) -> impl Fn(&str) -> Result<String, env::VarError> + use<> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned().ok_or(env::VarError::NotPresent)
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let cfg = AppConfig::merge(Args::default(), lookup_from(&[])).unwrap();
        assert_eq!(cfg.addr(), "0.0.0.0:3000");
        assert_eq!(cfg.session_ttl_minutes, 30);
        assert_eq!(cfg.info_cache_ttl_secs, 300);
        assert_eq!(cfg.max_chunk_bytes, 64 * 1024 * 1024);
        assert_eq!((cfg.upload_limit, cfg.download_limit), (20, 100));
    }

    #[test]
    fn cli_overrides_environment() {
        let args = Args {
            port: Some(8080),
            ..Args::default()
        };
        let cfg = AppConfig::merge(
            args,
            lookup_from(&[("SEALDROP_PORT", "9000"), ("SEALDROP_UPLOAD_LIMIT", "5")]),
        )
        .unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.upload_limit, 5);
    }

    #[test]
    fn malformed_numbers_are_errors() {
        let err = AppConfig::merge(
            Args::default(),
            lookup_from(&[("SEALDROP_SESSION_TTL_MINUTES", "half an hour")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("SEALDROP_SESSION_TTL_MINUTES"));
    }

    #[test]
    fn zero_session_ttl_is_rejected() {
        assert!(
            AppConfig::merge(
                Args::default(),
                lookup_from(&[("SEALDROP_SESSION_TTL_MINUTES", "0")]),
            )
            .is_err()
        );
    }
}
