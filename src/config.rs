use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::Deserialize;
use std::{env, fs, path::PathBuf};

/// Centralized application configuration.
/// Combines environment variables, CLI arguments and the backends file.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub backends: Vec<BackendConfig>,
    /// Backend assigned to buckets created without an explicit one.
    pub default_backend: String,
}

/// One storage backend, as declared in the backends file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    /// Disk-backed vendor rooted at `root`.
    Local {
        name: String,
        bucket: String,
        root: PathBuf,
    },
    /// In-process vendor; contents are lost on restart.
    Memory { name: String, bucket: String },
}

impl BackendConfig {
    pub fn name(&self) -> &str {
        match self {
            BackendConfig::Local { name, .. } | BackendConfig::Memory { name, .. } => name,
        }
    }

    /// Vendor-side bucket the gateway writes into.
    pub fn bucket(&self) -> &str {
        match self {
            BackendConfig::Local { bucket, .. } | BackendConfig::Memory { bucket, .. } => bucket,
        }
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Multi-backend object storage gateway")]
pub struct Args {
    /// Host to bind to (overrides OBJECT_GATEWAY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides OBJECT_GATEWAY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides OBJECT_GATEWAY_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Root directory of the fallback local backend (overrides OBJECT_GATEWAY_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// JSON file declaring the storage backends (overrides OBJECT_GATEWAY_BACKENDS_FILE)
    #[arg(long)]
    pub backends_file: Option<String>,

    /// Backend for new buckets (overrides OBJECT_GATEWAY_DEFAULT_BACKEND)
    #[arg(long)]
    pub default_backend: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::from_args(args)?, migrate))
    }

    fn from_args(args: Args) -> Result<Self> {
        // --- Environment fallback ---
        let env_host = env::var("OBJECT_GATEWAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = match env::var("OBJECT_GATEWAY_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing OBJECT_GATEWAY_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => 3000,
            Err(err) => return Err(err).context("reading OBJECT_GATEWAY_PORT"),
        };
        let env_db = env::var("OBJECT_GATEWAY_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/object_gateway.db".into());
        let env_storage =
            env::var("OBJECT_GATEWAY_STORAGE_DIR").unwrap_or_else(|_| "./data/objects".into());

        let backends_file = args
            .backends_file
            .or_else(|| env::var("OBJECT_GATEWAY_BACKENDS_FILE").ok());
        let backends = match backends_file {
            Some(path) => {
                let raw = fs::read_to_string(&path)
                    .with_context(|| format!("reading backends file `{}`", path))?;
                parse_backends(&raw).with_context(|| format!("parsing backends file `{}`", path))?
            }
            None => vec![BackendConfig::Local {
                name: "local".into(),
                bucket: "gateway".into(),
                root: args.storage_dir.unwrap_or(env_storage).into(),
            }],
        };

        let default_backend = match args
            .default_backend
            .or_else(|| env::var("OBJECT_GATEWAY_DEFAULT_BACKEND").ok())
        {
            Some(name) => name,
            None => backends
                .first()
                .map(|b| b.name().to_string())
                .context("no backends configured")?,
        };
        if !backends.iter().any(|b| b.name() == default_backend) {
            bail!("default backend `{}` is not configured", default_backend);
        }

        // --- Merge ---
        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.unwrap_or(env_db),
            backends,
            default_backend,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Parse the JSON backends list, rejecting empty lists and duplicate names.
pub fn parse_backends(raw: &str) -> Result<Vec<BackendConfig>> {
    let backends: Vec<BackendConfig> = serde_json::from_str(raw)?;
    if backends.is_empty() {
        bail!("at least one backend must be declared");
    }
    for (idx, backend) in backends.iter().enumerate() {
        if backends[..idx].iter().any(|b| b.name() == backend.name()) {
            bail!("backend `{}` is declared more than once", backend.name());
        }
    }
    Ok(backends)
}
