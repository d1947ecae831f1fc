use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::{env, path::PathBuf};

use crate::state::DEFAULT_MAX_BODY_BYTES;

/// Which bucket backend the server binds at start-up.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// SQLite records + payload files on local disk.
    Local,
    /// Process memory; contents vanish on exit.
    Memory,
    /// Serve without a bucket; storage calls report a configuration error.
    None,
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub backend: Backend,
    pub storage_dir: String,
    pub database_url: String,
    pub max_body_bytes: usize,
    pub server_url: String,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Key-addressed object storage proxy")]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Host to bind to (overrides BUCKET_PROXY_HOST)
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Port to bind to (overrides BUCKET_PROXY_PORT)
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Bucket backend (overrides BUCKET_PROXY_BACKEND)
    #[arg(long, value_enum, global = true)]
    pub backend: Option<Backend>,

    /// Directory where object payloads are stored (overrides BUCKET_PROXY_STORAGE_DIR)
    #[arg(long, global = true)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides BUCKET_PROXY_DATABASE_URL)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Largest accepted upload body (overrides BUCKET_PROXY_MAX_BODY_BYTES)
    #[arg(long, global = true)]
    pub max_body_bytes: Option<usize>,

    /// Server the client commands talk to (overrides BUCKET_PROXY_SERVER_URL)
    #[arg(long, global = true)]
    pub server: Option<String>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the HTTP service (default)
    Serve,
    /// Create the metadata schema of the local backend and exit
    Migrate,
    /// Upload a file through the upload widget
    Upload {
        path: PathBuf,
        /// Object key; defaults to `<millis>-<file name>`
        #[arg(long)]
        key: Option<String>,
        /// Content type used when none can be guessed from the file name
        #[arg(long)]
        content_type: Option<String>,
        /// Largest file the widget accepts, in bytes
        #[arg(long)]
        max_size: Option<u64>,
        /// Accepted types, e.g. `image/*,.pdf`; any type when omitted
        #[arg(long)]
        accept: Option<String>,
    },
    /// Delete an object
    Delete { key: String },
    /// Print the URL an object is served from
    Url { key: String },
    /// List stored objects
    List {
        #[arg(long)]
        prefix: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        cursor: Option<String>,
    },
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the command.
    pub fn from_env_and_args() -> Result<(Self, Command)> {
        let args = Args::parse();
        let command = args.command.clone().unwrap_or(Command::Serve);
        Ok((Self::merge(args)?, command))
    }

    /// Flags win over environment variables, which win over defaults.
    pub fn merge(args: Args) -> Result<Self> {
        let env_host = env::var("BUCKET_PROXY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = parse_env("BUCKET_PROXY_PORT", 3000u16)?;
        let env_backend = match env::var("BUCKET_PROXY_BACKEND") {
            Ok(value) => <Backend as ValueEnum>::from_str(&value, true)
                .map_err(|err| anyhow::anyhow!(err))
                .with_context(|| format!("parsing BUCKET_PROXY_BACKEND value `{}`", value))?,
            Err(env::VarError::NotPresent) => Backend::Local,
            Err(err) => return Err(err).context("reading BUCKET_PROXY_BACKEND"),
        };
        let env_storage =
            env::var("BUCKET_PROXY_STORAGE_DIR").unwrap_or_else(|_| "./data/objects".into());
        let env_db = env::var("BUCKET_PROXY_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/bucket_proxy.db".into());
        let env_max_body = parse_env("BUCKET_PROXY_MAX_BODY_BYTES", DEFAULT_MAX_BODY_BYTES)?;
        let env_server = env::var("BUCKET_PROXY_SERVER_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:3000".into());

        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            backend: args.backend.unwrap_or(env_backend),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            max_body_bytes: args.max_body_bytes.unwrap_or(env_max_body),
            server_url: args.server.unwrap_or(env_server),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_env<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}
