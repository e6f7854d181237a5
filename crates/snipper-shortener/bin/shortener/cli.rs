use clap::{Parser, ValueEnum};
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;

pub const STORAGE_BACKEND_ENV: &str = "SNIPPER_STORAGE_BACKEND";
pub const FILE_STORAGE_PATH_ENV: &str = "SNIPPER_FILE_STORAGE_PATH";
pub const DATABASE_DSN_ENV: &str = "SNIPPER_DATABASE_DSN";
pub const BASE_URL_ENV: &str = "SNIPPER_BASE_URL";
pub const GENERATOR_ENV: &str = "SNIPPER_GENERATOR";
pub const DELETE_BUFFER_SIZE_ENV: &str = "SNIPPER_DELETE_BUFFER_SIZE";
pub const DELETE_FLUSH_INTERVAL_ENV: &str = "SNIPPER_DELETE_FLUSH_INTERVAL_SECS";
pub const DELETE_OPERATION_TIMEOUT_ENV: &str = "SNIPPER_DELETE_OPERATION_TIMEOUT_SECS";
pub const LOG_FORMAT_ENV: &str = "SNIPPER_LOG_FORMAT";

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageBackendArg {
    #[value(name = "in-memory")]
    InMemory,
    #[value(name = "file")]
    File,
    #[value(name = "postgres")]
    Postgres,
}

impl Display for StorageBackendArg {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackendArg::InMemory => write!(f, "in-memory"),
            StorageBackendArg::File => write!(f, "file"),
            StorageBackendArg::Postgres => write!(f, "postgres"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GeneratorArg {
    Uuid,
    Seq,
}

impl Display for GeneratorArg {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            GeneratorArg::Uuid => write!(f, "uuid"),
            GeneratorArg::Seq => write!(f, "seq"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "snipper-shortener")]
pub struct CLI {
    #[arg(
        long,
        env = STORAGE_BACKEND_ENV,
        value_enum,
        default_value_t = StorageBackendArg::InMemory
    )]
    pub storage: StorageBackendArg,

    #[arg(long, env = FILE_STORAGE_PATH_ENV, required_if_eq("storage", "file"))]
    pub file_storage_path: Option<PathBuf>,

    #[arg(long, env = DATABASE_DSN_ENV, required_if_eq("storage", "postgres"))]
    pub database_dsn: Option<String>,

    #[arg(long, env = BASE_URL_ENV, default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    #[arg(
        long,
        env = GENERATOR_ENV,
        value_enum,
        default_value_t = GeneratorArg::Uuid
    )]
    pub generator: GeneratorArg,

    #[arg(long, env = DELETE_BUFFER_SIZE_ENV, default_value_t = 5)]
    pub delete_buffer_size: usize,

    #[arg(long, env = DELETE_FLUSH_INTERVAL_ENV, default_value_t = 10)]
    pub delete_flush_interval_secs: u64,

    #[arg(long, env = DELETE_OPERATION_TIMEOUT_ENV, default_value_t = 30)]
    pub delete_operation_timeout_secs: u64,

    #[arg(long, env = LOG_FORMAT_ENV, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl CLI {
    /// Rejects option combinations clap cannot express.
    ///
    /// The sequence generator restarts from zero on every launch, so its
    /// shorts would collide with records a persistent backend kept.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.generator != GeneratorArg::Seq || self.storage == StorageBackendArg::InMemory,
            "generator {} only works with the in-memory backend, got {}",
            self.generator,
            self.storage
        );
        Ok(())
    }

    pub fn delete_flush_interval(&self) -> Duration {
        Duration::from_secs(self.delete_flush_interval_secs)
    }

    pub fn delete_operation_timeout(&self) -> Duration {
        Duration::from_secs(self.delete_operation_timeout_secs)
    }
}
