use std::path::PathBuf;

use stemflow_core::retention::RetentionPolicy;
use stemflow_core::stage::ChainLink;
use stemflow_pipeline::ToolProgram;

/// HTTP server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// How long shutdown waits for background loops (default: `10`).
    pub shutdown_timeout_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                 |
    /// |-------------------------|-------------------------|
    /// | `HOST`                  | `0.0.0.0`               |
    /// | `PORT`                  | `3000`                  |
    /// | `CORS_ORIGINS`          | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`  | `30`                    |
    /// | `SHUTDOWN_TIMEOUT_SECS` | `10`                    |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins = split_list(
            &std::env::var("CORS_ORIGINS").unwrap_or_else(|_| "http://localhost:5173".into()),
            ',',
        );

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let shutdown_timeout_secs: u64 = std::env::var("SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".into())
            .parse()
            .expect("SHUTDOWN_TIMEOUT_SECS must be a valid u64");

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
        }
    }
}

/// Stage pipeline configuration: tools, storage, chaining and retention.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Root of per-subject audio directories.
    pub audio_data_path: PathBuf,
    /// PostgreSQL URL. Jobs are kept in memory when unset.
    pub database_url: Option<String>,
    pub spotdl: ToolProgram,
    pub demucs: ToolProgram,
    pub analyzer: ToolProgram,
    /// Device for separation jobs that do not name one.
    pub demucs_device: String,
    /// Passed through to demucs when set.
    pub cuda_visible_devices: Option<String>,
    /// Remote relay base URL. The in-process relay is used when unset.
    pub relay_url: Option<String>,
    pub chain: Vec<ChainLink>,
    pub retention: RetentionPolicy,
}

impl PipelineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                                |
    /// |------------------------|----------------------------------------|
    /// | `AUDIO_DATA_PATH`      | `/data/audio`                          |
    /// | `DATABASE_URL`         | unset (in-memory store)                |
    /// | `SPOTDL_PROGRAM`       | `python` (args `-m spotdl`)            |
    /// | `DEMUCS_PROGRAM`       | `python` (args `-m demucs.separate`)   |
    /// | `ANALYZER_PROGRAM`     | `python` (args `analyzer.py`)          |
    /// | `DEMUCS_DEVICE`        | `cuda` if `CUDA_VISIBLE_DEVICES` set, else `cpu` |
    /// | `RELAY_URL`            | unset                                  |
    /// | `STAGE_CHAIN`          | `download>separate,download>analyze`   |
    /// | `JOB_RETENTION_KEEP`   | unset (keep all)                       |
    ///
    /// `*_ARGS` variables replace the leading arguments and are split on
    /// whitespace.
    pub fn from_env() -> Self {
        let audio_data_path = PathBuf::from(
            std::env::var("AUDIO_DATA_PATH").unwrap_or_else(|_| "/data/audio".into()),
        );

        let cuda_visible_devices = non_empty_var("CUDA_VISIBLE_DEVICES");
        let demucs_device = non_empty_var("DEMUCS_DEVICE").unwrap_or_else(|| {
            if cuda_visible_devices.is_some() {
                "cuda".into()
            } else {
                "cpu".into()
            }
        });

        let chain = match non_empty_var("STAGE_CHAIN") {
            Some(raw) => ChainLink::parse_list(&raw)
                .expect("STAGE_CHAIN must list links like 'download>separate'"),
            None => ChainLink::defaults(),
        };

        let keep = non_empty_var("JOB_RETENTION_KEEP").map(|raw| {
            raw.parse::<usize>()
                .expect("JOB_RETENTION_KEEP must be a valid usize")
        });

        Self {
            audio_data_path,
            database_url: non_empty_var("DATABASE_URL"),
            spotdl: program_from_env("SPOTDL", "python", "-m spotdl"),
            demucs: program_from_env("DEMUCS", "python", "-m demucs.separate"),
            analyzer: program_from_env("ANALYZER", "python", "analyzer.py"),
            demucs_device,
            cuda_visible_devices,
            relay_url: non_empty_var("RELAY_URL"),
            chain,
            retention: RetentionPolicy::from_keep(keep),
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn split_list(raw: &str, separator: char) -> Vec<String> {
    raw.split(separator)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// `<PREFIX>_PROGRAM` and `<PREFIX>_ARGS`, falling back to the defaults.
fn program_from_env(prefix: &str, default_program: &str, default_args: &str) -> ToolProgram {
    let program =
        non_empty_var(&format!("{prefix}_PROGRAM")).unwrap_or_else(|| default_program.into());
    let args = std::env::var(format!("{prefix}_ARGS")).unwrap_or_else(|_| default_args.into());
    ToolProgram::new(program, args.split_whitespace())
}
