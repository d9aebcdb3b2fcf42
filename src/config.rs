use crate::consts::{
    DEFAULT_BLOCK_COUNT_TTL_SECS, DEFAULT_PREFETCH_CONCURRENCY, DEFAULT_PREFETCH_WINDOW,
    DEFAULT_RPC_TIMEOUT_SECS, MAINNET_GENESIS_COINBASE_TXID,
};
use crate::core::importer::ImportPacing;
use anyhow::{Context, Result};
use bitcoin::Txid;
use clap::Parser;
use serde::Deserialize;
use std::net::SocketAddr;
use std::str::FromStr;
use std::{
    fs,
    path::{Path, PathBuf},
    sync::OnceLock,
    time::Duration,
};

static CONFIG: OnceLock<AppConfig> = OnceLock::new();

fn default_rpc_timeout_secs() -> u64 {
    DEFAULT_RPC_TIMEOUT_SECS
}

fn default_db_path() -> String {
    "./db".to_string()
}

fn default_excluded_txids() -> Vec<String> {
    vec![MAINNET_GENESIS_COINBASE_TXID.to_string()]
}

fn default_prefetch_window() -> u64 {
    DEFAULT_PREFETCH_WINDOW
}

fn default_prefetch_concurrency() -> usize {
    DEFAULT_PREFETCH_CONCURRENCY
}

fn default_prefetch_interval_ms() -> u64 {
    1000
}

fn default_block_count_ttl_secs() -> u64 {
    DEFAULT_BLOCK_COUNT_TTL_SECS
}

fn default_pause_ms() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub bitcoind_rpc_url: String,
    #[serde(default)]
    pub bitcoind_rpc_user: String,
    #[serde(default)]
    pub bitcoind_rpc_pass: String,
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default)]
    pub first_height: u64,
    #[serde(default = "default_excluded_txids")]
    pub excluded_txids: Vec<String>,
    #[serde(default = "default_prefetch_window")]
    pub prefetch_window: u64,
    #[serde(default = "default_prefetch_concurrency")]
    pub prefetch_concurrency: usize,
    #[serde(default = "default_prefetch_interval_ms")]
    pub prefetch_interval_ms: u64,
    #[serde(default = "default_block_count_ttl_secs")]
    pub block_count_ttl_secs: u64,
    #[serde(default = "default_pause_ms")]
    pub idle_pause_ms: u64,
    #[serde(default = "default_pause_ms")]
    pub error_pause_ms: u64,
    #[serde(default)]
    pub import_delay_ms: u64,
    #[serde(default)]
    pub status_host: Option<SocketAddr>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bitcoind_rpc_url: String,
    pub bitcoind_rpc_user: String,
    pub bitcoind_rpc_pass: String,
    pub rpc_timeout: Duration,
    pub db_path: String,
    pub first_height: u64,
    pub excluded_txids: Vec<Txid>,
    pub prefetch_window: u64,
    pub prefetch_concurrency: usize,
    pub prefetch_interval: Duration,
    pub block_count_ttl: Duration,
    pub idle_pause: Duration,
    pub error_pause: Duration,
    pub import_delay: Duration,
    pub status_host: Option<SocketAddr>,
    pub log_level: String,
}

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct CliArgs {
    /// Path to JSON config file.
    #[arg(long, default_value = "./config.json")]
    pub config_path: String,

    /// Overrides `status_host` from the config file.
    #[arg(long)]
    pub status_host: Option<SocketAddr>,
}

pub fn load_config_file(path: &str) -> Result<ConfigFile> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read config file: {path}"))?;
    serde_json::from_str(&raw).context("failed to parse config JSON")
}

fn parse_txids(raw: &[String]) -> Result<Vec<Txid>> {
    raw.iter()
        .map(|s| {
            Txid::from_str(s.trim())
                .map_err(|e| anyhow::anyhow!("invalid txid in excluded_txids: {s}: {e}"))
        })
        .collect()
}

impl AppConfig {
    pub fn from_file(file: ConfigFile) -> Result<Self> {
        let url = file.bitcoind_rpc_url.trim().to_string();
        if url.is_empty() {
            anyhow::bail!("bitcoind_rpc_url must be provided");
        }
        if file.prefetch_window == 0 {
            anyhow::bail!("prefetch_window must be greater than 0");
        }
        if file.prefetch_concurrency == 0 {
            anyhow::bail!("prefetch_concurrency must be greater than 0");
        }
        if file.prefetch_interval_ms == 0 {
            anyhow::bail!("prefetch_interval_ms must be greater than 0");
        }
        if file.rpc_timeout_secs == 0 {
            anyhow::bail!("rpc_timeout_secs must be greater than 0");
        }
        let excluded_txids = parse_txids(&file.excluded_txids)?;

        Ok(Self {
            bitcoind_rpc_url: url,
            bitcoind_rpc_user: file.bitcoind_rpc_user,
            bitcoind_rpc_pass: file.bitcoind_rpc_pass,
            rpc_timeout: Duration::from_secs(file.rpc_timeout_secs),
            db_path: file.db_path,
            first_height: file.first_height,
            excluded_txids,
            prefetch_window: file.prefetch_window,
            prefetch_concurrency: file.prefetch_concurrency,
            prefetch_interval: Duration::from_millis(file.prefetch_interval_ms),
            block_count_ttl: Duration::from_secs(file.block_count_ttl_secs),
            idle_pause: Duration::from_millis(file.idle_pause_ms),
            error_pause: Duration::from_millis(file.error_pause_ms),
            import_delay: Duration::from_millis(file.import_delay_ms),
            status_host: file.status_host,
            log_level: file.log_level,
        })
    }

    /// Basic auth pair, only when both user and password are set.
    pub fn rpc_auth(&self) -> Option<(String, String)> {
        if !self.bitcoind_rpc_user.is_empty() && !self.bitcoind_rpc_pass.is_empty() {
            Some((self.bitcoind_rpc_user.clone(), self.bitcoind_rpc_pass.clone()))
        } else {
            None
        }
    }

    pub fn pacing(&self) -> ImportPacing {
        ImportPacing {
            idle_pause: self.idle_pause,
            error_pause: self.error_pause,
            block_delay: self.import_delay,
        }
    }

    /// RocksDB directory of the graph store.
    pub fn graph_db_path(&self) -> PathBuf {
        Path::new(&self.db_path).join("graph")
    }
}

/// Make sure `db_path` and the graph directory below it exist.
pub fn prepare_db_path(cfg: &AppConfig) -> Result<()> {
    let db_root = Path::new(&cfg.db_path);
    if db_root.exists() && !db_root.is_dir() {
        anyhow::bail!("db_path is not a directory: {}", cfg.db_path);
    }
    let graph_dir = cfg.graph_db_path();
    if !graph_dir.exists() {
        fs::create_dir_all(&graph_dir).map_err(|e| {
            anyhow::anyhow!("Failed to create graph db dir {}: {e}", graph_dir.display())
        })?;
    } else if !graph_dir.is_dir() {
        anyhow::bail!("graph db dir is not a directory: {}", graph_dir.display());
    }
    Ok(())
}

pub fn init_config_from(cfg: AppConfig) -> Result<()> {
    prepare_db_path(&cfg)?;
    CONFIG.set(cfg).map_err(|_| anyhow::anyhow!("config already initialized"))?;
    Ok(())
}

pub fn init_config() -> Result<()> {
    let cli = CliArgs::parse();
    let file = load_config_file(&cli.config_path)?;
    let mut cfg = AppConfig::from_file(file)?;
    if cli.status_host.is_some() {
        cfg.status_host = cli.status_host;
    }
    init_config_from(cfg)
}

pub fn get_config() -> &'static AppConfig {
    CONFIG.get().expect("init_config() must be called once at startup")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn parse(json: &str) -> Result<AppConfig> {
        let file: ConfigFile = serde_json::from_str(json)?;
        AppConfig::from_file(file)
    }

    #[test]
    fn test_minimal_file_gets_defaults() {
        let cfg = parse(r#"{ "bitcoind_rpc_url": "http://127.0.0.1:8332" }"#).unwrap();

        assert_eq!(cfg.first_height, 0);
        assert_eq!(cfg.db_path, "./db");
        assert_eq!(cfg.prefetch_window, 100);
        assert_eq!(cfg.prefetch_concurrency, 8);
        assert_eq!(cfg.block_count_ttl, Duration::from_secs(600));
        assert_eq!(cfg.rpc_timeout, Duration::from_secs(120));
        assert_eq!(cfg.excluded_txids.len(), 1);
        assert_eq!(cfg.excluded_txids[0].to_string(), MAINNET_GENESIS_COINBASE_TXID);
        assert_eq!(cfg.rpc_auth(), None);
        assert_eq!(cfg.pacing().idle_pause, Duration::from_secs(1));
        assert_eq!(cfg.pacing().block_delay, Duration::ZERO);
        assert!(cfg.status_host.is_none());
    }

    #[test]
    fn test_full_file() {
        let cfg = parse(
            r#"{
                "bitcoind_rpc_url": " http://node:8332 ",
                "bitcoind_rpc_user": "alice",
                "bitcoind_rpc_pass": "secret",
                "first_height": 1,
                "excluded_txids": [],
                "prefetch_window": 20,
                "import_delay_ms": 50,
                "status_host": "127.0.0.1:9090"
            }"#,
        )
        .unwrap();

        assert_eq!(cfg.bitcoind_rpc_url, "http://node:8332");
        assert_eq!(cfg.rpc_auth(), Some(("alice".to_string(), "secret".to_string())));
        assert_eq!(cfg.first_height, 1);
        assert!(cfg.excluded_txids.is_empty());
        assert_eq!(cfg.prefetch_window, 20);
        assert_eq!(cfg.pacing().block_delay, Duration::from_millis(50));
        assert_eq!(cfg.status_host, Some("127.0.0.1:9090".parse().unwrap()));
    }

    #[test]
    fn test_validation_errors() {
        assert!(parse(r#"{ "bitcoind_rpc_url": "  " }"#).is_err());
        assert!(parse(r#"{ "bitcoind_rpc_url": "http://x", "prefetch_window": 0 }"#).is_err());
        assert!(parse(r#"{ "bitcoind_rpc_url": "http://x", "prefetch_concurrency": 0 }"#).is_err());

        let err = parse(r#"{ "bitcoind_rpc_url": "http://x", "excluded_txids": ["zz"] }"#)
            .unwrap_err();
        assert!(err.to_string().contains("invalid txid"));
    }

    #[test]
    fn test_prepare_db_path_creates_graph_dir() {
        let temp = TempDir::new().unwrap();
        let mut cfg = parse(r#"{ "bitcoind_rpc_url": "http://x" }"#).unwrap();
        cfg.db_path = temp.path().join("nested").to_string_lossy().into_owned();

        prepare_db_path(&cfg).unwrap();
        assert!(cfg.graph_db_path().is_dir());
    }

    #[test]
    fn test_load_config_file_reports_path() {
        let err = load_config_file("/definitely/not/here.json").unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.json"));
    }
}
