use crate::config::AppConfig;
use bitcoin::Txid;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

/// Builder for test [`AppConfig`] instances backed by temporary directories.
pub struct TestConfigBuilder {
    config: AppConfig,
    temp_dirs: Vec<TempDir>,
}

impl TestConfigBuilder {
    /// Regtest-style defaults: no excluded txids, fast pacing, no status server.
    pub fn new() -> Self {
        let db_temp = TempDir::new().expect("create temp db dir");
        let db_path = db_temp.path().to_string_lossy().to_string();

        let config = AppConfig {
            bitcoind_rpc_url: "http://127.0.0.1:18443".to_string(), // Placeholder
            bitcoind_rpc_user: "test".to_string(),
            bitcoind_rpc_pass: "test".to_string(),
            rpc_timeout: Duration::from_secs(5),
            db_path,
            first_height: 0,
            excluded_txids: Vec::new(),
            prefetch_window: 10,
            prefetch_concurrency: 2,
            prefetch_interval: Duration::from_millis(10),
            block_count_ttl: Duration::ZERO,
            idle_pause: Duration::from_millis(10),
            error_pause: Duration::from_millis(10),
            import_delay: Duration::ZERO,
            status_host: None,
            log_level: "debug".to_string(),
        };

        Self { config, temp_dirs: vec![db_temp] }
    }

    pub fn with_first_height(mut self, height: u64) -> Self {
        self.config.first_height = height;
        self
    }

    pub fn with_excluded_txids(mut self, txids: impl IntoIterator<Item = Txid>) -> Self {
        self.config.excluded_txids = txids.into_iter().collect();
        self
    }

    pub fn with_rpc_url(mut self, url: &str) -> Self {
        self.config.bitcoind_rpc_url = url.to_string();
        self
    }

    pub fn with_prefetch_window(mut self, window: u64) -> Self {
        self.config.prefetch_window = window;
        self
    }

    /// Cache `getblockcount` answers for `ttl`.
    pub fn with_block_count_ttl(mut self, ttl: Duration) -> Self {
        self.config.block_count_ttl = ttl;
        self
    }

    /// Set a custom DB directory
    pub fn with_db_path(mut self, path: &str) -> Self {
        self.config.db_path = path.to_string();
        self
    }

    /// Create a new temporary directory and return its path
    pub fn create_temp_dir(&mut self) -> PathBuf {
        let temp_dir = TempDir::new().expect("create temp dir");
        let path = temp_dir.path().to_path_buf();
        self.temp_dirs.push(temp_dir);
        path
    }

    /// Build and return the config along with temp directory handles.
    /// The caller must keep the TempDir handles alive to prevent cleanup.
    pub fn build(self) -> (AppConfig, Vec<TempDir>) {
        (self.config, self.temp_dirs)
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
