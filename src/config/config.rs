// src/config/config.rs
use crate::cli::Cli;
use crate::network::PoolConfig;
use crate::utils::error::MinerError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default pool endpoint.
pub const DEFAULT_POOL: &str = "xmr-eu1.nanopool.org:10300";

/// Log file used when `--logfile` is given.
pub const DEFAULT_LOG_FILE: &str = "miner.log";

/// Main configuration for the miner.
///
/// Values are resolved in three layers: built-in defaults, then
/// `config.json` from the working directory, then CLI flags. The JSON
/// keys mirror the CLI flags one-to-one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Pool endpoint as `host:port`.
    pub pool: String,
    /// Wallet address mined for; required (here or on the CLI).
    pub wallet: String,
    /// Worker name reported to the pool.
    pub worker: String,
    /// Pool password.
    pub password: String,
    /// User agent sent at login.
    pub useragent: String,
    /// Number of mining threads.
    pub threads: usize,
    /// Default the log level to debug.
    pub debug: bool,
    /// Also write log output to the log file.
    pub logfile: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            pool: DEFAULT_POOL.into(),
            wallet: String::new(),
            worker: "worker1".into(),
            password: "x".into(),
            useragent: concat!("MoneroMiner/", env!("CARGO_PKG_VERSION")).into(),
            threads: default_threads(),
            debug: false,
            logfile: false,
        }
    }
}

fn default_threads() -> usize {
    num_cpus::get().max(1)
}

impl Config {
    /// Loads configuration from a JSON file; a missing file yields the
    /// defaults, an unreadable or malformed one is a configuration
    /// error.
    pub fn load(path: &Path) -> Result<Self, MinerError> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let text = std::fs::read_to_string(path).map_err(|e| {
            MinerError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&text)
            .map_err(|e| MinerError::Config(format!("invalid {}: {}", path.display(), e)))
    }

    /// Applies CLI overrides on top of the file/default values.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(pool) = &cli.pool {
            self.pool = pool.clone();
        }
        if let Some(wallet) = &cli.wallet {
            self.wallet = wallet.clone();
        }
        if let Some(worker) = &cli.worker {
            self.worker = worker.clone();
        }
        if let Some(password) = &cli.password {
            self.password = password.clone();
        }
        if let Some(agent) = &cli.useragent {
            self.useragent = agent.clone();
        }
        if let Some(threads) = cli.threads {
            self.threads = threads;
        }
        if cli.debug {
            self.debug = true;
        }
        if cli.logfile {
            self.logfile = true;
        }
    }

    /// Validates the merged configuration.
    pub fn validate(&self) -> Result<(), MinerError> {
        if self.wallet.is_empty() {
            return Err(MinerError::Config(
                "wallet address is required (--wallet or config.json)".into(),
            ));
        }
        if self.threads == 0 {
            return Err(MinerError::Config("thread count must be at least 1".into()));
        }
        self.pool_endpoint()?;
        Ok(())
    }

    /// Splits the pool value into host and port.
    pub fn pool_endpoint(&self) -> Result<(String, u16), MinerError> {
        let (host, port) = self
            .pool
            .rsplit_once(':')
            .ok_or_else(|| MinerError::Config(format!("pool must be host:port, got {:?}", self.pool)))?;
        if host.is_empty() {
            return Err(MinerError::Config(format!(
                "pool must be host:port, got {:?}",
                self.pool
            )));
        }
        let port = port
            .parse()
            .map_err(|_| MinerError::Config(format!("invalid pool port in {:?}", self.pool)))?;
        Ok((host.to_string(), port))
    }

    /// The pool client's view of this configuration.
    pub fn pool_config(&self) -> Result<PoolConfig, MinerError> {
        let (host, port) = self.pool_endpoint()?;
        Ok(PoolConfig {
            host,
            port,
            wallet: self.wallet.clone(),
            password: self.password.clone(),
            worker: self.worker.clone(),
            agent: self.useragent.clone(),
        })
    }

    /// Logs the effective configuration at startup.
    pub fn log_summary(&self) {
        log::info!("pool:      {}", self.pool);
        log::info!("wallet:    {}", self.wallet);
        log::info!("worker:    {}", self.worker);
        log::info!("threads:   {}", self.threads);
        log::info!("useragent: {}", self.useragent);
        log::info!(
            "log file:  {}",
            if self.logfile { DEFAULT_LOG_FILE } else { "disabled" }
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn cli_with(args: &[&str]) -> Cli {
        use clap::Parser;
        let mut argv = vec!["monerominer"];
        argv.extend_from_slice(args);
        Cli::parse_from(argv)
    }

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.pool, DEFAULT_POOL);
        assert_eq!(config.worker, "worker1");
        assert_eq!(config.password, "x");
        assert!(config.threads >= 1);
        assert!(!config.debug);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::load(Path::new("definitely_not_here.json")).unwrap();
        assert_eq!(config.pool, DEFAULT_POOL);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = std::env::temp_dir().join("monerominer-config-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(br#"{"pool":"pool.test:4444","wallet":"4ABC","threads":2}"#)
            .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.pool, "pool.test:4444");
        assert_eq!(config.wallet, "4ABC");
        assert_eq!(config.threads, 2);
        // Untouched keys keep their defaults.
        assert_eq!(config.worker, "worker1");
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = std::env::temp_dir().join("monerominer-config-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            Config::load(&path),
            Err(MinerError::Config(_))
        ));
    }

    #[test]
    fn cli_overrides_file_values() {
        let mut config = Config {
            pool: "file.pool:1111".into(),
            wallet: "file-wallet".into(),
            ..Config::default()
        };
        config.apply_cli(&cli_with(&[
            "--pool",
            "cli.pool:2222",
            "--threads",
            "3",
            "--debug",
        ]));

        assert_eq!(config.pool, "cli.pool:2222");
        assert_eq!(config.threads, 3);
        assert!(config.debug);
        // Flags not given leave file values alone.
        assert_eq!(config.wallet, "file-wallet");
    }

    #[test]
    fn validation_requires_wallet_and_threads() {
        let mut config = Config::default();
        assert!(matches!(config.validate(), Err(MinerError::Config(_))));

        config.wallet = "4ABC".into();
        assert!(config.validate().is_ok());

        config.threads = 0;
        assert!(matches!(config.validate(), Err(MinerError::Config(_))));
    }

    #[test]
    fn pool_endpoint_parses_host_and_port() {
        let mut config = Config::default();
        config.pool = "pool.example.com:3333".into();
        assert_eq!(
            config.pool_endpoint().unwrap(),
            ("pool.example.com".to_string(), 3333)
        );

        config.pool = "no-port".into();
        assert!(config.pool_endpoint().is_err());

        config.pool = "host:not-a-port".into();
        assert!(config.pool_endpoint().is_err());
    }
}
