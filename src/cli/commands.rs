// src/cli/commands.rs
use clap::Parser;

/// MoneroMiner - a Monero (XMR) CPU mining program.
///
/// All flags are optional; anything not given falls back to
/// `config.json` in the working directory and then to built-in
/// defaults.
#[derive(Parser, Debug)]
#[command(name = "monerominer", version, about, long_about = None)]
pub struct Cli {
    /// Pool address and port
    #[arg(long, value_name = "HOST:PORT")]
    pub pool: Option<String>,

    /// Wallet address to mine for (required here or in config.json)
    #[arg(long, value_name = "ADDRESS")]
    pub wallet: Option<String>,

    /// Worker name
    #[arg(long, value_name = "NAME")]
    pub worker: Option<String>,

    /// Pool password
    #[arg(long, value_name = "PASSWORD")]
    pub password: Option<String>,

    /// User agent string
    #[arg(long, value_name = "AGENT")]
    pub useragent: Option<String>,

    /// Number of mining threads (default: hardware concurrency)
    #[arg(long, value_name = "N")]
    pub threads: Option<usize>,

    /// Enable debug output
    #[arg(long)]
    pub debug: bool,

    /// Log to miner.log in addition to the console
    #[arg(long)]
    pub logfile: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_flags() {
        let cli = Cli::parse_from([
            "monerominer",
            "--pool",
            "pool.example.com:3333",
            "--wallet",
            "4ABC",
            "--worker",
            "rig0",
            "--password",
            "secret",
            "--useragent",
            "custom/2.0",
            "--threads",
            "8",
            "--debug",
            "--logfile",
        ]);

        assert_eq!(cli.pool.as_deref(), Some("pool.example.com:3333"));
        assert_eq!(cli.wallet.as_deref(), Some("4ABC"));
        assert_eq!(cli.worker.as_deref(), Some("rig0"));
        assert_eq!(cli.password.as_deref(), Some("secret"));
        assert_eq!(cli.useragent.as_deref(), Some("custom/2.0"));
        assert_eq!(cli.threads, Some(8));
        assert!(cli.debug);
        assert!(cli.logfile);
    }

    #[test]
    fn everything_is_optional() {
        let cli = Cli::parse_from(["monerominer"]);
        assert!(cli.pool.is_none());
        assert!(cli.wallet.is_none());
        assert!(!cli.debug);
    }
}
