//! Argument types and logger setup shared by the `umd-sender` and
//! `umd-receiver` binaries.

use core::{net::SocketAddr, str::FromStr};
use std::net::ToSocketAddrs;
use umd_network::{TallyKey, tally::InvalidTallyKey};

/// Logging options.
#[derive(Debug, Clone, clap::Args)]
pub struct LogArgs {
    /// Maximum log level, overrides `RUST_LOG` (default: info)
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<log::LevelFilter>,
}

impl LogArgs {
    /// Installs the global logger.
    pub fn init(&self) {
        let env = env_logger::Env::default().default_filter_or("info");
        let mut builder = env_logger::Builder::from_env(env);

        if let Some(level) = self.log_level {
            builder.filter_level(level);
        }

        builder.init();
    }
}

/// A tally given on the command line, as `SCREEN:INDEX[=TEXT]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TallyArg {
    pub key: TallyKey,
    pub text: Option<String>,
}

impl FromStr for TallyArg {
    type Err = InvalidTallyKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, text) = match s.split_once('=') {
            Some((key, text)) => (key, Some(text.into())),
            None => (s, None),
        };

        Ok(Self {
            key: key.parse()?,
            text,
        })
    }
}

/// Resolves a `HOST:PORT` pair to its first address.
pub fn resolve_addr(s: &str) -> Result<SocketAddr, String> {
    s.to_socket_addrs()
        .map_err(|e| format!("{s}: {e}"))?
        .next()
        .ok_or_else(|| format!("{s}: no address found"))
}
