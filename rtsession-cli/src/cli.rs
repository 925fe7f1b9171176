use std::path::PathBuf;

use clap::{Parser, Subcommand};
use realtime_session::SessionConfig;

#[derive(Parser, Debug)]
#[command(
    name = "rtsession",
    version,
    about = "Connect to a realtime backend and print its events",
    long_about = None
)]
pub struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "RTSESSION_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// REST backend base URL
    #[arg(long, global = true)]
    pub api_base_url: Option<String>,

    /// Realtime WebSocket URL
    #[arg(long, global = true)]
    pub realtime_url: Option<String>,

    /// Application identifier
    #[arg(long, global = true)]
    pub app_id: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Args {
    /// Flags take precedence over the file and the environment.
    pub fn apply_overrides(&self, config: &mut SessionConfig) {
        if let Some(url) = &self.api_base_url {
            config.api_base_url = url.clone();
        }
        if let Some(url) = &self.realtime_url {
            config.realtime_url = url.clone();
        }
        if let Some(app_id) = &self.app_id {
            config.app_id = app_id.clone();
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect and print realtime events until interrupted
    Listen {
        /// Print every document verbatim, including unknown message types
        #[arg(long)]
        raw: bool,
    },

    /// Force an access token refresh
    Refresh,

    /// Store credentials obtained from a login
    Login {
        /// Refresh token
        #[arg(long, env = "RTSESSION_REFRESH_TOKEN", hide_env_values = true)]
        refresh_token: String,

        /// Access token, if already issued
        #[arg(long, env = "RTSESSION_ACCESS_TOKEN", hide_env_values = true)]
        access_token: Option<String>,
    },

    /// Remove stored credentials
    Logout,

    /// Configuration management
    Config {
        /// Show the effective configuration
        #[arg(long)]
        show: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_flags_after_subcommand() {
        let args =
            Args::try_parse_from(["rtsession", "listen", "--raw", "-v", "--app-id", "a1"]).unwrap();

        assert!(args.verbose);
        assert!(matches!(args.command, Commands::Listen { raw: true }));

        let mut config = SessionConfig::default();
        args.apply_overrides(&mut config);
        assert_eq!(config.app_id, "a1");
        assert_eq!(config.api_base_url, SessionConfig::default().api_base_url);
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        assert!(Args::try_parse_from(["rtsession", "-v", "-q", "refresh"]).is_err());
    }

    #[test]
    fn test_login_requires_refresh_token() {
        let parsed = Args::try_parse_from([
            "rtsession",
            "login",
            "--refresh-token",
            "r1",
        ])
        .unwrap();
        match parsed.command {
            Commands::Login { refresh_token, .. } => assert_eq!(refresh_token, "r1"),
            other => panic!("unexpected command {other:?}"),
        }
    }
}
