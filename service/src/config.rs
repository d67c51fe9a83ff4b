use clap::builder::TypedValueParser as _;
use clap::Parser;
use dotenvy::dotenv;
use log::LevelFilter;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq)]
pub enum RustEnv {
    Development,
    Production,
    Staging,
}

#[derive(Debug, PartialEq, Eq)]
pub struct RustEnvParseError;

impl FromStr for RustEnv {
    type Err = RustEnvParseError;
    fn from_str(level: &str) -> Result<RustEnv, Self::Err> {
        match level.to_lowercase().as_str() {
            "development" => Ok(RustEnv::Development),
            "production" => Ok(RustEnv::Production),
            "staging" => Ok(RustEnv::Staging),
            _ => Err(RustEnvParseError),
        }
    }
}

impl fmt::Display for RustEnv {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RustEnv::Development => write!(f, "development"),
            RustEnv::Production => write!(f, "production"),
            RustEnv::Staging => write!(f, "staging"),
        }
    }
}

#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// A list of full CORS origin URLs that allowed to receive server responses.
    #[arg(
        long,
        env,
        value_delimiter = ',',
        use_value_delimiter = true,
        default_value = "http://localhost:3000,https://localhost:3000"
    )]
    pub allowed_origins: Vec<String>,

    /// The host interface to listen for incoming connections
    #[arg(short, long, env, default_value = "127.0.0.1")]
    pub interface: Option<String>,

    /// The host TCP port to listen for incoming connections
    #[arg(short, long, env, default_value_t = 6060)]
    pub port: u16,

    /// Set the log level verbosity threshold (level) to control what gets displayed on console output
    #[arg(
        short,
        long,
        env,
        default_value_t = LevelFilter::Info,
        value_parser = clap::builder::PossibleValuesParser::new(["OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE"])
            .map(|s| s.parse::<LevelFilter>().unwrap()),
        )]
    pub log_level_filter: LevelFilter,

    /// Separate threshold for session, topic and transport logs; falls back to `log_level_filter`
    #[arg(
        long,
        env,
        value_parser = clap::builder::PossibleValuesParser::new(["OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE"])
            .map(|s| s.parse::<LevelFilter>().unwrap()),
        )]
    pub realtime_log_level: Option<LevelFilter>,

    /// Set the Rust runtime environment to use.
    #[arg(
    short,
    long,
    env,
    default_value_t = RustEnv::Development,
    value_parser = clap::builder::PossibleValuesParser::new([
        "DEVELOPMENT", "PRODUCTION", "STAGING",
        "development", "production", "staging"
    ])
        .map(|s| s.parse::<RustEnv>().unwrap()),
    )]
    pub runtime_env: RustEnv,

    /// Oldest client protocol version accepted by the handshake
    #[arg(long, env, default_value = "1.1")]
    pub min_supported_version: String,

    /// Milliseconds a topic may wait for room in a session's outbound queue
    #[arg(long, env, default_value_t = 7)]
    pub send_timeout_ms: u64,

    /// Length of a session's outbound queue
    #[arg(long, env, default_value_t = 128)]
    pub send_queue_limit: usize,

    /// Seconds a background session stays hidden from presence
    #[arg(long, env, default_value_t = 5)]
    pub deferred_notifications_secs: u64,

    /// Seconds an idle long-poll session is kept before it is evicted
    #[arg(long, env, default_value_t = 55)]
    pub long_poll_lifetime_secs: u64,

    /// Seconds a long-poll request waits for outbound data
    #[arg(long, env, default_value_t = 50)]
    pub long_poll_wait_secs: u64,

    /// Seconds between sweeps for expired long-poll sessions
    #[arg(long, env, default_value_t = 10)]
    pub session_sweep_interval_secs: u64,

    /// Seconds a topic with no attached sessions stays alive
    #[arg(long, env, default_value_t = 5)]
    pub topic_idle_secs: u64,

    /// Capacity of a topic's inbound queue
    #[arg(long, env, default_value_t = 256)]
    pub topic_queue_limit: usize,

    /// Largest inbound message accepted, in bytes
    #[arg(long, env, default_value_t = 262_144)]
    pub max_message_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        // Load .env file first
        dotenv().ok();
        // Then parse the command line parameters and flags
        Config::parse()
    }

    pub fn interface(&self) -> &str {
        self.interface.as_deref().unwrap_or("127.0.0.1")
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn deferred_notifications(&self) -> Duration {
        Duration::from_secs(self.deferred_notifications_secs)
    }

    pub fn long_poll_lifetime(&self) -> Duration {
        Duration::from_secs(self.long_poll_lifetime_secs)
    }

    pub fn long_poll_wait(&self) -> Duration {
        Duration::from_secs(self.long_poll_wait_secs)
    }

    pub fn session_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.session_sweep_interval_secs)
    }

    pub fn topic_idle(&self) -> Duration {
        Duration::from_secs(self.topic_idle_secs)
    }

    pub fn runtime_env(&self) -> RustEnv {
        self.runtime_env.clone()
    }

    pub fn is_production(&self) -> bool {
        self.runtime_env() == RustEnv::Production
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::parse_from(["chat_server"]);
        assert_eq!(config.interface(), "127.0.0.1");
        assert_eq!(config.min_supported_version, "1.1");
        assert_eq!(config.send_timeout(), Duration::from_millis(7));
        assert_eq!(config.long_poll_lifetime(), Duration::from_secs(55));
        assert_eq!(config.max_message_size, 262_144);
        assert!(!config.is_production());
    }

    #[test]
    fn flags_override_defaults() {
        let config = Config::parse_from([
            "chat_server",
            "--port",
            "7070",
            "--runtime-env",
            "PRODUCTION",
            "--topic-idle-secs",
            "30",
            "--allowed-origins",
            "https://a.example,https://b.example",
        ]);
        assert_eq!(config.port, 7070);
        assert!(config.is_production());
        assert_eq!(config.topic_idle(), Duration::from_secs(30));
        assert_eq!(config.allowed_origins.len(), 2);
    }

    #[test]
    fn realtime_log_level_is_optional() {
        let config = Config::parse_from(["chat_server", "--log-level-filter", "WARN"]);
        assert_eq!(config.log_level_filter, LevelFilter::Warn);

        let config = Config::parse_from(["chat_server", "--realtime-log-level", "DEBUG"]);
        assert_eq!(config.realtime_log_level, Some(LevelFilter::Debug));
    }

    #[test]
    fn runtime_env_parses_any_case() {
        assert_eq!("Staging".parse::<RustEnv>(), Ok(RustEnv::Staging));
        assert_eq!("qa".parse::<RustEnv>(), Err(RustEnvParseError));
    }
}
