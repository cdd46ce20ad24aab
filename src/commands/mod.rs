mod connect;
mod demo;
mod serve;

use crate::config::{RelayConfig, SessionPolicy, DEFAULT_LOG_LEVEL, SIGNALING_PATH};
use crate::peer::types::ServerConfig;
use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "rtc-echo", version, about = "WebRTC data channel echo over one-shot HTTP signaling")]
pub struct Cli {
    /// Log level, overridden by RUST_LOG
    #[arg(long, env = "RTC_ECHO_LOG", default_value = DEFAULT_LOG_LEVEL, global = true)]
    pub log_level: String,

    /// Disable logging
    #[arg(long, short, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the responder: signaling endpoint plus echo relay
    Serve(ServeArgs),
    /// Run an initiator against a responder and print the echoes
    Connect(ConnectArgs),
    /// Responder and initiator in one process, over the in-memory transport
    Demo(DemoArgs),
}

/// Settings shared by both sides of the handshake
#[derive(Args, Debug, Clone)]
pub struct RelayArgs {
    /// ICE server, `stun:host:port` or `turn:host:port|username|credential`.
    /// Repeatable; the public Google STUN servers are used when omitted.
    #[arg(long = "ice-server", env = "RTC_ECHO_ICE_SERVERS", value_delimiter = ',')]
    pub ice_servers: Vec<ServerConfig>,

    #[arg(long, env = "RTC_ECHO_GATHERING_TIMEOUT", default_value_t = 10)]
    pub gathering_timeout_secs: u64,

    #[arg(long, env = "RTC_ECHO_SIGNALING_TIMEOUT", default_value_t = 10)]
    pub signaling_timeout_secs: u64,

    /// Data channel label
    #[arg(long, default_value = crate::config::DEFAULT_CHANNEL_LABEL)]
    pub label: String,
}

impl RelayArgs {
    pub fn to_config(&self) -> RelayConfig {
        let mut config = RelayConfig {
            gathering_timeout: Duration::from_secs(self.gathering_timeout_secs),
            signaling_timeout: Duration::from_secs(self.signaling_timeout_secs),
            channel_label: self.label.clone(),
            ..Default::default()
        };
        if !self.ice_servers.is_empty() {
            config.ice_servers = self.ice_servers.clone();
        }
        config
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    #[arg(long, env = "RTC_ECHO_BIND", default_value = "0.0.0.0:8080")]
    pub bind: SocketAddr,

    /// Keep only the most recent session's channel
    #[arg(long)]
    pub single_slot: bool,

    /// Answer without waiting for local candidate discovery
    #[arg(long)]
    pub answer_immediately: bool,

    #[command(flatten)]
    pub relay: RelayArgs,
}

impl ServeArgs {
    pub fn to_config(&self) -> RelayConfig {
        let mut config = self.relay.to_config();
        config.answer_waits_for_gathering = !self.answer_immediately;
        if self.single_slot {
            config.session_policy = SessionPolicy::SingleSlot;
        }
        config
    }
}

#[derive(Args, Debug)]
pub struct ConnectArgs {
    /// Signaling endpoint
    #[arg(long, env = "RTC_ECHO_URL", default_value_t = format!("http://127.0.0.1:8080{SIGNALING_PATH}"))]
    pub url: String,

    #[arg(long, short, default_value = "Button Clicked!")]
    pub message: String,

    /// How many times to send the message
    #[arg(long, short, default_value_t = 1)]
    pub count: u32,

    #[command(flatten)]
    pub relay: RelayArgs,
}

#[derive(Args, Debug)]
pub struct DemoArgs {
    #[arg(long, short, default_value = "Button Clicked!")]
    pub message: String,

    #[arg(long, short, default_value_t = 3)]
    pub count: u32,
}

pub async fn dispatch(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Serve(args) => serve::run(args).await,
        Command::Connect(args) => connect::run(args).await,
        Command::Demo(args) => demo::run(args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_flags_map_onto_config() {
        let cli = Cli::try_parse_from([
            "rtc-echo",
            "serve",
            "--bind",
            "127.0.0.1:9000",
            "--single-slot",
            "--ice-server",
            "turn:t.example.org:3478|u|p",
            "--gathering-timeout-secs",
            "3",
        ])
        .unwrap();
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        let config = args.to_config();
        assert_eq!(args.bind.port(), 9000);
        assert_eq!(config.session_policy, SessionPolicy::SingleSlot);
        assert_eq!(config.gathering_timeout, Duration::from_secs(3));
        assert_eq!(config.ice_servers.len(), 1);
        assert_eq!(config.ice_servers[0].r#type, "turn");
        config.validate().unwrap();
    }

    #[test]
    fn connect_defaults() {
        let cli = Cli::try_parse_from(["rtc-echo", "--quiet", "connect"]).unwrap();
        assert!(cli.quiet);
        let Command::Connect(args) = cli.command else {
            panic!("expected connect");
        };
        assert!(args.url.ends_with("/setupRTC"));
        assert_eq!(args.message, "Button Clicked!");
        assert_eq!(args.count, 1);
        assert_eq!(args.relay.to_config().ice_servers.len(), 2);
    }
}
