use clap::Parser;
use std::path::PathBuf;

use signaling_core::config;
use signaling_core::signaling::Role;

#[derive(Parser, Debug)]
#[command(name = "signaling-core")]
#[command(author = "Signaling Core Team")]
#[command(version)]
#[command(about = "WebRTC signaling client", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/signaling-core.toml")]
    pub config: PathBuf,

    /// Signaling server URL (ws:// or wss://)
    #[arg(short, long)]
    pub url: Option<String>,

    /// Channel to join
    #[arg(long)]
    pub channel_id: Option<String>,

    /// Session role (upstream or downstream)
    #[arg(short, long, value_parser = parse_role)]
    pub role: Option<Role>,

    /// Verbose logging
    #[arg(short, long, action)]
    pub verbose: bool,
}

impl Args {
    pub fn load_config(&self) -> Result<config::Config, Box<dyn std::error::Error>> {
        config::Config::load(&self.config)
    }

    /// Command line values win over the file.
    pub fn apply_overrides(&self, config: &mut config::Config) {
        if let Some(ref url) = self.url {
            config.signaling.url = url.clone();
        }
        if let Some(ref channel_id) = self.channel_id {
            config.signaling.channel_id = channel_id.clone();
        }
        if let Some(role) = self.role {
            config.session.role = role;
        }
    }
}

fn parse_role(value: &str) -> Result<Role, String> {
    Role::ALL
        .into_iter()
        .find(|role| role.as_str().eq_ignore_ascii_case(value))
        .ok_or_else(|| format!("unknown role {:?}, expected upstream or downstream", value))
}
