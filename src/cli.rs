use std::path::PathBuf;

use clap::Parser;

pub const PROJECT: &str = "eventgate";

/// AMQP queue to Server-Sent Events gateway
#[derive(Debug, Parser)]
#[command(name = "eventgate", disable_version_flag = true)]
pub struct Cli {
    /// Print version and exit
    #[arg(short = 'v', long = "version")]
    pub version: bool,

    /// Print the resolved configuration as YAML and exit
    #[arg(short = 'c', long = "dump-config")]
    pub dump_config: bool,

    /// Additional configuration file, merged after the default locations
    #[arg(long = "config", value_name = "PATH")]
    pub config: Vec<PathBuf>,

    /// Emit logs as JSON
    #[arg(long = "log-json")]
    pub log_json: bool,
}

impl Cli {
    pub fn json_logs(&self) -> bool {
        self.log_json
            || std::env::var("LOG_FORMAT")
                .map(|format| format.eq_ignore_ascii_case("json"))
                .unwrap_or(false)
    }
}

/// Build identification
pub struct Version;

impl Version {
    pub fn short() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    pub fn commit() -> &'static str {
        option_env!("EVENTGATE_COMMIT").unwrap_or("unknown")
    }

    pub fn status() -> &'static str {
        option_env!("EVENTGATE_STATUS").unwrap_or("")
    }

    pub fn long() -> String {
        format_long(Self::short(), Self::commit(), Self::status())
    }

    pub fn full() -> String {
        format!("{PROJECT} {}", Self::long())
    }
}

fn format_long(version: &str, commit: &str, status: &str) -> String {
    if status.is_empty() {
        format!("{version} ({commit})")
    } else {
        format!("{version} ({commit}-{status})")
    }
}
