//! Clap derive structures for the `deconz` CLI.
//!
//! Defines the command tree, global flags, and shared types.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use deconz_core::DeviceKind;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// deconz -- inspect and drive a deCONZ Zigbee gateway from the terminal
#[derive(Debug, Parser)]
#[command(
    name = "deconz",
    version,
    about = "Inspect and control a deCONZ Zigbee gateway",
    long_about = "Lists lights, sensors and groups over the gateway REST API,\n\
        writes state back to devices, and follows the push WebSocket feed.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Gateway profile to use
    #[arg(long, short = 'p', env = "DECONZ_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Gateway host (overrides profile)
    #[arg(long, short = 'H', env = "DECONZ_HOST", global = true)]
    pub host: Option<String>,

    /// Gateway REST port (overrides profile)
    #[arg(long, env = "DECONZ_PORT", global = true)]
    pub port: Option<u16>,

    /// Gateway WebSocket port (overrides profile and auto-detection)
    #[arg(long, env = "DECONZ_WS_PORT", global = true)]
    pub ws_port: Option<u16>,

    /// Gateway API key
    #[arg(long, env = "DECONZ_API_KEY", global = true, hide_env_values = true)]
    pub api_key: Option<String>,

    /// Use https / wss
    #[arg(long, global = true)]
    pub secure: bool,

    /// Accept self-signed TLS certificates
    #[arg(long, short = 'k', env = "DECONZ_INSECURE", global = true)]
    pub insecure: bool,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "DECONZ_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Request timeout in seconds
    #[arg(long, env = "DECONZ_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output Enum ──────────────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List, inspect and control lights, sensors and groups
    #[command(alias = "dev", alias = "d")]
    Devices(DevicesArgs),

    /// Follow state changes of devices until interrupted
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Stream raw push events until interrupted
    Events(EventsArgs),

    /// Inspect CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Devices ──────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct DevicesArgs {
    #[command(subcommand)]
    pub command: DevicesCommand,
}

#[derive(Debug, Subcommand)]
pub enum DevicesCommand {
    /// List catalogued devices
    #[command(alias = "ls")]
    List(ListArgs),

    /// Show one device
    Get {
        /// Unique id, `group_<n>`, or exact name
        device: String,
    },

    /// Write state (lights), action (groups) or config (sensors)
    Set {
        /// Unique id, `group_<n>`, or exact name
        device: String,

        /// JSON object to send, e.g. '{"on": true, "bri": 200}'
        #[arg(required_unless_present = "from_file", conflicts_with = "from_file")]
        body: Option<String>,

        /// Read the JSON object from a file
        #[arg(long, short = 'F', value_name = "PATH")]
        from_file: Option<PathBuf>,
    },
}

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Only this kind of device
    #[arg(long, short = 't', value_enum)]
    pub kind: Option<KindArg>,

    /// Only this gateway resource type (e.g. ZHASwitch)
    #[arg(long = "type")]
    pub resource_type: Option<String>,

    /// Only names containing this text (case-insensitive)
    #[arg(long, short = 'n')]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum KindArg {
    Sensor,
    Light,
    Group,
}

impl From<KindArg> for DeviceKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Sensor => Self::Sensor,
            KindArg::Light => Self::Light,
            KindArg::Group => Self::Group,
        }
    }
}

// ── Watch / Events ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Devices to watch (unique id, `group_<n>` or name); all when omitted
    #[arg(value_name = "DEVICE")]
    pub devices: Vec<String>,

    /// Also report devices that appear while watching
    #[arg(long)]
    pub new: bool,
}

#[derive(Debug, Args)]
pub struct EventsArgs {
    /// Also report socket lifecycle (open, close, timeouts) on stderr
    #[arg(long)]
    pub lifecycle: bool,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file path
    Path,

    /// Show the resolved configuration (secrets redacted)
    Show,

    /// List configured profiles
    Profiles,

    /// Store an API key in the system keyring for the active profile
    SetKey {
        /// The API key
        key: String,
    },
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
