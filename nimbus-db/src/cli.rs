use clap::{Parser, ValueEnum};

use crate::config::DEFAULT_CONFIG_PATH;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// This node owns every shard.
    #[default]
    Single,
    /// Shards are assigned by cluster coordination.
    Distributed,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Single => f.write_str("single"),
            Mode::Distributed => f.write_str("distributed"),
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "nimbus-db", version, about = "NimbusDb shard node")]
pub struct NodeArgs {
    /// Operation mode.
    #[arg(short, long, value_enum, default_value_t = Mode::Single, ignore_case = true)]
    pub mode: Mode,

    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: String,
}
