pub mod blob;
pub mod cli;
pub mod config;
pub mod context;
mod error;
pub mod health;
mod node;
pub mod observability;
pub mod shard;
pub mod state;
pub mod system;

pub use cli::{Mode, NodeArgs};
pub use config::NodeConfig;
pub use context::NodeContext;
pub use error::NimbusError;
pub use node::{Node, build_backend};
