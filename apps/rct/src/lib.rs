pub mod client;
pub mod command;
pub mod config;
pub mod console;
pub mod keepalive;
pub mod protocol;
pub mod server;
pub mod telemetry;
pub mod terminal;
pub mod transport;
pub mod waiter;

pub use client::{ConnectionManager, ConnectionStatus};
pub use command::{CommandInterpreter, CommandProcessor};
pub use config::{Config, DEFAULT_PORT};
pub use server::RctServer;
