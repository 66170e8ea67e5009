pub mod config;
pub mod dedup;
pub mod executor;
pub mod input;
pub mod interpreter;
pub mod logging;
pub mod notify;
pub mod server;
pub mod service;
pub mod status;
pub mod transport;

pub use config::{Config, ConfigManager};
pub use executor::CommandExecutor;
pub use interpreter::CommandInterpreter;
pub use server::{ServiceController, ServiceError};
pub use service::{HandleOutcome, InputDispatcher, InputService, ServiceSettings};
pub use status::StatusWriter;
