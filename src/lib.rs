pub mod aop;
pub mod components;
pub mod config;
pub mod engine;
pub mod server;
pub mod types;
pub mod utils;

pub use components::*;
pub use engine::{ConsumerWorker, OrderConsumer, OrderRelay};
pub use types::*;
