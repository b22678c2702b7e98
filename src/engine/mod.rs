mod consumer;
mod relay;
mod worker;

pub use consumer::*;
pub use relay::*;
pub use worker::*;
