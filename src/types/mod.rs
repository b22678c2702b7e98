mod descriptor;
mod error;
mod message;
mod order;

pub use descriptor::*;
pub use error::*;
pub use message::*;
pub use order::*;
