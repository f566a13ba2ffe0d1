pub mod handler;
pub mod storage;

pub use handler::*;
pub use storage::*;
