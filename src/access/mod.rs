pub mod guard;
pub mod middleware;
pub mod network;
pub mod store;

pub use guard::*;
pub use middleware::*;
pub use store::*;
