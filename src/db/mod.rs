//! Persistence adapter: pool bootstrap plus the atomic compound operations the
//! credential pool and scheduler depend on.

pub mod credentials;
pub mod jobs;
pub mod pool;

pub use pool::connect;
