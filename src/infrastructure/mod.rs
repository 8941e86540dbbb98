//! Infrastructure layer: I/O implementations and boundary traits

pub mod error;
pub mod store;
pub mod traits;

pub use error::{InfraError, InfraResult};
pub use store::ProtocolStore;
pub use traits::{Clock, PersistenceHook, SystemClock};
