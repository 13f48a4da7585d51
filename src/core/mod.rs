pub mod backoff;
pub mod envelope;
pub mod frame;
pub mod health;
pub mod heartbeat;
pub mod types;

pub use backoff::*;
pub use envelope::*;
pub use frame::*;
pub use health::*;
pub use heartbeat::*;
pub use types::*;
