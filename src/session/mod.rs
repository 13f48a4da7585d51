pub mod actor;
pub mod handle;

pub use actor::{GetConnectionState, GetStats, SendEnvelope, SessionActor, SessionArgs, SessionEvent};
pub use handle::{FeedBinding, SessionHandle};
