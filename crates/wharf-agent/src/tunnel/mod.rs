//! Cluster tunnel: joining a manager and serving the session

mod listener;
mod protocol;
mod reconnect;
mod session;

pub use listener::{ListenerClosed, TunnelListener, TunnelStream};
pub use protocol::{ProtocolLoop, TaskChange, TaskChangeHandler};
pub use reconnect::ExponentialBackoff;
pub use session::{ClusterSession, JoinOptions, SessionError};
