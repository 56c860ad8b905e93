//! texsync daemon: document watcher, remote monitor and socket server for
//! one session.

mod error;
pub mod log_rotation;
pub mod paths;
pub mod protocol;
mod runtime;

pub use error::DaemonError;
pub use protocol::{
    request_cancel, request_pull, request_push, request_reset, request_status, request_stop,
    send_request, DaemonRequest, DaemonResponse,
};
pub use runtime::{run, start_blocking, Activity};
