//! Long-running driver for one proxy instance: watches the desired-state
//! file, runs cycles one at a time and answers a JSON control socket.

mod error;
pub mod paths;
pub mod protocol;
mod runtime;

pub use error::DaemonError;
pub use protocol::{request_status, request_stop, request_sync, send_request, DaemonRequest, DaemonResponse};
pub use runtime::{init_tracing, run, start_blocking, CycleSummary};
