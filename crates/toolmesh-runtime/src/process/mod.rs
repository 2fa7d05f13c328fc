//! Process-level concerns: spawning, output capture, port probing, shutdown.

mod output;
mod ports;
mod shutdown;
mod spawn;

pub use output::{OutputCapture, OutputStream, SessionEvent};
pub use ports::{find_free_port, is_port_available};
pub use shutdown::{SHUTDOWN_GRACE, shutdown_child};
pub use spawn::{classify_spawn_error, spawn_server_process, validate_working_dir};
