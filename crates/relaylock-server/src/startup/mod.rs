pub mod logging;
pub mod shutdown;

pub use logging::{LoggingConfig, LoggingGuard, init_logging};
pub use shutdown::{ShutdownSignal, listen_for_shutdown_signal, run_with_shutdown};
