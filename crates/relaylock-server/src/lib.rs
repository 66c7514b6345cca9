// Relaylock server library
// Exposes the coordinator, client sessions and startup helpers so the binary
// and the integration tests share one wiring.

pub mod client; // Client sessions
pub mod metrics; // Metric descriptions
pub mod model; // Configuration
pub mod server; // Lock coordinator
pub mod startup; // Logging and shutdown

pub use model::Configuration;
pub use server::{Server, ServerConfig};
