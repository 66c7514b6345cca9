//! Lock store
//!
//! - Lock data model and fence tokens (`model`)
//! - Worker-backed lock manager (`service`)

mod model;
mod service;

pub use model::*;
pub use service::*;
