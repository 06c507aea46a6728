pub mod engine;
pub mod http;
pub mod router;
pub mod store;
pub mod subsystems;

pub use engine::{AskOutcome, Engine};
