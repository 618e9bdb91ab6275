//! Question answering pipeline with a single guided repair.

pub mod pipeline;
pub mod prompts;
pub mod state;

pub use pipeline::{AskOptions, QueryOrchestrator};
pub use state::{step, Event, RepairState};
