mod analysis;
mod outbox;

pub use analysis::{AnalysisError, AnalysisProcessor, stat_for_body};
pub use outbox::{OutboxRelay, RelayError};
