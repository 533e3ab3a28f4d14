//! Outbound resilience: messages are written locally before any network
//! call and retried until the backend acknowledges them.

mod pipeline;
pub mod queue;
pub mod store;
pub mod threads;

pub use pipeline::{
    CompletedTurn, FlushReport, PipelineDeps, PipelineSettings, ResiliencePipeline, SendReceipt,
    TurnRequest,
};
pub use queue::{Backoff, OutboundQueue, OutboundQueueEntry};
pub use store::{FileStore, KeyValueStore, MemoryStore};
pub use threads::{PROVISIONAL_PREFIX, ThreadAliases, is_provisional, new_provisional_id};
