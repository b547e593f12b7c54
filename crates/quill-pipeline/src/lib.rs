//! The ingestion pipeline: normalize inbound events, synchronize related
//! messages, batch per thread, and gate concurrency per user.
//!
//! Ordering guarantees (enforced across these modules):
//! 1. within one thread, batches execute strictly FIFO;
//! 2. within one batch, messages keep arrival order;
//! 3. no two concurrent executions share a thread;
//! 4. at most N concurrent executions per user.

pub mod generation;
pub mod limiter;
pub mod model;
pub mod normalizer;
pub mod queue;
pub mod router;
pub mod tracker;

pub use generation::GenerationTracker;
pub use limiter::{ConcurrencyLimiter, ConcurrencyPermit};
pub use model::{InboundContent, InboundMessage, MessageMeta, ProcessedMessage};
pub use normalizer::Normalizer;
pub use queue::{BatchProcessor, PerThreadQueue, PushOutcome};
pub use router::{RouteDecision, TopicRouter};
pub use tracker::{MediaGroupTracker, NormalizationTracker};
