// src/events/mod.rs — Event normalization and buffering

pub mod buffer;
pub mod normalize;

pub use buffer::EventBuffer;
pub use normalize::{
    BatchSummary, EventContext, EventKind, EventNormalizer, NormEvent, Normalized, RejectReason,
    SourceEvent,
};
