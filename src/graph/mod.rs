// src/graph/mod.rs — Brain graph: decaying entity/zone/concept relevance graph

pub mod decay;
pub mod model;
pub mod service;
pub mod snapshot;
pub mod store;

pub use decay::HalfLife;
pub use model::{
    Evidence, GraphEdge, GraphLimits, GraphNode, GraphQuery, GraphState, Meta, NodeKind,
};
pub use service::{BrainGraphService, GraphStats};
pub use store::{Eviction, GraphStore, StoreLimits};
