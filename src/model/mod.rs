//! Model assembly and execution
//!
//! The network is described structurally as a [`NetworkGraph`] of named
//! layers built by the [`ModelAssembler`]; the tensor math itself is behind
//! the [`Executor`] collaborator trait, to which the training controller
//! issues blocking calls. [`ReferenceExecutor`] is a small dense CPU
//! implementation so the pipeline runs end-to-end without an external device
//! scheduler.

mod exec;
mod graph;
mod reference;
mod strategy;

pub use exec::{Batch, BatchStats, Executor, ModelHandle, WeightTensor, Weights};
pub use graph::{
    HeadLayout, LayerKind, LayerSpec, ModelAssembler, NetworkGraph, INPUT_LAYER, POST_CONV_LAYER,
};
pub use reference::ReferenceExecutor;
pub use strategy::{Activation, EncodedLabel, MetricKind, OutcomeStrategy};
