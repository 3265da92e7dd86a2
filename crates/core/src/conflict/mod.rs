//! Conflict classification and the per-kind resolution policy.

pub mod classifier;

pub use classifier::{
    ConflictClassifier, ConflictEntry, ConflictKind, ConflictSet, ResolutionPolicy,
};
