//! Force-directed layout for biome nodes
//!
//! Each qubit of a biome is one node on a 2D plane. Its Bloch vector decides
//! where it wants to sit around the biome center; pairwise mutual information
//! and classical correlations pull nodes together or push them apart.

pub mod engine;

pub use engine::{
    pair_count, pair_index, ForceGraphEngine, ForceParams, LayoutInputs, NodeLayout,
    NodeObservable, BLOCH_STRIDE,
};
