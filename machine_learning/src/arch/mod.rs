pub mod activations;
pub mod densenet;
mod graph;
pub mod layers;
mod sequential;
pub mod weights;

pub use graph::{NetworkGraph, Stage};
pub use sequential::Sequential;
