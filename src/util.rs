mod offset_vec;
mod segment_tree;

pub use offset_vec::*;
pub use segment_tree::*;
