mod forest;
mod hyperparams;
mod iter;
mod node;
mod splitter;
mod tree;

pub use forest::*;
pub use hyperparams::*;
pub use iter::*;
pub use node::*;
pub use tree::HonestTree;
