use std::collections::VecDeque;
use std::iter::Iterator;

use linfa::Float;

use super::TreeNode;

/// Level-order (BFT) iterator of nodes in an honest tree
///
/// Nodes are yielded by increasing depth, left before right within a level.
pub struct NodeIter<'a, F> {
    queue: VecDeque<&'a TreeNode<F>>,
}

impl<'a, F> NodeIter<'a, F> {
    pub fn new(root: &'a TreeNode<F>) -> Self {
        let mut queue = VecDeque::new();
        queue.push_back(root);

        NodeIter { queue }
    }
}

impl<'a, F: Float> Iterator for NodeIter<'a, F> {
    type Item = &'a TreeNode<F>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.queue.pop_front()?;
        self.queue.extend(node.children());

        Some(node)
    }
}
