use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::node::Node;

/// Flat concurrent map from absolute virtual path to node.
///
/// Every node constructor routes through [`get_or_insert`]
/// (compute-if-absent), which guarantees at most one node object per
/// path for the lifetime of the filesystem. Children are rediscovered
/// by re-keying into this map, so the hierarchy carries only forward
/// references and stays acyclic. The map grows monotonically; there is
/// no eviction.
///
/// [`get_or_insert`]: NodeCache::get_or_insert
#[derive(Debug, Default)]
pub(crate) struct NodeCache {
    nodes: RwLock<HashMap<String, Arc<Node>>>,
}

impl NodeCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, path: &str) -> Option<Arc<Node>> {
        self.nodes.read().expect("lock poisoned").get(path).cloned()
    }

    /// Returns the cached node for `path`, building and inserting it on
    /// a miss. The candidate is built outside the write lock; when two
    /// threads race, one insert wins and the losing candidate is
    /// discarded without ever being exposed.
    pub(crate) fn get_or_insert<F>(&self, path: &str, build: F) -> Arc<Node>
    where
        F: FnOnce() -> Node,
    {
        if let Some(node) = self.get(path) {
            return node;
        }
        let candidate = Arc::new(build());
        let mut nodes = self.nodes.write().expect("lock poisoned");
        Arc::clone(nodes.entry(path.to_string()).or_insert(candidate))
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.nodes.read().expect("lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memo::Memoized;

    fn empty_dir(path: &str) -> Node {
        Node::directory(path.to_string(), Memoized::ready(Vec::new()))
    }

    #[test]
    fn insert_then_hit() {
        let cache = NodeCache::new();
        assert!(cache.get("/modules").is_none());

        let first = cache.get_or_insert("/modules", || empty_dir("/modules"));
        let second = cache.get_or_insert("/modules", || empty_dir("/modules"));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn racing_inserts_expose_one_node() {
        use std::thread;

        let cache = Arc::new(NodeCache::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || cache.get_or_insert("/modules/m", || empty_dir("/modules/m")))
            })
            .collect();

        let nodes: Vec<Arc<Node>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for node in &nodes {
            assert!(Arc::ptr_eq(node, &nodes[0]));
        }
        assert_eq!(cache.len(), 1);
    }
}
