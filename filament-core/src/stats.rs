//! Statistics snapshots.
//!
//! The engine produces an immutable tree of named counters at snapshot
//! time. Traversal is lazy and restartable; nothing in a snapshot updates
//! after it is produced, so snapshots are shareable across threads as-is.

use std::sync::Arc;

/// One node of a statistics snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatNode {
    name: String,
    value: u64,
    children: Vec<StatNode>,
}

impl StatNode {
    /// A leaf counter.
    #[must_use]
    pub fn leaf(name: impl Into<String>, value: u64) -> Self {
        Self {
            name: name.into(),
            value,
            children: Vec::new(),
        }
    }

    /// An interior node owning child nodes.
    #[must_use]
    pub fn branch(name: impl Into<String>, children: Vec<StatNode>) -> Self {
        Self {
            name: name.into(),
            value: 0,
            children,
        }
    }

    /// Node name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Counter value; zero for interior nodes.
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.value
    }

    /// Child nodes.
    #[must_use]
    pub fn children(&self) -> &[StatNode] {
        &self.children
    }

    /// Child by index.
    #[must_use]
    pub fn child(&self, index: usize) -> Option<&StatNode> {
        self.children.get(index)
    }

    /// Find a direct child by name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&StatNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Depth-first traversal of the whole subtree, this node included.
    ///
    /// The iterator is finite and can be restarted by calling `iter`
    /// again.
    pub fn iter(&self) -> StatIter<'_> {
        StatIter { stack: vec![self] }
    }
}

/// Depth-first iterator over a snapshot.
pub struct StatIter<'a> {
    stack: Vec<&'a StatNode>,
}

impl<'a> Iterator for StatIter<'a> {
    type Item = &'a StatNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        // Push in reverse so children come out in declaration order.
        for child in node.children.iter().rev() {
            self.stack.push(child);
        }
        Some(node)
    }
}

/// A traversal cursor over a shared snapshot, for the handle surface.
///
/// `next` walks the tree depth-first; `name` and `value` read the node
/// the cursor currently rests on.
pub struct StatCursor {
    root: Arc<StatNode>,
    // Path of child indices from the root to the current node; empty
    // path with `started == false` means "before the root".
    path: Vec<usize>,
    started: bool,
    done: bool,
}

impl StatCursor {
    /// Start a cursor at (before) the snapshot root.
    #[must_use]
    pub fn new(root: Arc<StatNode>) -> Self {
        Self {
            root,
            path: Vec::new(),
            started: false,
            done: false,
        }
    }

    fn resolve(&self) -> &StatNode {
        let mut node: &StatNode = &self.root;
        for &i in &self.path {
            node = &node.children[i];
        }
        node
    }

    /// Advance to the next node in depth-first order.
    ///
    /// Returns false once the traversal is exhausted.
    pub fn next(&mut self) -> bool {
        if self.done {
            return false;
        }
        if !self.started {
            self.started = true;
            return true;
        }
        // Descend first.
        if !self.resolve().children.is_empty() {
            self.path.push(0);
            return true;
        }
        // Otherwise climb until a next sibling exists.
        while let Some(i) = self.path.pop() {
            let parent_len = self.resolve().children.len();
            if i + 1 < parent_len {
                self.path.push(i + 1);
                return true;
            }
        }
        self.done = true;
        false
    }

    /// Name of the current node.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        if self.started && !self.done {
            Some(self.resolve().name())
        } else {
            None
        }
    }

    /// Value of the current node.
    #[must_use]
    pub fn value(&self) -> Option<u64> {
        if self.started && !self.done {
            Some(self.resolve().value())
        } else {
            None
        }
    }

    /// Restart the traversal from the root.
    pub fn rewind(&mut self) {
        self.path.clear();
        self.started = false;
        self.done = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> StatNode {
        StatNode::branch(
            "root",
            vec![
                StatNode::branch(
                    "socket.1",
                    vec![StatNode::leaf("tx-msgs", 3), StatNode::leaf("rx-msgs", 5)],
                ),
                StatNode::leaf("sockets", 1),
            ],
        )
    }

    #[test]
    fn iter_visits_depth_first() {
        let root = sample();
        let names: Vec<&str> = root.iter().map(StatNode::name).collect();
        assert_eq!(
            names,
            vec!["root", "socket.1", "tx-msgs", "rx-msgs", "sockets"]
        );
    }

    #[test]
    fn iter_is_restartable() {
        let root = sample();
        assert_eq!(root.iter().count(), 5);
        assert_eq!(root.iter().count(), 5);
    }

    #[test]
    fn cursor_traversal() {
        let root = Arc::new(sample());
        let mut cursor = StatCursor::new(root);
        assert!(cursor.name().is_none());

        let mut seen = Vec::new();
        while cursor.next() {
            seen.push((cursor.name().unwrap().to_string(), cursor.value().unwrap()));
        }
        assert_eq!(seen.len(), 5);
        assert_eq!(seen[2], ("tx-msgs".to_string(), 3));
        assert!(!cursor.next());

        cursor.rewind();
        assert!(cursor.next());
        assert_eq!(cursor.name(), Some("root"));
    }

    #[test]
    fn find_child() {
        let root = sample();
        assert_eq!(root.find("sockets").unwrap().value(), 1);
        assert!(root.find("missing").is_none());
    }
}
