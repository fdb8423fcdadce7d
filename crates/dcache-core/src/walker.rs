//! Bounded ancestor walk.
//!
//! Component 0 is the new entry's own name; each following component is one
//! step closer to the root. At most [`MAX_DEPTH`] components are produced and
//! each step does a fixed amount of work.

use crate::name::NameSlot;

/// Maximum number of name components per walk
pub const MAX_DEPTH: usize = 8;

/// A node in a parent-linked directory tree.
pub trait AncestorNode {
    fn name(&self) -> &[u8];

    /// `None` when the node has no parent.
    fn parent(&self) -> Option<&Self>;

    /// True for the top of the tree: a node without a parent or one that is
    /// its own parent.
    fn is_root(&self) -> bool {
        match self.parent() {
            None => true,
            Some(p) => std::ptr::eq(p, self),
        }
    }
}

/// Result of [`walk`]: up to eight names, leaf first.
#[derive(Clone, PartialEq, Eq)]
pub struct WalkedPath {
    names: [NameSlot; MAX_DEPTH],
    len: usize,
    root_reached: bool,
}

impl WalkedPath {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn root_reached(&self) -> bool {
        self.root_reached
    }

    pub fn names(&self) -> &[NameSlot] {
        &self.names[..self.len]
    }

    pub fn get(&self, idx: usize) -> Option<&[u8]> {
        self.names().get(idx).map(NameSlot::as_bytes)
    }
}

impl std::fmt::Debug for WalkedPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalkedPath")
            .field("names", &self.names())
            .field("root_reached", &self.root_reached)
            .finish()
    }
}

/// Walk from `start` (the parent of the new entry) towards the root.
///
/// A missing `start` yields just `self_name` with `root_reached` clear.
pub fn walk<N: AncestorNode>(self_name: &[u8], start: Option<&N>) -> WalkedPath {
    let mut names = [NameSlot::EMPTY; MAX_DEPTH];
    let (len, root_reached) = walk_into(&mut names, self_name, start);
    WalkedPath {
        names,
        len,
        root_reached,
    }
}

/// Walk into caller-owned slots, zeroing the unused tail. Returns the
/// component count and whether the root was reached.
#[inline]
pub fn walk_into<N: AncestorNode>(
    slots: &mut [NameSlot; MAX_DEPTH],
    self_name: &[u8],
    start: Option<&N>,
) -> (usize, bool) {
    slots[0].fill(self_name);
    let mut count = 1;
    let mut root_reached = false;

    let mut next = start;
    while let Some(node) = next {
        if count == MAX_DEPTH {
            break;
        }
        slots[count].fill(node.name());
        count += 1;

        if node.is_root() {
            root_reached = true;
            break;
        }
        next = node.parent();
    }

    for slot in &mut slots[count..] {
        slot.clear();
    }
    (count, root_reached)
}


#[cfg(test)]
mod tests {
    use super::testing::chain;
    use super::*;

    fn names(path: &WalkedPath) -> Vec<String> {
        path.names()
            .iter()
            .map(|n| String::from_utf8_lossy(n.as_bytes()).into_owned())
            .collect()
    }

    #[test]
    fn test_parent_is_root() {
        let path = walk(b"a", Some(chain(0, true)));
        assert_eq!(names(&path), vec!["a", "/"]);
        assert!(path.root_reached());
    }

    #[test]
    fn test_short_chains_reach_root() {
        for depth in 1..MAX_DEPTH {
            let path = walk(b"leaf", Some(chain(depth - 1, true)));
            assert_eq!(path.len(), depth + 1, "depth {depth}");
            assert!(path.root_reached(), "depth {depth}");
        }
    }

    #[test]
    fn test_leaf_first_ordering() {
        let path = walk(b"f0", Some(chain(3, true)));
        assert_eq!(names(&path), vec!["f0", "d3", "d2", "d1", "/"]);
    }

    #[test]
    fn test_deep_chain_is_truncated() {
        let path = walk(b"f", Some(chain(20, true)));
        assert_eq!(path.len(), MAX_DEPTH);
        assert!(!path.root_reached());
        assert_eq!(path.get(1), Some(&b"d20"[..]));
        assert_eq!(path.get(7), Some(&b"d14"[..]));
    }

    #[test]
    fn test_root_exactly_at_last_slot() {
        // own name + d6..d1 + "/" = 8 components
        let path = walk(b"f", Some(chain(MAX_DEPTH - 2, true)));
        assert_eq!(path.len(), MAX_DEPTH);
        assert!(path.root_reached());

        // one more level and the root no longer fits
        let path = walk(b"f", Some(chain(MAX_DEPTH - 1, true)));
        assert_eq!(path.len(), MAX_DEPTH);
        assert!(!path.root_reached());
    }

    #[test]
    fn test_parentless_top_counts_as_root() {
        let path = walk(b"x", Some(chain(2, false)));
        assert_eq!(names(&path), vec!["x", "d2", "d1", "/"]);
        assert!(path.root_reached());
    }

    #[test]
    fn test_missing_parent_keeps_own_name_only() {
        let path = walk::<super::testing::TestNode>(b"orphan", None);
        assert_eq!(names(&path), vec!["orphan"]);
        assert!(!path.root_reached());
    }

    #[test]
    fn test_each_component_is_capped() {
        let long = vec![b'n'; 300];
        let path = walk(&long, Some(chain(1, true)));
        assert!(path
            .names()
            .iter()
            .all(|n| n.as_bytes().len() <= crate::MAX_NAME_BYTES));
        assert_eq!(path.get(0).map(<[u8]>::len), Some(crate::MAX_NAME_BYTES));
    }

    #[test]
    fn test_walk_into_zeroes_unused_slots() {
        let mut slots = [NameSlot::from_name(b"stale"); MAX_DEPTH];
        let (count, root) = walk_into(&mut slots, b"a", Some(chain(0, true)));
        assert_eq!((count, root), (2, true));
        assert!(slots[2..].iter().all(NameSlot::is_empty));
    }
}
