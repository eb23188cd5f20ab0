/*
 * Created on Tue Apr 09 2024
 *
 * This file is a part of Skytable
 * Skytable (formerly known as TerrabaseDB or Skybase) is a free and open-source
 * NoSQL database written by Sayan Nandan ("the Author") with the
 * vision to provide flexibility in data modelling without compromising
 * on performance, queryability or scalability.
 *
 * Copyright (c) 2024, Sayan Nandan <ohsayan@outlook.com>
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 *
*/

pub mod imp;
#[cfg(test)]
mod tests;

/*
    ordered multiset tree impl
    ---
    A B-tree of minimum degree t (clamped to >= 2) storing duplicate keys. Node records
    are fixed-size and live in mem::BlockPool blocks; the per-node key and child vectors
    spill to the host allocator, which is what keeps the record size constant for every
    key type.

    Mutations are proactive and top-down: an insert splits every full node ahead of the
    descent and a remove refills every deficient node ahead of the descent, so no path
    ever has to unwind to repair an ancestor. Equal keys sort right of their duplicates
    at every level, which keeps runs of duplicates grouped right-leaning.

    Every helper bounds-checks its slot arguments and backs out without mutating on a
    mismatch. None of those guards can fire for a well-formed tree under the serialized
    mutation model (see imp); they keep a misuse from turning into UB.

    RawTree itself is unsynchronized: `&mut` routes rely on the caller for exclusivity
    and `&` routes may only overlap with other `&` routes. The public shell in imp maps
    this 1:1 onto a readers-writer lock.
    -- Sayan (@ohsayan)
*/

use {
    crate::{
        error::RuntimeResult,
        idx::{KeySink, TreeKey},
        mem::{BlockPool, BLOCK_ALIGN, BLOCK_SIZE},
    },
    core::{mem, ptr::NonNull},
};

/// Lower clamp for the minimum degree
pub const DEGREE_MIN: usize = 2;

type NodePtr<K> = NonNull<TreeNode<K>>;

/// A single tree node. The record itself sits in a pool block; keys and children use
/// host allocations
struct TreeNode<K> {
    leaf: bool,
    keys: Vec<K>,
    children: Vec<NodePtr<K>>,
}

impl<K> TreeNode<K> {
    // node records must fit a pool block, whatever K is
    const _BLOCK_FIT: () = assert!(
        mem::size_of::<Self>() <= BLOCK_SIZE && mem::align_of::<Self>() <= BLOCK_ALIGN
    );
    /// Carve a fresh node out of the block pool
    fn alloc(leaf: bool) -> RuntimeResult<NodePtr<K>> {
        let _ = Self::_BLOCK_FIT;
        let block = BlockPool::instance().allocate()?;
        let node = block.cast::<Self>();
        unsafe {
            // UNSAFE(@ohsayan): fresh block, sized and aligned for us per the check above
            node.as_ptr().write(Self {
                leaf,
                keys: Vec::new(),
                children: Vec::new(),
            });
        }
        Ok(node)
    }
    /// Destroy this node only and hand its block back to the pool.
    ///
    /// ## Safety
    /// `node` must be live and pool-backed, its children must already be detached, and
    /// it must not be referenced again
    unsafe fn free(node: NodePtr<K>) {
        debug_assert!((*node.as_ptr()).children.is_empty());
        // UNSAFE(@ohsayan): caller contract; drops the vectors, then recycles the block
        node.as_ptr().drop_in_place();
        BlockPool::instance().deallocate(node.as_ptr() as *mut u8);
    }
    /// Tear down a whole subtree without recursing (a deep tree must not blow the stack)
    ///
    /// ## Safety
    /// `node` must be a live, exclusively owned subtree root
    unsafe fn release_subtree(node: NodePtr<K>) {
        let mut pending = vec![node];
        while let Some(current) = pending.pop() {
            // UNSAFE(@ohsayan): every queued pointer is a live, exclusively owned node
            pending.append(&mut (*current.as_ptr()).children);
            Self::free(current);
        }
    }
}

/// The raw, unsynchronized tree
pub(in crate::idx) struct RawTree<K> {
    t: usize,
    root: Option<NodePtr<K>>,
}

// the tree owns its nodes exclusively; under external serialization it is exactly as
// thread-safe as the keys it stores
unsafe impl<K: Send> Send for RawTree<K> {}
unsafe impl<K: Sync> Sync for RawTree<K> {}

impl<K> RawTree<K> {
    /// New tree with the given minimum degree, clamped to [`DEGREE_MIN`]. The root leaf
    /// is carved lazily on first insert
    pub fn new(degree: usize) -> Self {
        Self {
            t: degree.max(DEGREE_MIN),
            root: None,
        }
    }
    /// Max keys per node: `2t - 1`
    #[inline(always)]
    fn max_keys(&self) -> usize {
        2 * self.t - 1
    }
}

impl<K: TreeKey> RawTree<K> {
    /// Insert one occurrence of `key`. Duplicates are welcome; the only failure is the
    /// pool running dry
    pub fn insert(&mut self, key: K) -> RuntimeResult<()> {
        let root = match self.root {
            Some(root) => root,
            None => {
                let fresh = TreeNode::alloc(true)?;
                self.root = Some(fresh);
                fresh
            }
        };
        if unsafe { (*root.as_ptr()).keys.len() } == self.max_keys() {
            // grow upward: a fresh internal root adopts the old root as its only child
            let new_root = TreeNode::alloc(false)?;
            unsafe {
                // UNSAFE(@ohsayan): both nodes are live and nothing else can see them
                (*new_root.as_ptr()).children.push(root);
            }
            self.root = Some(new_root);
            self.split_child(new_root, 0)?;
            self.insert_non_full(new_root, key)
        } else {
            self.insert_non_full(root, key)
        }
    }
    /// Descend to a leaf, splitting every full child ahead of the descent. The caller
    /// guarantees `node` itself is not full
    fn insert_non_full(&mut self, node: NodePtr<K>, key: K) -> RuntimeResult<()> {
        unsafe {
            // UNSAFE(@ohsayan): node is live; state is re-read after every helper call
            let n = node.as_ptr();
            // rear-to-front scan for the slot after the last key <= key, so equal keys
            // land right of their duplicates
            let mut idx = (*n).keys.len();
            while idx > 0 && key < (&(*n).keys)[idx - 1] {
                idx -= 1;
            }
            if (*n).leaf {
                (*n).keys.insert(idx, key);
                return Ok(());
            }
            if idx < (*n).children.len()
                && (*(&(*n).children)[idx].as_ptr()).keys.len() == self.max_keys()
            {
                self.split_child(node, idx)?;
                // the freshly promoted separator decides the side; ties stay left of it
                if idx < (*n).keys.len() && key > (&(*n).keys)[idx] {
                    idx += 1;
                }
            }
            if idx < (*n).children.len() {
                let child = (&(*n).children)[idx];
                return self.insert_non_full(child, key);
            }
            Ok(())
        }
    }
    /// Split the full child at `idx` of `parent`, promoting its median into `parent`.
    /// Out-of-range or not-actually-full arguments are left untouched
    fn split_child(&mut self, parent: NodePtr<K>, idx: usize) -> RuntimeResult<()> {
        let t = self.t;
        unsafe {
            // UNSAFE(@ohsayan): parent is live; the child pointers below come straight
            // off it and are distinct nodes
            let p = parent.as_ptr();
            if idx >= (*p).children.len() {
                return Ok(());
            }
            let y = (&(*p).children)[idx];
            if (*y.as_ptr()).keys.len() < self.max_keys() {
                return Ok(());
            }
            let z = TreeNode::alloc((*y.as_ptr()).leaf)?;
            // upper half moves over, the median moves up
            let upper = (*y.as_ptr()).keys.split_off(t);
            let Some(median) = (*y.as_ptr()).keys.pop() else {
                // unreachable: the fullness check above pins y's key count
                TreeNode::free(z);
                return Ok(());
            };
            (*z.as_ptr()).keys = upper;
            if !(*y.as_ptr()).leaf {
                (*z.as_ptr()).children = (*y.as_ptr()).children.split_off(t);
            }
            (*p).keys.insert(idx, median);
            (*p).children.insert(idx + 1, z);
        }
        Ok(())
    }
    /// `true` if at least one occurrence of `key` is present
    pub fn contains(&self, key: &K) -> bool {
        let mut current = self.root;
        while let Some(node) = current {
            let n = unsafe {
                // UNSAFE(@ohsayan): shared walk; writers are excluded by the caller
                &*node.as_ptr()
            };
            let mut idx = 0;
            while idx < n.keys.len() && *key > n.keys[idx] {
                idx += 1;
            }
            if idx < n.keys.len() && *key == n.keys[idx] {
                return true;
            }
            if n.leaf || idx >= n.children.len() {
                return false;
            }
            current = Some(n.children[idx]);
        }
        false
    }
    /// In-order traversal: one `emit` per key, ascending, then a single `close`
    pub fn traverse(&self, sink: &mut impl KeySink<K>) {
        if let Some(root) = self.root {
            Self::traverse_subtree(root, sink);
        }
        sink.close();
    }
    fn traverse_subtree(node: NodePtr<K>, sink: &mut impl KeySink<K>) {
        let n = unsafe {
            // UNSAFE(@ohsayan): shared walk; writers are excluded by the caller
            &*node.as_ptr()
        };
        let mut idx = 0;
        while idx < n.keys.len() {
            if !n.leaf && idx < n.children.len() {
                Self::traverse_subtree(n.children[idx], sink);
            }
            sink.emit(&n.keys[idx]);
            idx += 1;
        }
        if !n.leaf && idx < n.children.len() {
            Self::traverse_subtree(n.children[idx], sink);
        }
    }
    /// Remove at most one occurrence of `key`. Absent keys (and empty trees) are a
    /// silent no-op
    pub fn remove(&mut self, key: &K) {
        let Some(root) = self.root else { return };
        self.remove_from(root, key);
        unsafe {
            // UNSAFE(@ohsayan): root is live; the collapse only rewires, it never
            // cascades into the promoted child
            let r = root.as_ptr();
            if (*r).keys.is_empty() && !(*r).leaf && !(*r).children.is_empty() {
                // the root ran empty: its single remaining child is the new root
                let promoted = (&(*r).children)[0];
                (*r).children.clear();
                TreeNode::free(root);
                self.root = Some(promoted);
            }
        }
    }
    fn remove_from(&mut self, node: NodePtr<K>, key: &K) {
        unsafe {
            // UNSAFE(@ohsayan): node is live; slots are re-read after every helper call
            let n = node.as_ptr();
            let idx = Self::find_slot(node, key);
            if idx < (*n).keys.len() && (&(*n).keys)[idx] == *key {
                if (*n).leaf {
                    // direct hit in a leaf
                    (*n).keys.remove(idx);
                } else {
                    self.remove_internal(node, idx);
                }
                return;
            }
            if (*n).leaf {
                // not present anywhere
                return;
            }
            let went_rightmost = idx == (*n).keys.len();
            if idx < (*n).children.len() && (*(&(*n).children)[idx].as_ptr()).keys.len() < self.t {
                self.fill(node, idx);
            }
            let mut idx = idx;
            if went_rightmost && idx >= (*n).children.len() {
                // the rightmost child was merged leftward by the fill
                if idx == 0 || (*n).children.is_empty() {
                    return;
                }
                idx = (*n).children.len() - 1;
            }
            if idx < (*n).children.len() {
                let child = (&(*n).children)[idx];
                self.remove_from(child, key);
            }
        }
    }
    /// First slot of `node` whose key is `>= key`
    fn find_slot(node: NodePtr<K>, key: &K) -> usize {
        let n = unsafe {
            // UNSAFE(@ohsayan): live node, shared read
            &*node.as_ptr()
        };
        let mut idx = 0;
        while idx < n.keys.len() && n.keys[idx] < *key {
            idx += 1;
        }
        idx
    }
    /// Remove `keys[idx]` of an internal node: substitute the predecessor or successor
    /// if an adjacent child can spare a key, else merge the two adjacent children and
    /// push the problem down
    fn remove_internal(&mut self, node: NodePtr<K>, idx: usize) {
        unsafe {
            // UNSAFE(@ohsayan): node is live; every child deref is bounds-checked first
            let n = node.as_ptr();
            if idx >= (*n).keys.len() {
                return;
            }
            let key = (&(*n).keys)[idx].clone();
            let have_left = idx < (*n).children.len();
            let have_right = idx + 1 < (*n).children.len();
            if have_left && (*(&(*n).children)[idx].as_ptr()).keys.len() >= self.t {
                if let Some(pred) = Self::predecessor(node, idx) {
                    (&mut (*n).keys)[idx] = pred.clone();
                    let left = (&(*n).children)[idx];
                    self.remove_from(left, &pred);
                }
            } else if have_right && (*(&(*n).children)[idx + 1].as_ptr()).keys.len() >= self.t {
                if let Some(succ) = Self::successor(node, idx) {
                    (&mut (*n).keys)[idx] = succ.clone();
                    let right = (&(*n).children)[idx + 1];
                    self.remove_from(right, &succ);
                }
            } else if have_right {
                Self::merge(node, idx);
                // the key now lives somewhere under the merged child
                if idx < (*n).children.len() {
                    let merged = (&(*n).children)[idx];
                    self.remove_from(merged, &key);
                }
            }
        }
    }
    /// Rightmost key under `children[idx]`
    fn predecessor(node: NodePtr<K>, idx: usize) -> Option<K> {
        unsafe {
            // UNSAFE(@ohsayan): bounds-checked walk over live nodes
            let n = node.as_ptr();
            if idx >= (*n).children.len() {
                return None;
            }
            let mut current = (&(*n).children)[idx];
            while !(*current.as_ptr()).leaf && !(*current.as_ptr()).children.is_empty() {
                let c = &(*current.as_ptr()).children;
                current = c[c.len() - 1];
            }
            (*current.as_ptr()).keys.last().cloned()
        }
    }
    /// Leftmost key under `children[idx + 1]`
    fn successor(node: NodePtr<K>, idx: usize) -> Option<K> {
        unsafe {
            // UNSAFE(@ohsayan): bounds-checked walk over live nodes
            let n = node.as_ptr();
            if idx + 1 >= (*n).children.len() {
                return None;
            }
            let mut current = (&(*n).children)[idx + 1];
            while !(*current.as_ptr()).leaf && !(*current.as_ptr()).children.is_empty() {
                current = (&(*current.as_ptr()).children)[0];
            }
            (*current.as_ptr()).keys.first().cloned()
        }
    }
    /// Get `children[idx]` to at least `t` keys before descending into it: borrow
    /// through the parent from a rich sibling, else merge with one
    fn fill(&mut self, node: NodePtr<K>, idx: usize) {
        unsafe {
            // UNSAFE(@ohsayan): node is live; sibling derefs are bounds-checked
            let n = node.as_ptr();
            if idx >= (*n).children.len() {
                return;
            }
            let last = (*n).children.len() - 1;
            if idx > 0 && (*(&(*n).children)[idx - 1].as_ptr()).keys.len() >= self.t {
                Self::borrow_from_prev(node, idx);
            } else if idx < last && (*(&(*n).children)[idx + 1].as_ptr()).keys.len() >= self.t {
                Self::borrow_from_next(node, idx);
            } else if idx < last {
                Self::merge(node, idx);
            } else if idx > 0 {
                Self::merge(node, idx - 1);
            }
        }
    }
    /// Rotate a key in through the parent from the left sibling
    fn borrow_from_prev(node: NodePtr<K>, idx: usize) {
        unsafe {
            // UNSAFE(@ohsayan): parent, child and sibling are distinct live nodes
            let n = node.as_ptr();
            if idx == 0 || idx >= (*n).children.len() || idx - 1 >= (*n).keys.len() {
                return;
            }
            let child = (&(*n).children)[idx].as_ptr();
            let sibling = (&(*n).children)[idx - 1].as_ptr();
            let Some(stolen) = (*sibling).keys.pop() else {
                return;
            };
            let separator = mem::replace(&mut (&mut (*n).keys)[idx - 1], stolen);
            (*child).keys.insert(0, separator);
            if !(*child).leaf {
                if let Some(tail_child) = (*sibling).children.pop() {
                    (*child).children.insert(0, tail_child);
                }
            }
        }
    }
    /// Rotate a key in through the parent from the right sibling
    fn borrow_from_next(node: NodePtr<K>, idx: usize) {
        unsafe {
            // UNSAFE(@ohsayan): parent, child and sibling are distinct live nodes
            let n = node.as_ptr();
            if idx >= (*n).keys.len() || idx + 1 >= (*n).children.len() {
                return;
            }
            let child = (&(*n).children)[idx].as_ptr();
            let sibling = (&(*n).children)[idx + 1].as_ptr();
            if (*sibling).keys.is_empty() {
                return;
            }
            let stolen = (*sibling).keys.remove(0);
            let separator = mem::replace(&mut (&mut (*n).keys)[idx], stolen);
            (*child).keys.push(separator);
            if !(*child).leaf && !(*sibling).children.is_empty() {
                let head_child = (*sibling).children.remove(0);
                (*child).children.push(head_child);
            }
        }
    }
    /// Fold `keys[idx]` and the whole right sibling into `children[idx]`, then release
    /// the drained sibling's block
    fn merge(node: NodePtr<K>, idx: usize) {
        unsafe {
            // UNSAFE(@ohsayan): the sibling is fully drained before its block is recycled
            let n = node.as_ptr();
            if idx >= (*n).keys.len() || idx + 1 >= (*n).children.len() {
                return;
            }
            let child = (&(*n).children)[idx].as_ptr();
            let sibling = (&(*n).children)[idx + 1];
            let separator = (*n).keys.remove(idx);
            (*child).keys.push(separator);
            (*child).keys.append(&mut (*sibling.as_ptr()).keys);
            if !(*child).leaf {
                (*child).children.append(&mut (*sibling.as_ptr()).children);
            }
            (*n).children.remove(idx + 1);
            TreeNode::free(sibling);
        }
    }
    /// Deep-copy the whole tree. Every node is a fresh pool block; a failure releases
    /// everything built so far
    pub fn try_clone(&self) -> RuntimeResult<Self> {
        let root = match self.root {
            Some(root) => Some(Self::clone_subtree(root)?),
            None => None,
        };
        Ok(Self { t: self.t, root })
    }
    fn clone_subtree(node: NodePtr<K>) -> RuntimeResult<NodePtr<K>> {
        unsafe {
            // UNSAFE(@ohsayan): the source subtree is a shared read; fresh nodes are
            // exclusively ours until returned
            let n = &*node.as_ptr();
            let fresh = TreeNode::alloc(n.leaf)?;
            (*fresh.as_ptr()).keys = n.keys.clone();
            for child in &n.children {
                match Self::clone_subtree(*child) {
                    Ok(cloned) => (*fresh.as_ptr()).children.push(cloned),
                    Err(e) => {
                        TreeNode::release_subtree(fresh);
                        return Err(e);
                    }
                }
            }
            Ok(fresh)
        }
    }
}

impl<K> Drop for RawTree<K> {
    fn drop(&mut self) {
        if let Some(root) = self.root.take() {
            unsafe {
                // UNSAFE(@ohsayan): we own the whole subtree and nothing aliases it here
                TreeNode::release_subtree(root);
            }
        }
    }
}

#[cfg(test)]
impl<K: TreeKey> RawTree<K> {
    /// Walk the whole tree asserting the structural invariants: fanout, per-node key
    /// counts, sortedness, separator bounds and uniform leaf depth
    pub(crate) fn validate(&self) {
        let Some(root) = self.root else { return };
        let mut leaf_depth = None;
        Self::validate_subtree(root, self.t, true, 0, &mut leaf_depth);
    }
    fn validate_subtree(
        node: NodePtr<K>,
        t: usize,
        is_root: bool,
        depth: usize,
        leaf_depth: &mut Option<usize>,
    ) {
        let n = unsafe { &*node.as_ptr() };
        assert!(n.keys.len() <= 2 * t - 1, "node over capacity");
        if !is_root {
            assert!(n.keys.len() >= t - 1, "non-root node under minimum");
        }
        assert!(
            n.keys.windows(2).all(|w| w[0] <= w[1]),
            "node keys out of order"
        );
        if n.leaf {
            assert!(n.children.is_empty(), "leaf with children");
            match leaf_depth {
                Some(d) => assert_eq!(*d, depth, "leaves at unequal depths"),
                None => *leaf_depth = Some(depth),
            }
            return;
        }
        assert_eq!(n.children.len(), n.keys.len() + 1, "internal fanout broken");
        for (i, child) in n.children.iter().enumerate() {
            let c = unsafe { &*child.as_ptr() };
            if i > 0 {
                assert!(
                    c.keys.iter().all(|k| *k >= n.keys[i - 1]),
                    "child keys below left separator"
                );
            }
            if i < n.keys.len() {
                assert!(
                    c.keys.iter().all(|k| *k <= n.keys[i]),
                    "child keys above right separator"
                );
            }
            Self::validate_subtree(*child, t, false, depth + 1, leaf_depth);
        }
    }
}
