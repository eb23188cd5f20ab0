/*
 * Created on Mon Apr 15 2024
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

use {
    super::RawTree,
    crate::{
        error::RuntimeResult,
        idx::{KeySink, TreeKey},
    },
    parking_lot::RwLock,
};

/// A thread-safe ordered multiset. One readers-writer lock guards the whole tree:
/// `contains` and `traverse` share it, `insert` and `remove` own it. There are no
/// per-node locks underneath
pub struct OrdMultiset<K> {
    tree: RwLock<RawTree<K>>,
}

impl<K: TreeKey> OrdMultiset<K> {
    /// New multiset with the given minimum degree (clamped to at least 2)
    pub fn new(degree: usize) -> Self {
        Self {
            tree: RwLock::new(RawTree::new(degree)),
        }
    }
    /// Insert one occurrence of `key`. Fails only if the block pool cannot grow
    pub fn insert(&self, key: K) -> RuntimeResult<()> {
        self.tree.write().insert(key)
    }
    /// Remove at most one occurrence of `key`; an absent key is a silent no-op
    pub fn remove(&self, key: &K) {
        self.tree.write().remove(key)
    }
    /// `true` if at least one occurrence of `key` is present
    pub fn contains(&self, key: &K) -> bool {
        self.tree.read().contains(key)
    }
    /// Emit every key in ascending order into `sink`, then close it.
    ///
    /// The sink runs under the tree's shared lock and must not reenter the tree
    pub fn traverse(&self, sink: &mut impl KeySink<K>) {
        self.tree.read().traverse(sink)
    }
    /// Deep copy. The source stays readable to others while the copy is built
    pub fn try_clone(&self) -> RuntimeResult<Self> {
        let cloned = self.tree.read().try_clone()?;
        Ok(Self {
            tree: RwLock::new(cloned),
        })
    }
    #[cfg(test)]
    pub(crate) fn validate(&self) {
        self.tree.read().validate()
    }
}
