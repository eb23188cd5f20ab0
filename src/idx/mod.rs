/*
 * Created on Tue Apr 02 2024
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

pub mod mtobt;

use std::{fmt, io};

// re-exports
pub type IndexMTOrd<K> = mtobt::imp::OrdMultiset<K>;

/// Any type implementing this trait can be used as a key inside an ordered tree index.
/// Keys are stored by value; predecessor/successor substitution during removal is what
/// asks for `Clone`
pub trait TreeKey: Ord + Clone {}

impl<T: Ord + Clone> TreeKey for T {}

/// Receives keys one by one during an in-order traversal.
///
/// `emit` is called once per key, in ascending order, under the tree's shared lock; the
/// sink must not reenter the tree. `close` is called exactly once when the walk ends
pub trait KeySink<K> {
    fn emit(&mut self, key: &K);
    fn close(&mut self) {}
}

/// The collecting sink (the test workhorse)
impl<K: Clone> KeySink<K> for Vec<K> {
    fn emit(&mut self, key: &K) {
        self.push(key.clone());
    }
}

/// The default presentation sink: every key followed by a single space, the whole
/// listing terminated by a newline
pub struct SpacedKeyWriter<W: io::Write>(pub W);

impl<K: fmt::Display, W: io::Write> KeySink<K> for SpacedKeyWriter<W> {
    fn emit(&mut self, key: &K) {
        // best effort; a sink has nowhere to report stream failures
        let _ = write!(self.0, "{} ", key);
    }
    fn close(&mut self) {
        let _ = writeln!(self.0);
    }
}
