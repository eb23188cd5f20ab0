/*
 * Created on Mon Mar 04 2024
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

//! # skytree
//!
//! An in-memory, thread-safe ordered multiset of comparable keys, backed by a B-tree
//! whose node records are served by a process-wide, lock-free block pool.
//!
//! The tree ([`IndexMTOrd`]) supports duplicate keys and exposes insert, single-occurrence
//! removal, membership tests and in-order traversal through a [`KeySink`]. Reads share
//! the tree, writes own it; the pool underneath is lock-free and grows on demand.

#![deny(unused_crate_dependencies)]
#![deny(unused_imports)]

mod error;
pub mod idx;
pub mod mem;
mod sync;

pub use {
    error::{Error, RuntimeResult},
    idx::{IndexMTOrd, KeySink, SpacedKeyWriter, TreeKey},
    mem::BlockPool,
};
