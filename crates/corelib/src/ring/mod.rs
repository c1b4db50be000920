//! Consistent hash ring implementation.
//!
//! The ring is an immutable, sorted list of vnodes; every mutator
//! (`add_vnodes`, `drop_nodes`) returns a new `Ring` rather than mutating
//! in place, matching the source's `find_successor`/`add_vnodes`/
//! `drop_nodes`/`iter_from`/`preference_list` contract.

mod ring;

pub use ring::{Ring, RingBuilder};
