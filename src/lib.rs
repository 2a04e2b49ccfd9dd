#![allow(clippy::bool_comparison)]

pub mod collision;
pub mod primitive;
pub mod tree;

// Reexport necessary items.
pub use slotmap::new_key_type as define_key;
pub use slotmap::Key;
