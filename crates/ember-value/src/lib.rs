//! Script value hierarchy and binary wire codec.
//!
//! A [`Value`] is one script-side value lifted into host space: scalars,
//! byte strings, tables with optional metatables, and compiled functions
//! with captured upvalues. Values travel across the host/VM boundary and
//! over the wire inside a [`Pill`] — a length-prefixed byte envelope with
//! a read cursor.
//!
//! The codec ([`dump`]/[`load`]) is self-describing and version-checked;
//! see `codec` for the exact layout.

pub mod codec;
pub mod pill;
pub mod value;

pub use codec::{dump, load, CodecError, FORMAT_VERSION};
pub use pill::Pill;
pub use value::{Function, Table, Value, ValueTag};
