//! # stratus-codec
//!
//! Positional wire format and argument encoding for Stratus.
//!
//! This crate provides:
//! - `WireWriter` / `WireReader` - Positional array encoding
//! - `Element` - rkyv-backed encoding of single values
//! - `ArgumentTupleCodec` - Lenient encoding of argument tuples (arity 1..=20)
//! - `MethodArgs` - Request payload encoding for a method's parameter list
//! - Hub message encoding and decoding (`hub` module)
//!
//! ## Wire Format
//!
//! ```text
//! +---------------+-------------------+-----+-------------------+
//! | Count (4 LE)  | Len (4 LE) | data | ... | Len (4 LE) | data |
//! +---------------+-------------------+-----+-------------------+
//! ```
//!
//! A length of `0xFFFF_FFFF` marks a nil element.

mod args;
pub mod hub;
mod tuple;
mod wire;

pub use args::{MethodArgs, decode_response, encode_response, is_nil, response_shape};
pub use tuple::{ArgumentTuple, ArgumentTupleCodec, DefaultArguments};
pub use wire::{Element, NIL_LENGTH, WireReader, WireWriter};

// Re-export for convenience
pub use rkyv::util::AlignedVec;
