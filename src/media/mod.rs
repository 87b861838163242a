//! Media packet model
//!
//! This module provides:
//! - The FLV tag packet type carried through every restream
//! - FLV stream framing used by the bundled TCP transport

pub mod flv;

pub use flv::{FlvTag, FlvTagType};
