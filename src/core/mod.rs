//! Core processing modules
//!
//! Text cleanup, duplicate filtering, failure counting, shared signals
//! and the injectable clock everything else is timed against.

pub mod clock;
pub mod dedup;
pub mod no_match;
pub mod signals;
pub mod text_normalizer;
