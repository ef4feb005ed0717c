//! Adventure Engine — interactive fiction on top of an autoregressive
//! language model.
//!
//! Assembles a bounded token context from a rolling story, samples new
//! text token by token, runs the result through an ordered chain of text
//! filters, and reveals it incrementally to a display surface.

pub mod core;
pub mod schema;
