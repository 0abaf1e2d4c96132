//! HLS playlist handling: reference resolution, relay link shaping and
//! line-level rewriting.

pub mod link;
pub mod resolver;
pub mod rewrite;
