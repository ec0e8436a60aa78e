// HLS playlist handling: line classification and relay URL rewriting.

pub mod rewrite;

pub use rewrite::{base_url, classify_line, relay_url, LineKind, ManifestRewriter};
