// Upstream side of the relay: header policies and the spoofed fetch.

pub mod headers;
pub mod traits;
pub mod upstream;
