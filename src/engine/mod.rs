// Relay orchestration: request validation and the fetch/rewrite/stream pipeline.

pub mod relay;
