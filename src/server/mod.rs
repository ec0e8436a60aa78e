// HTTP surface: router, host filtering and server lifecycle.

pub mod handler;
