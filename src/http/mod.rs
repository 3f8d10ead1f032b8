//! Health, status, and media-download HTTP surface.

pub mod server;
