pub mod chat;
pub mod probes;
pub mod sessions;
