//! Connection lifecycle: the one live session and its state machine

mod manager;

pub use manager::ConnectionManager;
