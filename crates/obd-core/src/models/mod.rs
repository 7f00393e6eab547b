//! Data model for the adapter engine

pub mod device;
pub mod dtc;
pub mod pid;
pub mod state;
