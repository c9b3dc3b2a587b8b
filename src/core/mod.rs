//! Core record types

pub mod gpu;
pub mod process;
