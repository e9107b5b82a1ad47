//! Runtime system
//!
//! This module contains the FIFO task scheduler and the script-host boundary
//! it executes tasks through.

pub mod host;
pub mod scheduler;
