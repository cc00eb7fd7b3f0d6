// SPDX-License-Identifier: MIT
//! Library crate for the relay engine: configuration, the relay protocol
//! itself, observability helpers, and health reporting. `main.rs` wires
//! these into the running server binary.

pub mod config;
pub mod health;
pub mod observability;
pub mod relay;
