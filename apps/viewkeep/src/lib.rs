//! # viewkeep
//!
//! Library half of the operator CLI: argument definitions and the command
//! implementations, exposed so they can be tested without spawning a process.

pub mod cli;
