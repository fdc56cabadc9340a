//! Request and response bodies.

pub mod generate;
