//! Public library modules for the CLI crate
pub mod follow;
pub mod output;
