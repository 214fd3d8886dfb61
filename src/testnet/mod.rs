//! Test support: a recording peer bus, fast settings and block builders

pub mod test_utils;

pub use test_utils::*;
