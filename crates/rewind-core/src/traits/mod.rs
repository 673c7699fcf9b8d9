//! Core traits for rewind backends.

mod driver;

pub use driver::*;
