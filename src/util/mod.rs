//! Small helpers shared by the binary, the config loader and tests

pub mod path;
pub mod testing;
