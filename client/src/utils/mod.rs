//! Small helpers shared by the library and its front-ends.
//!
//! The [`env`] module reads individual environment variables with
//! validation; layered configuration goes through the front-end's config
//! loader instead.

pub mod env;

pub use env::{EnvUtils, EnvVarError};
