pub mod callbacks;
pub mod catalog;
pub mod decoding;
pub mod error;
pub mod functions;
pub mod insync;
pub mod loader;
pub mod origin;
pub mod text_output;

pub use error::{Error, Result};
