//! Fuzzing support: payloads, encoders and the generator engine

pub mod encoding;
pub mod generator;
pub mod payloads;

pub use encoding::Encoding;
pub use payloads::{load_payloads, PayloadSet};
