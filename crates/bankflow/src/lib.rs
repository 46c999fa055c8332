//! BankFlow core
//!
//! Shared foundation for the BankFlow platform: the domain error taxonomy,
//! environment-driven settings, the config-value cipher, chunk/document
//! types, the embeddings trait, identifier sanitizers, and structured JSON
//! logging setup.
//!
//! Every other crate in the workspace depends on this one; nothing here
//! depends on the HTTP or storage layers.

pub mod core;

pub use crate::core::documents::Chunk;
pub use crate::core::embeddings::Embeddings;
pub use crate::core::error::{Error, Result};
pub use crate::core::settings::Settings;
