//! Read-only document trees resolved through a provider.
//!
//! A [`TreeResolver`] classifies an opaque tree reference, loads its root
//! document from a [`DocumentProvider`] and materializes a snapshot of its
//! children as immutable [`DocumentNode`]s.

pub mod config;
pub mod error;
pub mod export;
pub mod fs;
pub mod human;
pub mod memory;
pub mod model;
pub mod progress;
pub mod provider;
pub mod resolver;
pub mod search;
pub mod uri;

pub use config::*;
pub use error::*;
pub use model::*;
pub use progress::*;
pub use provider::*;
pub use resolver::*;
pub use uri::*;
