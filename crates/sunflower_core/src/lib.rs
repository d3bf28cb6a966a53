//! Client library for the MediaWiki action API: sessions, namespace-aware
//! title canonicalization, continued queries and lazily loaded pages.

pub mod config;
pub mod continuation;
pub mod error;
pub mod namespace;
pub mod page;
pub mod session;
pub mod title;
pub mod transport;
pub mod wikimedia;

#[cfg(test)]
mod test_support;

pub use error::{Error, Result};
pub use page::{Page, PageAttributes, SaveOutcome};
pub use session::{SessionRegistry, WikiSession};
