//! Credential values and their persistence boundary.
//!
//! - [`Credential`]: access/refresh token pair held in memory by the coordinator
//! - [`CredentialStore`]: external persistence collaborator
//! - [`MemoryCredentialStore`]: in-process store for tests and ephemeral sessions

mod store;
mod types;

pub use store::{CredentialStore, MemoryCredentialStore, StoreError};
pub use types::{Credential, DEFAULT_TOKEN_TYPE};
