//! Access credential lifecycle: persistence, expiry detection and refresh.

mod accounts_client;
mod models;
mod store;
mod token_file;

pub use accounts_client::{AccountsClient, TokenExchanger, LOGIN_SCOPES};
pub use models::{ClientCredentials, Credential, TokenResponse};
pub use store::CredentialStore;
pub use token_file::TokenFile;
