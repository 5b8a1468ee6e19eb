//! Authentication Module
//! Mission: Accounts, bearer-token sessions, revocation, and role checks

pub mod api;
pub mod gate;
pub mod jwt;
pub mod middleware;
pub mod models;
pub mod revocation;
pub mod user_store;

pub use api::AuthState;
pub use gate::{authorize, AuthGate, Authenticated, Decision};
pub use jwt::{JwtHandler, TokenCodec};
pub use middleware::{optional_auth, require_admin, require_auth};
pub use models::{Identity, User, UserRole};
pub use revocation::{RevocationStore, SqliteRevocationStore};
pub use user_store::{CredentialStore, UserStore};
