//! Auth & Identity (C6): opaque bearer tokens, binary `admin | user` roles.

pub mod api;
pub mod middleware;
pub mod models;
pub mod token;
pub mod user_store;

pub use middleware::auth_middleware;
pub use token::TokenIssuer;
pub use user_store::UserStore;
