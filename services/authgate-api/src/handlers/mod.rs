//! HTTP handlers

mod auth;
mod health;
mod password;
mod session;
mod shared;

pub use auth::{refresh, respond_to_challenge, revoke, sign_in, sign_up};
pub use health::{health, ready};
pub use password::{change_password, forgot_password};
pub use session::current_session;
