//! Login, account selection and consent screens.
//!
//! [`InteractionController`] reads the pending interaction from a
//! [`ProtocolEngine`](crate::provider::ProtocolEngine), checks credentials and
//! reports the outcome back to the engine.

pub mod controller;
pub mod handlers;
pub mod views;

pub use controller::{INVALID_CREDENTIALS, InteractionController, LoginForm, Outcome};
pub use views::View;
