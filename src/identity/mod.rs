//! Identity tokens and per-request identity context.
//! Keep the public surface thin and split implementation across sub-modules.

mod principal;
mod token;
mod request_context;

pub use principal::Principal;
pub use token::{TokenIssuer, HmacTokenIssuer, TokenSettings};
pub use request_context::RequestContext;
