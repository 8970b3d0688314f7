//! Browser signin requests and their confirmation over SSH.
//!
//! Flow:
//! 1. The browser creates a request and shows `ssh <token>@host`.
//! 2. The SSH capture server records the presented public key on the request.
//! 3. The browser's event stream fires; it posts the token back to finalize.

pub mod error;
pub mod store;
pub mod waiter;


pub use error::*;
pub use store::*;
pub use waiter::*;
