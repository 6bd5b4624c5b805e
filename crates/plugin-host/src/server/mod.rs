//! HTTP Server
//!
//! Administrative upload endpoints plus the catch-all plugin dispatcher.

mod handler;
mod protocol;
mod router;
mod state;

pub use handler::*;
pub use protocol::*;
pub use router::*;
pub use state::*;
