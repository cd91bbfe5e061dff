//! Domain types - request identity and window key derivation.

mod identity;
mod window;

pub use identity::RequestIdentity;
pub use window::WindowKey;
