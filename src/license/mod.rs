//! Signed license keys and the legacy access tokens derived from them.

mod access_token;
mod codec;
mod keys;

pub use access_token::*;
pub use codec::*;
pub use keys::*;
