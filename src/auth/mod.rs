pub mod credentials;
pub mod password;
pub mod session;

pub use credentials::{Claims, CredentialCodec, CredentialError};
pub use session::{Identity, SessionContext};
