pub mod sign;
pub use sign::{derive_key, sign, verify, PrivateKey};
