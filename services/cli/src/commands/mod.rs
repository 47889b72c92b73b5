pub mod admin;
pub mod issuer;
pub mod verifier;
pub mod wallet;
pub mod watch;
