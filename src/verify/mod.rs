pub mod presence;
pub mod verifier;
