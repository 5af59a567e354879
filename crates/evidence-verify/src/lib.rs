//! Independent verification of a published evidence tree.

pub mod source;
pub mod toolcheck;
pub mod verifier;

pub use source::{source_from_base, DirSource, EvidenceSource, HttpSource};
pub use verifier::{PublicVerifier, SignatureMode, VerifyReport};
