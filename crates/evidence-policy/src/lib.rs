pub mod input;
pub mod provenance;
pub mod signer;

pub use input::{build_policy_input, write_policy_input, PolicyInput};
pub use signer::{read_public_key, verify_detached, PolicyPackage, PolicySigner};
