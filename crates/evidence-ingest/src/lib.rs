pub mod github;
pub mod payload;
pub mod platform;
pub mod verifier;

pub use github::GitHubClient;
pub use payload::{load_payload, parse_payload};
pub use platform::{CiPlatform, MemoryCiPlatform, RemoteRun};
pub use verifier::SourceRunVerifier;
