pub mod compose;
pub mod history;
pub mod schema;

pub use compose::{compose, compose_and_publish, publish, ComposeInputs, ComposeOptions};
pub use history::{load_index, snapshot, snapshot_name};
pub use schema::EVIDENCE_SCHEMA;
