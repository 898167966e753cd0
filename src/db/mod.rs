pub mod connection;
pub mod findings;
pub mod jobs;
pub mod schema;
pub mod scans;

pub use connection::Database;
pub use jobs::{JobState, ScanJob};
