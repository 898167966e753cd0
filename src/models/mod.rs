pub mod finding;
pub mod identity;
pub mod scan;
pub mod statistics;

pub use finding::*;
pub use identity::Identity;
pub use scan::*;
pub use statistics::*;
