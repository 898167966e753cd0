pub mod events;
pub mod export;
pub mod findings;
pub mod health;
pub mod scans;
pub mod statistics;
