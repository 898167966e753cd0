pub mod hub;

pub use hub::{ChangeHub, ChannelKey, ScanCallback, Subscription};
