pub mod connection;
pub mod messages;

pub use connection::PriceFeed;
pub use messages::Subscription;
