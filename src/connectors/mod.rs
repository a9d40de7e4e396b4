pub mod binance;
pub mod messages;
pub mod traits;
