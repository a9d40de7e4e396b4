pub mod backoff;
pub mod engine;
pub mod market_stream;
pub mod shutdown;
pub mod snapshot;
pub mod state;
pub mod user_stream;
