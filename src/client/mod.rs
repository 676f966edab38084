// Client module - rate-limited SpaceTraders API dispatch
pub mod api;
pub mod api_broker;
pub mod context;
pub mod executor;
pub mod rate_limiter;
pub mod retry;
pub mod token;

pub use api::SpaceTradersClient;
pub use api_broker::{ApiRequestBroker, BrokerMetrics};
pub use context::{CallContext, Labels};
pub use executor::{ApiRequest, Executor, HttpExecutor};
pub use rate_limiter::RateLimiter;
pub use retry::{RetryDecision, RetryPolicy};
pub use token::{EnvOrFileToken, FileToken, StaticToken, TokenProvider};
