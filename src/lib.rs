// SpaceTraders API dispatch library
// Every API call goes through one rate-limited, retrying request broker

pub mod models;
pub mod client;
pub mod operations;
pub mod config;
pub mod error;
pub mod verbosity;

// Re-export commonly used types
pub use models::{
    ship::{Agent, Ship, ShipNav, ShipCargo, CargoItem},
    waypoint::Waypoint,
    responses::*,
};

pub use client::{ApiRequestBroker, CallContext, SpaceTradersClient};
pub use config::ClientConfig;
pub use error::{ApiError, ConfigError, RateLimitHint};

// Constants
pub const API_BASE_URL: &str = "https://api.spacetraders.io/v2";
pub const AGENT_TOKEN_FILE: &str = "AGENT_TOKEN";
