use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::models::{Agent, ShipFuel};

/// Payload of a successful refuel call.
#[derive(Debug, Deserialize)]
pub struct RefuelData {
    pub agent: Agent,
    pub fuel: ShipFuel,
    pub transaction: MarketTransaction,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketTransaction {
    pub waypoint_symbol: String,
    pub ship_symbol: String,
    pub trade_symbol: Option<String>,
    pub units: i32,
    pub price_per_unit: Option<i32>,
    pub total_price: i32,
    pub timestamp: DateTime<Utc>,
}
