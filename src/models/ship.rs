use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The account behind the bearer token.
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub account_id: Option<String>,
    pub symbol: String,
    pub headquarters: String,
    pub credits: i64,
    pub starting_faction: String,
    pub ship_count: i32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Ship {
    pub symbol: String,
    pub registration: ShipRegistration,
    pub nav: ShipNav,
    pub engine: ShipEngine,
    pub cargo: ShipCargo,
    pub fuel: ShipFuel,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ShipRegistration {
    pub name: String,
    pub faction_symbol: String,
    pub role: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NavStatus {
    InTransit,
    InOrbit,
    Docked,
}

impl fmt::Display for NavStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            NavStatus::InTransit => "IN_TRANSIT",
            NavStatus::InOrbit => "IN_ORBIT",
            NavStatus::Docked => "DOCKED",
        })
    }
}

/// Speed/fuel trade-off a ship flies with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FlightMode {
    Cruise,
    Burn,
    Drift,
    Stealth,
}

impl FlightMode {
    pub fn as_str(self) -> &'static str {
        match self {
            FlightMode::Cruise => "CRUISE",
            FlightMode::Burn => "BURN",
            FlightMode::Drift => "DRIFT",
            FlightMode::Stealth => "STEALTH",
        }
    }
}

impl fmt::Display for FlightMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ShipNav {
    pub system_symbol: String,
    /// Destination while in transit
    pub waypoint_symbol: String,
    pub route: ShipRoute,
    pub status: NavStatus,
    pub flight_mode: FlightMode,
}

impl ShipNav {
    pub fn is_in_transit(&self) -> bool {
        self.status == NavStatus::InTransit
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ShipRoute {
    pub destination: RouteWaypoint,
    pub origin: RouteWaypoint,
    pub departure_time: DateTime<Utc>,
    pub arrival: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RouteWaypoint {
    pub symbol: String,
    #[serde(rename = "type")]
    pub waypoint_type: String,
    pub system_symbol: String,
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ShipEngine {
    pub symbol: String,
    pub name: String,
    pub speed: i32,
    pub condition: Option<f64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ShipCargo {
    pub capacity: i32,
    pub units: i32,
    #[serde(default)]
    pub inventory: Vec<CargoItem>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CargoItem {
    pub symbol: String,
    pub name: String,
    pub description: String,
    pub units: i32,
}

// capacity 0: the ship does not use fuel
#[derive(Debug, Deserialize, Clone)]
pub struct ShipFuel {
    pub current: i32,
    pub capacity: i32,
    pub consumed: Option<FuelConsumed>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FuelConsumed {
    pub amount: i32,
    pub timestamp: DateTime<Utc>,
}

/// Payload of a successful navigate call.
#[derive(Debug, Deserialize, Clone)]
pub struct NavigationData {
    pub fuel: ShipFuel,
    pub nav: ShipNav,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nav_decodes_typed_status_and_mode() {
        let point = json!({"symbol": "X1-DF55-A1", "type": "PLANET", "systemSymbol": "X1-DF55", "x": 3, "y": 4});
        let nav: ShipNav = serde_json::from_value(json!({
            "systemSymbol": "X1-DF55",
            "waypointSymbol": "X1-DF55-A1",
            "route": {
                "destination": point.clone(),
                "origin": point,
                "departureTime": "2026-10-17T12:00:00.000Z",
                "arrival": "2026-10-17T12:01:30.000Z"
            },
            "status": "IN_TRANSIT",
            "flightMode": "BURN"
        }))
        .unwrap();

        assert!(nav.is_in_transit());
        assert_eq!(nav.flight_mode, FlightMode::Burn);
        assert_eq!((nav.route.arrival - nav.route.departure_time).num_seconds(), 90);
    }
}
