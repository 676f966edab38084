use serde::{Deserialize, Serialize};

pub const MARKETPLACE_TRAIT: &str = "MARKETPLACE";

/// A waypoint as listed by `/systems/{system}/waypoints`.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Waypoint {
    pub symbol: String,
    #[serde(rename = "type")]
    pub waypoint_type: String,
    pub system_symbol: String,
    pub x: i32,
    pub y: i32,
    /// Parent body when this waypoint is a moon or station
    pub orbits: Option<String>,
    #[serde(default)]
    pub orbitals: Vec<SymbolRef>,
    #[serde(default)]
    pub traits: Vec<WaypointTrait>,
    #[serde(default)]
    pub is_under_construction: bool,
}

impl Waypoint {
    pub fn position(&self) -> (i32, i32) {
        (self.x, self.y)
    }

    pub fn has_trait(&self, symbol: &str) -> bool {
        self.traits.iter().any(|t| t.symbol == symbol)
    }

    pub fn has_marketplace(&self) -> bool {
        self.has_trait(MARKETPLACE_TRAIT)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SymbolRef {
    pub symbol: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WaypointTrait {
    pub symbol: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}
