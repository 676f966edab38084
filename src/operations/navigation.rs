// Navigation and Fuel Planning Module
// Fastest route between waypoints of one system under fuel constraints

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::str::FromStr;

use thiserror::Error;

use crate::models::{Ship, Waypoint};

pub use crate::models::FlightMode;

/// Fixed overhead of every hop, in seconds.
const HOP_OVERHEAD_SECONDS: f64 = 15.0;

/// Modes the planner chooses between.
pub const ROUTABLE_MODES: [FlightMode; 3] = [FlightMode::Cruise, FlightMode::Burn, FlightMode::Drift];

impl FlightMode {
    fn time_multiplier(self) -> f64 {
        match self {
            FlightMode::Cruise => 25.0,
            FlightMode::Burn => 12.5,
            FlightMode::Drift => 250.0,
            FlightMode::Stealth => 30.0,
        }
    }

    /// Fuel units burned flying `distance`. Hops between co-located waypoints are free.
    pub fn fuel_cost(self, distance: f64) -> u32 {
        if distance <= 0.0 {
            return 0;
        }
        let rounded = distance.round().max(1.0) as u32;
        match self {
            FlightMode::Cruise | FlightMode::Stealth => rounded,
            FlightMode::Burn => rounded.saturating_mul(2),
            FlightMode::Drift => 1,
        }
    }

    pub fn travel_seconds(self, distance: f64, engine_speed: u32) -> u32 {
        let speed = engine_speed.max(1) as f64;
        (HOP_OVERHEAD_SECONDS + distance.max(1.0) * self.time_multiplier() / speed).round() as u32
    }
}

impl FromStr for FlightMode {
    type Err = RouteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CRUISE" => Ok(FlightMode::Cruise),
            "BURN" => Ok(FlightMode::Burn),
            "DRIFT" => Ok(FlightMode::Drift),
            "STEALTH" => Ok(FlightMode::Stealth),
            other => Err(RouteError::UnknownFlightMode(other.to_string())),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum RouteError {
    #[error("waypoint {0} is not part of the route graph")]
    UnknownWaypoint(String),
    #[error("no route from {from} to {to} within the ship's fuel limits")]
    NoRoute { from: String, to: String },
    #[error("unknown flight mode {0}")]
    UnknownFlightMode(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteNode {
    pub symbol: String,
    pub x: i32,
    pub y: i32,
    pub has_market: bool,
}

impl From<&Waypoint> for RouteNode {
    fn from(waypoint: &Waypoint) -> Self {
        let (x, y) = waypoint.position();
        Self {
            symbol: waypoint.symbol.clone(),
            x,
            y,
            has_market: waypoint.has_marketplace(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShipProfile {
    /// 0 for ships that don't consume fuel
    pub fuel_capacity: u32,
    pub current_fuel: u32,
    pub engine_speed: u32,
}

impl From<&Ship> for ShipProfile {
    fn from(ship: &Ship) -> Self {
        Self {
            fuel_capacity: ship.fuel.capacity.max(0) as u32,
            current_fuel: ship.fuel.current.max(0) as u32,
            engine_speed: ship.engine.speed.max(1) as u32,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteLeg {
    pub from: String,
    pub to: String,
    pub mode: FlightMode,
    pub distance: f64,
    pub fuel_cost: u32,
    pub travel_seconds: u32,
    /// Refuel to capacity at `from` before departing
    pub refuel_before: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Route {
    pub legs: Vec<RouteLeg>,
    pub total_seconds: u64,
    pub total_fuel: u32,
}

impl Route {
    pub fn refuel_stops(&self) -> usize {
        self.legs.iter().filter(|leg| leg.refuel_before).count()
    }
}

/// Ordering of partial routes: fastest first, then fewer stops at waypoints
/// without a market, then fewer drift legs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
struct RouteCost {
    seconds: u64,
    non_market_stops: u32,
    drift_legs: u32,
}

type StateKey = (usize, u32);

#[derive(Debug, Clone, Copy)]
struct Step {
    previous: StateKey,
    mode: FlightMode,
    fuel_cost: u32,
    refuel_before: bool,
}

pub fn distance(from: (i32, i32), to: (i32, i32)) -> f64 {
    let dx = to.0 as f64 - from.0 as f64;
    let dy = to.1 as f64 - from.1 as f64;
    dx.hypot(dy)
}

/// Dijkstra search over (waypoint, remaining fuel) states.
pub struct RoutePlanner {
    nodes: Vec<RouteNode>,
    index: HashMap<String, usize>,
}

impl RoutePlanner {
    pub fn new(nodes: impl IntoIterator<Item = RouteNode>) -> Self {
        let nodes: Vec<RouteNode> = nodes.into_iter().collect();
        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.symbol.clone(), i))
            .collect();
        Self { nodes, index }
    }

    pub fn from_waypoints(waypoints: &[Waypoint]) -> Self {
        Self::new(waypoints.iter().map(RouteNode::from))
    }

    fn lookup(&self, symbol: &str) -> Result<usize, RouteError> {
        self.index
            .get(symbol)
            .copied()
            .ok_or_else(|| RouteError::UnknownWaypoint(symbol.to_string()))
    }

    fn position(&self, node: usize) -> (i32, i32) {
        (self.nodes[node].x, self.nodes[node].y)
    }

    pub fn plan(&self, origin: &str, destination: &str, ship: ShipProfile) -> Result<Route, RouteError> {
        let start = self.lookup(origin)?;
        let goal = self.lookup(destination)?;
        if start == goal {
            return Ok(Route::default());
        }

        let unlimited = ship.fuel_capacity == 0;
        let start_fuel = if unlimited { 0 } else { ship.current_fuel.min(ship.fuel_capacity) };
        let start_key = (start, start_fuel);

        let mut best: HashMap<StateKey, RouteCost> = HashMap::new();
        let mut steps: HashMap<StateKey, Step> = HashMap::new();
        let mut heap = BinaryHeap::new();
        best.insert(start_key, RouteCost::default());
        heap.push(Reverse((RouteCost::default(), start, start_fuel)));

        while let Some(Reverse((cost, node, fuel))) = heap.pop() {
            if best.get(&(node, fuel)).is_some_and(|known| cost > *known) {
                continue;
            }
            if node == goal {
                return Ok(self.reconstruct((node, fuel), start_key, &steps, ship.engine_speed));
            }

            let refuel_before = !unlimited && self.nodes[node].has_market && fuel < ship.fuel_capacity;
            let available = if refuel_before { ship.fuel_capacity } else { fuel };

            for next in 0..self.nodes.len() {
                if next == node {
                    continue;
                }
                let hop = distance(self.position(node), self.position(next));
                let stop_penalty = u32::from(next != goal && !self.nodes[next].has_market);

                for mode in ROUTABLE_MODES {
                    // Fuel-less ships fly at cruise only.
                    if unlimited && mode != FlightMode::Cruise {
                        continue;
                    }
                    let burned = if unlimited { 0 } else { mode.fuel_cost(hop) };
                    if burned > available {
                        continue;
                    }

                    let next_key = (next, available - burned);
                    let next_cost = RouteCost {
                        seconds: cost.seconds + mode.travel_seconds(hop, ship.engine_speed) as u64,
                        non_market_stops: cost.non_market_stops + stop_penalty,
                        drift_legs: cost.drift_legs + u32::from(mode == FlightMode::Drift),
                    };
                    if best.get(&next_key).is_some_and(|known| next_cost >= *known) {
                        continue;
                    }
                    best.insert(next_key, next_cost);
                    steps.insert(
                        next_key,
                        Step {
                            previous: (node, fuel),
                            mode,
                            fuel_cost: burned,
                            refuel_before,
                        },
                    );
                    heap.push(Reverse((next_cost, next, next_key.1)));
                }
            }
        }

        Err(RouteError::NoRoute {
            from: origin.to_string(),
            to: destination.to_string(),
        })
    }

    fn reconstruct(
        &self,
        goal: StateKey,
        start: StateKey,
        steps: &HashMap<StateKey, Step>,
        engine_speed: u32,
    ) -> Route {
        let mut legs = Vec::new();
        let mut current = goal;
        while current != start {
            // Every reached state except the start has a recorded step.
            let Some(step) = steps.get(&current) else { break };
            let (from, to) = (step.previous.0, current.0);
            let hop = distance(self.position(from), self.position(to));
            legs.push(RouteLeg {
                from: self.nodes[from].symbol.clone(),
                to: self.nodes[to].symbol.clone(),
                mode: step.mode,
                distance: hop,
                fuel_cost: step.fuel_cost,
                travel_seconds: step.mode.travel_seconds(hop, engine_speed),
                refuel_before: step.refuel_before,
            });
            current = step.previous;
        }
        legs.reverse();

        Route {
            total_seconds: legs.iter().map(|leg| leg.travel_seconds as u64).sum(),
            total_fuel: legs.iter().map(|leg| leg.fuel_cost).sum(),
            legs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(symbol: &str, x: i32, y: i32, has_market: bool) -> RouteNode {
        RouteNode {
            symbol: symbol.to_string(),
            x,
            y,
            has_market,
        }
    }

    fn ship(capacity: u32, current: u32) -> ShipProfile {
        ShipProfile {
            fuel_capacity: capacity,
            current_fuel: current,
            engine_speed: 30,
        }
    }

    #[test]
    fn distance_spans_the_full_coordinate_range() {
        assert_eq!(distance((0, 0), (3, 4)), 5.0);
        assert_eq!(distance((i32::MIN, 0), (i32::MAX, 0)), u32::MAX as f64);
        assert_eq!(distance((0, i32::MAX), (0, i32::MIN)), u32::MAX as f64);
    }

    #[test]
    fn flight_mode_costs() {
        assert_eq!(FlightMode::Cruise.fuel_cost(12.4), 12);
        assert_eq!(FlightMode::Burn.fuel_cost(12.4), 24);
        assert_eq!(FlightMode::Drift.fuel_cost(12.4), 1);
        assert_eq!(FlightMode::Cruise.fuel_cost(0.3), 1);
        assert_eq!(FlightMode::Cruise.fuel_cost(0.0), 0);

        assert_eq!(FlightMode::Cruise.travel_seconds(12.0, 30), 25);
        assert_eq!(FlightMode::Drift.travel_seconds(12.0, 30), 115);
        assert_eq!(FlightMode::Burn.travel_seconds(12.0, 30), 20);
        assert_eq!("drift".parse::<FlightMode>(), Ok(FlightMode::Drift));
    }

    #[test]
    fn burns_directly_when_fuel_allows() {
        let planner = RoutePlanner::new([node("A", 0, 0, false), node("B", 10, 0, false)]);
        let route = planner.plan("A", "B", ship(100, 100)).unwrap();
        assert_eq!(route.legs.len(), 1);
        assert_eq!(route.legs[0].mode, FlightMode::Burn);
        assert_eq!(route.total_fuel, 20);
    }

    #[test]
    fn refuels_at_market_instead_of_drifting() {
        let planner = RoutePlanner::new([
            node("A", 0, 0, false),
            node("M", 6, 0, true),
            node("B", 12, 0, false),
        ]);
        let route = planner.plan("A", "B", ship(10, 10)).unwrap();

        let hops: Vec<_> = route.legs.iter().map(|l| (l.to.as_str(), l.mode)).collect();
        assert_eq!(hops, vec![("M", FlightMode::Cruise), ("B", FlightMode::Cruise)]);
        assert!(!route.legs[0].refuel_before);
        assert!(route.legs[1].refuel_before);
        assert_eq!(route.refuel_stops(), 1);
        assert_eq!(route.total_seconds, 40);
    }

    #[test]
    fn drifts_when_nothing_else_reaches() {
        let planner = RoutePlanner::new([node("A", 0, 0, false), node("B", 12, 0, false)]);
        let route = planner.plan("A", "B", ship(10, 10)).unwrap();
        assert_eq!(route.legs.len(), 1);
        assert_eq!(route.legs[0].mode, FlightMode::Drift);
        assert_eq!(route.total_fuel, 1);
    }

    #[test]
    fn empty_tank_away_from_market_has_no_route() {
        let planner = RoutePlanner::new([node("A", 0, 0, false), node("B", 12, 0, true)]);
        assert_eq!(
            planner.plan("A", "B", ship(10, 0)),
            Err(RouteError::NoRoute {
                from: "A".into(),
                to: "B".into()
            })
        );
    }

    #[test]
    fn empty_tank_at_market_refuels_first() {
        let planner = RoutePlanner::new([node("A", 0, 0, true), node("B", 8, 0, false)]);
        let route = planner.plan("A", "B", ship(10, 0)).unwrap();
        assert!(route.legs[0].refuel_before);
        assert_eq!(route.legs[0].mode, FlightMode::Cruise);
    }

    #[test]
    fn fuel_less_ships_cruise_anywhere() {
        let planner = RoutePlanner::new([node("A", 0, 0, false), node("B", 500, 0, false)]);
        let route = planner.plan("A", "B", ship(0, 0)).unwrap();
        assert_eq!(route.legs.len(), 1);
        assert_eq!(route.legs[0].mode, FlightMode::Cruise);
        assert_eq!(route.total_fuel, 0);
    }

    #[test]
    fn same_origin_and_destination_is_empty() {
        let planner = RoutePlanner::new([node("A", 0, 0, false)]);
        assert_eq!(planner.plan("A", "A", ship(10, 10)).unwrap(), Route::default());
    }

    #[test]
    fn unknown_waypoints_are_rejected() {
        let planner = RoutePlanner::new([node("A", 0, 0, false)]);
        assert_eq!(
            planner.plan("A", "Z", ship(10, 10)),
            Err(RouteError::UnknownWaypoint("Z".into()))
        );
    }

    #[test]
    fn ties_prefer_markets_then_cruise() {
        let market = RouteCost {
            seconds: 40,
            non_market_stops: 0,
            drift_legs: 1,
        };
        let bare = RouteCost {
            seconds: 40,
            non_market_stops: 1,
            drift_legs: 0,
        };
        assert!(market < bare);

        let cruise = RouteCost {
            seconds: 40,
            non_market_stops: 0,
            drift_legs: 0,
        };
        assert!(cruise < market);

        let faster = RouteCost {
            seconds: 39,
            non_market_stops: 3,
            drift_legs: 3,
        };
        assert!(faster < cruise);
    }
}
