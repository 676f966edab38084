// SpaceTraders command line - Main Entry Point
// Every command shares one rate-limited request broker

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use spacetraders_dispatch::client::{CallContext, EnvOrFileToken, SpaceTradersClient};
use spacetraders_dispatch::operations::navigation::{RoutePlanner, ShipProfile};
use spacetraders_dispatch::verbosity::init_tracing;
use spacetraders_dispatch::ClientConfig;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "spacetraders", version, about = "Rate-limited SpaceTraders API client")]
struct Cli {
    /// Configuration file, created with defaults when missing
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show the agent behind the token
    Agent,
    /// List every ship of the agent
    Ships,
    /// Plan the fastest fuel-feasible route for a ship inside its system
    Route { ship: String, destination: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = ClientConfig::load_or_create(&cli.config)?;
    config.validate()?;
    config.log_summary();

    let tokens = Arc::new(EnvOrFileToken::load(&config.api.token_file)?);
    let client = SpaceTradersClient::connect(&config, tokens)?;

    // Ctrl+C cancels whatever call is in flight.
    let ctx = CallContext::new().with_label("command", command_name(&cli.command));
    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling outstanding API calls");
            interrupt.cancel();
        }
    });

    let outcome = run(&client.with_context(ctx), cli.command).await;

    client.shutdown().await;
    let metrics = client.broker().metrics();
    info!(
        processed = metrics.total_processed,
        retries = metrics.retries,
        rate_limited = metrics.rate_limited_responses,
        avg_queue_wait_ms = metrics.avg_queue_wait().as_millis() as u64,
        "broker stopped"
    );
    outcome
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Agent => "agent",
        Command::Ships => "ships",
        Command::Route { .. } => "route",
    }
}

async fn run(client: &SpaceTradersClient, command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Agent => {
            let agent = client.get_agent().await?;
            println!("📊 Agent {}", agent.symbol);
            println!("  Headquarters: {}", agent.headquarters);
            println!("  Credits: {}", agent.credits);
            println!("  Ships: {}", agent.ship_count);
        }
        Command::Ships => {
            let mut page = 1;
            loop {
                let ships = client.get_ships(page, 20).await?;
                for ship in &ships {
                    println!(
                        "🚢 {:<16} {:<12} {:<10} at {} (fuel {}/{})",
                        ship.symbol,
                        ship.registration.role,
                        ship.nav.status,
                        ship.nav.waypoint_symbol,
                        ship.fuel.current,
                        ship.fuel.capacity
                    );
                }
                if ships.len() < 20 {
                    break;
                }
                page += 1;
            }
        }
        Command::Route { ship, destination } => {
            let ship = client.get_ship(&ship).await?;
            if ship.nav.is_in_transit() {
                println!("🛰️  {} is in transit, planning from its arrival at {}", ship.symbol, ship.nav.waypoint_symbol);
            }
            let waypoints = client.get_all_system_waypoints(&ship.nav.system_symbol).await?;
            let planner = RoutePlanner::from_waypoints(&waypoints);
            let route = planner.plan(&ship.nav.waypoint_symbol, &destination, ShipProfile::from(&ship))?;

            if route.legs.is_empty() {
                println!("📍 {} is already at {}", ship.symbol, destination);
                return Ok(());
            }
            println!(
                "🗺️  {} → {}: {} legs, {}s, {} fuel, {} refuel stops",
                ship.nav.waypoint_symbol,
                destination,
                route.legs.len(),
                route.total_seconds,
                route.total_fuel,
                route.refuel_stops()
            );
            for leg in &route.legs {
                println!(
                    "  {}{} → {} [{}] {:.1}u, {} fuel, {}s",
                    if leg.refuel_before { "⛽ " } else { "" },
                    leg.from,
                    leg.to,
                    leg.mode,
                    leg.distance,
                    leg.fuel_cost,
                    leg.travel_seconds
                );
            }
        }
    }
    Ok(())
}
