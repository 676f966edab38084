use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::json;

use crate::client::api_broker::ApiRequestBroker;
use crate::client::context::CallContext;
use crate::client::executor::{ApiRequest, Executor, HttpExecutor};
use crate::client::rate_limiter::RateLimiter;
use crate::client::retry::RetryPolicy;
use crate::client::token::TokenProvider;
use crate::config::ClientConfig;
use crate::error::{ConfigError, Result};
use crate::models::*;

/// Waypoint listing page size accepted by the API.
pub const MAX_PAGE_LIMIT: u32 = 20;

/// Typed SpaceTraders endpoints; every call goes through the shared broker.
#[derive(Clone)]
pub struct SpaceTradersClient {
    broker: ApiRequestBroker,
    ctx: CallContext,
}

impl SpaceTradersClient {
    pub fn new(broker: ApiRequestBroker) -> Self {
        Self {
            broker,
            ctx: CallContext::new(),
        }
    }

    /// Build the HTTP executor, rate limiter and broker described by `config`.
    pub fn connect(config: &ClientConfig, tokens: Arc<dyn TokenProvider>) -> Result<Self, ConfigError> {
        config.validate()?;
        let executor: Arc<dyn Executor> = Arc::new(HttpExecutor::from_config(&config.api, tokens)?);
        Ok(Self::with_executor(config, executor))
    }

    pub fn with_executor(config: &ClientConfig, executor: Arc<dyn Executor>) -> Self {
        let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
        let policy = RetryPolicy::from_config(&config.retry);
        Self::new(ApiRequestBroker::new(executor, limiter, policy, &config.dispatcher))
    }

    /// A handle whose calls run under `ctx` (cancellation, deadline, labels).
    pub fn with_context(&self, ctx: CallContext) -> Self {
        Self {
            broker: self.broker.clone(),
            ctx,
        }
    }

    pub fn broker(&self) -> &ApiRequestBroker {
        &self.broker
    }

    pub async fn shutdown(&self) {
        self.broker.shutdown().await;
    }

    async fn data<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        let envelope: ApiEnvelope<T> = self.broker.enqueue_with_context(&self.ctx, request).await?;
        Ok(envelope.data)
    }

    // Agent operations
    pub async fn get_agent(&self) -> Result<Agent> {
        self.data(ApiRequest::get("/my/agent")).await
    }

    // Ship operations
    pub async fn get_ships(&self, page: u32, limit: u32) -> Result<Vec<Ship>> {
        let request = ApiRequest::get("/my/ships")
            .with_query("page", page.max(1))
            .with_query("limit", limit.clamp(1, MAX_PAGE_LIMIT));
        self.data(request).await
    }

    pub async fn get_ship(&self, ship_symbol: &str) -> Result<Ship> {
        self.data(ApiRequest::get(format!("/my/ships/{}", ship_symbol)))
            .await
    }

    pub async fn orbit_ship(&self, ship_symbol: &str) -> Result<ShipNav> {
        let request = ApiRequest::post(format!("/my/ships/{}/orbit", ship_symbol)).with_body(json!({}));
        let data: NavData = self.data(request).await?;
        Ok(data.nav)
    }

    pub async fn dock_ship(&self, ship_symbol: &str) -> Result<ShipNav> {
        let request = ApiRequest::post(format!("/my/ships/{}/dock", ship_symbol)).with_body(json!({}));
        let data: NavData = self.data(request).await?;
        Ok(data.nav)
    }

    pub async fn navigate_ship(&self, ship_symbol: &str, waypoint_symbol: &str) -> Result<NavigationData> {
        let request = ApiRequest::post(format!("/my/ships/{}/navigate", ship_symbol))
            .with_body(json!({ "waypointSymbol": waypoint_symbol }));
        self.data(request).await
    }

    pub async fn set_flight_mode(&self, ship_symbol: &str, mode: FlightMode) -> Result<ShipNav> {
        let request = ApiRequest::patch(format!("/my/ships/{}/nav", ship_symbol))
            .with_body(json!({ "flightMode": mode.as_str() }));
        let data: NavData = self.data(request).await?;
        Ok(data.nav)
    }

    pub async fn refuel_ship(&self, ship_symbol: &str) -> Result<RefuelData> {
        let request = ApiRequest::post(format!("/my/ships/{}/refuel", ship_symbol)).with_body(json!({}));
        self.data(request).await
    }

    // Waypoint operations
    pub async fn get_system_waypoints(&self, system_symbol: &str, page: u32, limit: u32) -> Result<Vec<Waypoint>> {
        let request = ApiRequest::get(format!("/systems/{}/waypoints", system_symbol))
            .with_query("page", page.max(1))
            .with_query("limit", limit.clamp(1, MAX_PAGE_LIMIT));
        self.data(request).await
    }

    /// Every waypoint in a system, fetched page by page until a short page.
    pub async fn get_all_system_waypoints(&self, system_symbol: &str) -> Result<Vec<Waypoint>> {
        let mut waypoints = Vec::new();
        let mut page = 1;
        loop {
            let batch = self.get_system_waypoints(system_symbol, page, MAX_PAGE_LIMIT).await?;
            let short_page = batch.len() < MAX_PAGE_LIMIT as usize;
            waypoints.extend(batch);
            if short_page {
                return Ok(waypoints);
            }
            page += 1;
        }
    }
}
