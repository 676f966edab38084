use serde::Deserialize;

/// `{ "data": ..., "meta": ... }` wrapper every endpoint responds with.
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope<T> {
    pub data: T,
    pub meta: Option<PageMeta>,
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct PageMeta {
    pub total: u32,
    pub page: u32,
    pub limit: u32,
}

#[derive(Debug, Deserialize)]
pub struct NavData {
    pub nav: crate::models::ShipNav,
}
