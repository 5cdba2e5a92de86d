use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use rinkside_service::caching::CacheStatus;
use rinkside_service::services::ResourceService;
use serde::Serialize;
use serde_json::Value;

use super::error::ResponseError;

/// The body of a successful `GET /api/{resource}`.
#[derive(Debug, Serialize)]
pub struct Envelope {
    pub data: Value,
    pub source: CacheStatus,
    pub timestamp: DateTime<Utc>,
}

pub async fn get_resource(
    State(service): State<ResourceService>,
    Path(name): Path<String>,
) -> Result<Json<Envelope>, ResponseError> {
    let resource = service
        .resource(&name)
        .ok_or((StatusCode::NOT_FOUND, "unknown resource"))?;

    let fetched = service
        .fetch(&name)
        .await
        .ok_or((StatusCode::NOT_FOUND, "unknown resource"))?;

    if fetched.status == CacheStatus::Fallback && resource.is_empty(&fetched.value) {
        return Err(anyhow::anyhow!("no data available for {name}").into());
    }

    Ok(Json(Envelope {
        data: fetched.value,
        source: fetched.status,
        timestamp: fetched.stored_at.unwrap_or_else(Utc::now),
    }))
}

#[derive(Debug, Serialize)]
pub struct ResourceInfo {
    name: String,
    key: String,
    ttl: String,
    refresh_every: Option<String>,
}

pub async fn list_resources(State(service): State<ResourceService>) -> Json<Vec<ResourceInfo>> {
    let resources = service
        .resources()
        .map(|resource| ResourceInfo {
            name: resource.name.clone(),
            key: resource.key.to_string(),
            ttl: humantime::format_duration(resource.policy.ttl).to_string(),
            refresh_every: resource
                .refresh_every
                .map(|every| humantime::format_duration(every).to_string()),
        })
        .collect();

    Json(resources)
}
