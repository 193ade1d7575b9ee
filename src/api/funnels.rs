//! Funnel analysis API handler.

use crate::api::errors::ApiError;
use crate::api::stats::{resolve_range, validate_site_id};
use crate::query::filters::QueryFilter;
use crate::query::funnel::{self, FunnelDefinition, FunnelReport};
use crate::server::AppState;
use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;

/// Body of `POST /api/stats/funnel`.
///
/// Without `period` or both dates the funnel runs over all stored events.
#[derive(Debug, Deserialize)]
pub struct FunnelRequest {
    pub site_id: String,
    #[serde(flatten)]
    pub funnel: FunnelDefinition,
    pub period: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    #[serde(default)]
    pub filters: Vec<QueryFilter>,
    /// Overrides the configured window.
    pub window_secs: Option<u64>,
}

/// POST /api/stats/funnel: Visitors reaching each step, with drop-offs.
pub async fn post_funnel(
    State(state): State<Arc<AppState>>,
    Json(request): Json<FunnelRequest>,
) -> Result<Json<FunnelReport>, ApiError> {
    validate_site_id(&request.site_id)?;
    if request.funnel.steps.len() > 16 {
        return Err(ApiError::BadRequest(
            "A funnel may have at most 16 steps".to_string(),
        ));
    }

    let range = match (&request.period, &request.start_date, &request.end_date) {
        (None, None, None) => None,
        (period, start, end) => Some(resolve_range(
            period.as_deref().unwrap_or("30d"),
            start.as_deref(),
            end.as_deref(),
        )?),
    };
    let window_secs = request
        .window_secs
        .unwrap_or(state.config.funnel_window_secs);

    let FunnelRequest {
        site_id,
        funnel: definition,
        filters,
        ..
    } = request;
    let report = state
        .store
        .run(move |conn| {
            let counts =
                funnel::query_funnel(conn, &site_id, &definition, range, &filters, window_secs)?;
            tracing::debug!(site_id = %site_id, steps = counts.len(), "Funnel computed");
            Ok(FunnelReport::from_counts(&definition, &counts))
        })
        .await?;
    Ok(Json(report))
}
