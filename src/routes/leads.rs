//! Lead timeline, manual interaction and summary routes.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::routes::employee::Employee;
use crate::services::interaction::Interaction;
use crate::services::lead::{Contact, Lead, LeadRef};
use crate::services::notes::{self, NewNote, NotePatch};
use crate::services::summary::{self, CaseSummary};
use crate::services::timeline::TimelinePage;
use crate::state::AppState;

#[derive(Serialize)]
pub struct LeadResponse {
    pub lead: Lead,
    pub contacts: Vec<Contact>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub offset: Option<usize>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub refresh: Option<bool>,
}

/// Page length: the requested limit, else the configured page size, never
/// more than the per-source batch.
pub(crate) fn page_limit(requested: Option<usize>, page_size: usize, batch_size: i64) -> usize {
    let cap = usize::try_from(batch_size).unwrap_or(usize::MAX).max(1);
    requested.unwrap_or(page_size).clamp(1, cap)
}

pub(crate) fn parse_lead(raw: &str) -> Result<LeadRef, ApiError> {
    Ok(LeadRef::parse(raw)?)
}

/// `GET /api/leads/{lead_id}` — lead record and its contacts.
pub async fn get_lead(
    State(state): State<AppState>,
    Path(lead_id): Path<String>,
) -> Result<Json<LeadResponse>, ApiError> {
    let lead_ref = parse_lead(&lead_id)?;
    let lead = state.timeline_source.lead(lead_ref).await?;
    let contacts = state.timeline_source.contacts(lead_ref).await?;
    Ok(Json(LeadResponse { lead, contacts }))
}

/// `GET /api/leads/{lead_id}/interactions?offset=&limit=&refresh=`
pub async fn list_interactions(
    State(state): State<AppState>,
    Path(lead_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<TimelinePage>, ApiError> {
    let lead_ref = parse_lead(&lead_id)?;
    let timeline = state
        .timeline_cache
        .get_or_build(
            state.timeline_source.as_ref(),
            lead_ref,
            state.timeline.batch_size,
            query.refresh.unwrap_or(false),
        )
        .await?;
    let limit = page_limit(query.limit, state.timeline.page_size, state.timeline.batch_size);
    Ok(Json(timeline.page(query.offset.unwrap_or(0), limit)))
}

/// `POST /api/leads/{lead_id}/interactions` — record a manual interaction.
pub async fn add_interaction(
    State(state): State<AppState>,
    employee: Employee,
    Path(lead_id): Path<String>,
    Json(body): Json<NewNote>,
) -> Result<(StatusCode, Json<Interaction>), ApiError> {
    let lead_ref = parse_lead(&lead_id)?;
    let created = notes::add_note(&state, lead_ref, &body, employee.as_str()).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// `PATCH /api/leads/{lead_id}/interactions/{interaction_id}`
pub async fn edit_interaction(
    State(state): State<AppState>,
    employee: Employee,
    Path((lead_id, interaction_id)): Path<(String, String)>,
    Json(body): Json<NotePatch>,
) -> Result<Json<Interaction>, ApiError> {
    let lead_ref = parse_lead(&lead_id)?;
    let updated = notes::edit_note(&state, lead_ref, &interaction_id, &body, employee.as_str()).await?;
    Ok(Json(updated))
}

/// `POST /api/leads/{lead_id}/summary` — AI case summary.
pub async fn summarize(
    State(state): State<AppState>,
    employee: Employee,
    Path(lead_id): Path<String>,
) -> Result<Json<CaseSummary>, ApiError> {
    let lead_ref = parse_lead(&lead_id)?;
    Ok(Json(summary::summarize(&state, lead_ref, employee.as_str()).await?))
}

#[cfg(test)]
#[path = "leads_test.rs"]
mod tests;
