use axum::{
    Json, Router,
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    routing::{get, put},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    modules::{parse_date_like, parse_user_id},
    web::{ApiError, ApiMessage, AppState},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/entries",
            get(list_entries).post(create_entry).delete(delete_entry),
        )
        .route("/api/entries/:id", put(update_entry))
}

/// One journal record. Owned by exactly one user; mutated only through the
/// partial-update endpoint, with no cascading effect on recaps.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct EntryRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub date: NaiveDate,
    pub emoji: String,
    pub summary: String,
    pub transcript: Option<String>,
    pub bookmarked: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserScopeQuery {
    user_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateEntryRequest {
    user_id: Option<String>,
    name: String,
    date: String,
    emoji: String,
    summary: String,
    transcript: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateEntryRequest {
    user_id: Option<String>,
    updated_name: Option<String>,
    updated_date: Option<String>,
    updated_emoji: Option<String>,
    updated_summary: Option<String>,
    updated_transcript: Option<String>,
    updated_bookmarked: Option<bool>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteEntryQuery {
    user_id: Option<String>,
    entry_id: Option<String>,
}

#[derive(Serialize)]
struct EntriesResponse {
    entries: Vec<EntryRecord>,
}

#[derive(Debug, PartialEq)]
struct NewEntry {
    name: String,
    date: NaiveDate,
    emoji: String,
    summary: String,
    transcript: Option<String>,
}

fn validate_new_entry(payload: CreateEntryRequest) -> Result<(Uuid, NewEntry), ApiError> {
    let user_id = parse_user_id(payload.user_id.as_deref())?;

    let name = payload.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::validation("name is required"));
    }

    let emoji = payload.emoji.trim().to_string();
    if emoji.is_empty() {
        return Err(ApiError::validation("emoji is required"));
    }

    let date = parse_date_like(&payload.date)
        .ok_or_else(|| ApiError::validation("date must be YYYY-MM-DD or an ISO timestamp"))?;

    Ok((
        user_id,
        NewEntry {
            name,
            date,
            emoji,
            summary: payload.summary,
            transcript: payload.transcript,
        },
    ))
}

async fn list_entries(
    State(state): State<AppState>,
    Query(query): Query<UserScopeQuery>,
) -> Result<Json<EntriesResponse>, ApiError> {
    let user_id = parse_user_id(query.user_id.as_deref())?;
    let entries = fetch_entries(state.pool_ref(), user_id).await?;
    Ok(Json(EntriesResponse { entries }))
}

async fn create_entry(
    State(state): State<AppState>,
    Json(payload): Json<CreateEntryRequest>,
) -> Result<(StatusCode, Json<EntryRecord>), ApiError> {
    let (user_id, new_entry) = validate_new_entry(payload)?;
    let entry = insert_entry(state.pool_ref(), user_id, new_entry).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn update_entry(
    State(state): State<AppState>,
    AxumPath(entry_id): AxumPath<Uuid>,
    Json(payload): Json<UpdateEntryRequest>,
) -> Result<Json<EntryRecord>, ApiError> {
    let user_id = parse_user_id(payload.user_id.as_deref())?;

    let updated_date = match payload.updated_date.as_deref() {
        Some(raw) => Some(parse_date_like(raw).ok_or_else(|| {
            ApiError::validation("updatedDate must be YYYY-MM-DD or an ISO timestamp")
        })?),
        None => None,
    };

    let entry = sqlx::query_as::<_, EntryRecord>(
        "UPDATE journal_entries SET
            name = COALESCE($3, name),
            date = COALESCE($4, date),
            emoji = COALESCE($5, emoji),
            summary = COALESCE($6, summary),
            transcript = COALESCE($7, transcript),
            bookmarked = COALESCE($8, bookmarked)
         WHERE id = $1 AND user_id = $2
         RETURNING id, user_id, name, date, emoji, summary, transcript, bookmarked",
    )
    .bind(entry_id)
    .bind(user_id)
    .bind(payload.updated_name)
    .bind(updated_date)
    .bind(payload.updated_emoji)
    .bind(payload.updated_summary)
    .bind(payload.updated_transcript)
    .bind(payload.updated_bookmarked)
    .fetch_optional(state.pool_ref())
    .await?
    .ok_or_else(|| ApiError::NotFound("entry not found".to_string()))?;

    Ok(Json(entry))
}

async fn delete_entry(
    State(state): State<AppState>,
    Query(query): Query<DeleteEntryQuery>,
) -> Result<Json<ApiMessage>, ApiError> {
    let user_id = parse_user_id(query.user_id.as_deref())?;
    let entry_id = query
        .entry_id
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::validation("entryId is required"))?;
    let entry_id = Uuid::parse_str(entry_id)
        .map_err(|_| ApiError::validation("entryId must be a valid UUID"))?;

    let result = sqlx::query("DELETE FROM journal_entries WHERE id = $1 AND user_id = $2")
        .bind(entry_id)
        .bind(user_id)
        .execute(state.pool_ref())
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("entry not found".to_string()));
    }

    Ok(Json(ApiMessage::new("entry deleted")))
}

pub async fn fetch_entries(pool: &PgPool, user_id: Uuid) -> sqlx::Result<Vec<EntryRecord>> {
    sqlx::query_as::<_, EntryRecord>(
        "SELECT id, user_id, name, date, emoji, summary, transcript, bookmarked
         FROM journal_entries WHERE user_id = $1 ORDER BY date DESC, created_at DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
}

async fn insert_entry(pool: &PgPool, user_id: Uuid, entry: NewEntry) -> sqlx::Result<EntryRecord> {
    sqlx::query_as::<_, EntryRecord>(
        "INSERT INTO journal_entries (id, user_id, name, date, emoji, summary, transcript)
         VALUES ($1, $2, $3, $4, $5, $6, $7)
         RETURNING id, user_id, name, date, emoji, summary, transcript, bookmarked",
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(entry.name)
    .bind(entry.date)
    .bind(entry.emoji)
    .bind(entry.summary)
    .bind(entry.transcript)
    .fetch_one(pool)
    .await
}
