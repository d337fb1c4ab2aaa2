use std::collections::BTreeMap;

use anyhow::{Context, Result, anyhow};
use axum::{
    Json, Router,
    extract::{Query, State},
    routing::{get, post},
};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::{
    config::{MONTH_PLACEHOLDER, RecapSettings},
    llm::{ChatMessage, LlmRequest, MessageRole},
    modules::{entries, parse_date_like, parse_user_id},
    web::{ApiError, ApiMessage, AppState},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/recaps", get(list_recaps).delete(delete_recap))
        .route("/api/recaps/generate", post(generate_recap))
}

/// A calendar month at year+month granularity. Entries qualify for a recap
/// by exact (year, month) equality on their date, never by timezone-shifted
/// timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetMonth {
    first_day: NaiveDate,
}

impl TargetMonth {
    /// Accepts `YYYY-MM` or any date-like string, truncated to its month.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();

        if let Some(date) = parse_date_like(trimmed) {
            return NaiveDate::from_ymd_opt(date.year(), date.month(), 1)
                .map(|first_day| Self { first_day });
        }

        let (year, month) = trimmed.split_once('-')?;
        let year: i32 = year.parse().ok()?;
        let month: u32 = month.parse().ok()?;
        NaiveDate::from_ymd_opt(year, month, 1).map(|first_day| Self { first_day })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date.year() == self.first_day.year() && date.month() == self.first_day.month()
    }

    pub fn first_day(&self) -> NaiveDate {
        self.first_day
    }

    pub fn label(&self) -> String {
        self.first_day.format("%Y-%m").to_string()
    }
}

/// The slice of an entry that reaches the completion request.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct PromptEntry {
    name: String,
    date: NaiveDate,
    emoji: String,
    summary: String,
}

impl From<entries::EntryRecord> for PromptEntry {
    fn from(entry: entries::EntryRecord) -> Self {
        Self {
            name: entry.name,
            date: entry.date,
            emoji: entry.emoji,
            summary: entry.summary,
        }
    }
}

/// Caller-supplied candidate entry for generation; dates are validated up
/// front so nothing unparseable reaches the prompt.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CandidateEntry {
    name: String,
    date: String,
    emoji: String,
    summary: String,
}

impl CandidateEntry {
    fn into_prompt_entry(self) -> Result<PromptEntry, ApiError> {
        let date = parse_date_like(&self.date).ok_or_else(|| {
            ApiError::validation("monthEntries dates must be YYYY-MM-DD or ISO timestamps")
        })?;
        Ok(PromptEntry {
            name: self.name,
            date,
            emoji: self.emoji,
            summary: self.summary,
        })
    }
}

fn entries_in_month(entries: Vec<PromptEntry>, target: &TargetMonth) -> Vec<PromptEntry> {
    entries
        .into_iter()
        .filter(|entry| target.contains(entry.date))
        .collect()
}

fn build_generation_request(
    settings: &RecapSettings,
    target: &TargetMonth,
    entries: &[PromptEntry],
) -> Result<LlmRequest> {
    let instructions = settings
        .prompts
        .instructions
        .replace(MONTH_PLACEHOLDER, &target.label());
    let entries_json =
        serde_json::to_string_pretty(entries).context("failed to serialize entries for prompt")?;

    Ok(LlmRequest::new(
        settings.model.clone(),
        vec![
            ChatMessage::new(MessageRole::System, instructions),
            ChatMessage::new(
                MessageRole::User,
                format!("Journal entries:\n\n{entries_json}"),
            ),
        ],
    ))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Highlight {
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FavoriteDay {
    pub date: NaiveDate,
    pub description: String,
}

/// Canonical recap document shape expected back from the model. `highs`
/// and `lows` are the only optional members; every other field is required
/// and never defaulted.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecapDocument {
    recap_name: String,
    month: String,
    #[serde(default)]
    highs: Vec<Highlight>,
    #[serde(default)]
    lows: Vec<Highlight>,
    mood_summary: BTreeMap<String, u32>,
    summary: String,
    favorite_day: FavoriteDayDocument,
    total_entries: u32,
}

#[derive(Debug, Deserialize)]
struct FavoriteDayDocument {
    date: String,
    description: String,
}

/// Validated recap payload, ready to persist once the owning user and the
/// resolved target month are attached.
#[derive(Debug, PartialEq)]
pub struct ParsedRecap {
    pub recap_name: String,
    pub highs: Vec<Highlight>,
    pub lows: Vec<Highlight>,
    pub mood_summary: BTreeMap<String, u32>,
    pub summary: String,
    pub favorite_day: FavoriteDay,
    pub total_entries: u32,
}

fn malformed(reason: impl Into<String>, raw: &str) -> ApiError {
    ApiError::MalformedRecap {
        reason: reason.into(),
        raw: raw.to_string(),
    }
}

/// Decode raw completion text into a recap payload. The model is instructed
/// to return nothing but the JSON object; when it disobeys, one salvage pass
/// over the outermost brace window is tried before giving up.
pub fn parse_recap(raw: &str) -> Result<ParsedRecap, ApiError> {
    let trimmed = raw.trim();

    let document = match serde_json::from_str::<RecapDocument>(trimmed) {
        Ok(document) => document,
        Err(strict_err) => {
            let salvaged = match (trimmed.find('{'), trimmed.rfind('}')) {
                (Some(start), Some(end)) if end > start => {
                    serde_json::from_str::<RecapDocument>(&trimmed[start..=end]).ok()
                }
                _ => None,
            };
            salvaged.ok_or_else(|| malformed(strict_err.to_string(), raw))?
        }
    };

    // The echoed month is display-only, but it still has to look like a date.
    if TargetMonth::parse(&document.month).is_none() {
        return Err(malformed("month is not a valid date", raw));
    }

    let favorite_date = parse_date_like(&document.favorite_day.date)
        .ok_or_else(|| malformed("favoriteDay.date is not a valid date", raw))?;

    Ok(ParsedRecap {
        recap_name: document.recap_name,
        highs: document.highs,
        lows: document.lows,
        mood_summary: document.mood_summary,
        summary: document.summary,
        favorite_day: FavoriteDay {
            date: favorite_date,
            description: document.favorite_day.description,
        },
        total_entries: document.total_entries,
    })
}

/// One persisted monthly summary. At most one exists per (user, month),
/// enforced by a uniqueness constraint rather than by policy.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recap {
    pub id: Uuid,
    pub user_id: Uuid,
    pub recap_name: String,
    pub month: NaiveDate,
    pub mood_summary: BTreeMap<String, u32>,
    pub summary: String,
    pub favorite_day: FavoriteDay,
    pub highs: Vec<Highlight>,
    pub lows: Vec<Highlight>,
    pub total_entries: i32,
}

#[derive(sqlx::FromRow)]
struct RecapRow {
    id: Uuid,
    user_id: Uuid,
    recap_name: String,
    month: NaiveDate,
    mood_summary: Value,
    summary: String,
    favorite_day_date: NaiveDate,
    favorite_day_description: String,
    highs: Value,
    lows: Value,
    total_entries: i32,
}

impl RecapRow {
    fn into_recap(self) -> Result<Recap> {
        let mood_summary: BTreeMap<String, u32> = serde_json::from_value(self.mood_summary)
            .context("stored mood summary is not an emoji count map")?;
        let highs: Vec<Highlight> =
            serde_json::from_value(self.highs).context("stored highs are malformed")?;
        let lows: Vec<Highlight> =
            serde_json::from_value(self.lows).context("stored lows are malformed")?;

        Ok(Recap {
            id: self.id,
            user_id: self.user_id,
            recap_name: self.recap_name,
            month: self.month,
            mood_summary,
            summary: self.summary,
            favorite_day: FavoriteDay {
                date: self.favorite_day_date,
                description: self.favorite_day_description,
            },
            highs,
            lows,
            total_entries: self.total_entries,
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRecapRequest {
    user_id: Option<String>,
    target_month: Option<String>,
    month_entries: Option<Vec<CandidateEntry>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserScopeQuery {
    user_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteRecapQuery {
    user_id: Option<String>,
    recap_id: Option<String>,
}

#[derive(Serialize)]
struct RecapsResponse {
    recaps: Vec<Recap>,
}

#[derive(Serialize)]
struct GenerateRecapResponse {
    recap: Recap,
}

/// Produce exactly one persisted recap for (user, target month), superseding
/// any prior one for that month via an atomic upsert. Entries outside the
/// target month never reach the completion request; a parse or upstream
/// failure persists nothing and leaves any existing recap untouched.
async fn generate_recap(
    State(state): State<AppState>,
    Json(payload): Json<GenerateRecapRequest>,
) -> Result<Json<GenerateRecapResponse>, ApiError> {
    let user_id = parse_user_id(payload.user_id.as_deref())?;
    let target = payload
        .target_month
        .as_deref()
        .ok_or_else(|| ApiError::validation("targetMonth is required"))
        .and_then(|raw| {
            TargetMonth::parse(raw)
                .ok_or_else(|| ApiError::validation("targetMonth must be YYYY-MM or an ISO date"))
        })?;

    let candidates: Vec<PromptEntry> = match payload.month_entries {
        Some(entries) => entries
            .into_iter()
            .map(CandidateEntry::into_prompt_entry)
            .collect::<Result<_, _>>()?,
        None => entries::fetch_entries(state.pool_ref(), user_id)
            .await?
            .into_iter()
            .map(PromptEntry::from)
            .collect(),
    };
    let qualifying = entries_in_month(candidates, &target);

    let request = build_generation_request(state.recap_settings(), &target, &qualifying)
        .map_err(ApiError::Store)?;

    let response = state
        .llm_client()
        .execute(request)
        .await
        .map_err(ApiError::Upstream)?;

    let parsed = parse_recap(&response.text)?;

    let recap = upsert_recap(state.pool_ref(), user_id, &target, &parsed)
        .await?
        .into_recap()
        .map_err(ApiError::Store)?;

    info!(
        %user_id,
        month = %target.label(),
        entries = qualifying.len(),
        tokens = response.token_usage.total_tokens,
        "generated month recap"
    );

    Ok(Json(GenerateRecapResponse { recap }))
}

async fn list_recaps(
    State(state): State<AppState>,
    Query(query): Query<UserScopeQuery>,
) -> Result<Json<RecapsResponse>, ApiError> {
    let user_id = parse_user_id(query.user_id.as_deref())?;

    let rows = fetch_recaps(state.pool_ref(), user_id).await?;
    let recaps = rows
        .into_iter()
        .map(RecapRow::into_recap)
        .collect::<Result<Vec<_>>>()
        .map_err(ApiError::Store)?;

    Ok(Json(RecapsResponse { recaps }))
}

/// Deleting an id that is already gone reports success; the end state is
/// identical either way.
async fn delete_recap(
    State(state): State<AppState>,
    Query(query): Query<DeleteRecapQuery>,
) -> Result<Json<ApiMessage>, ApiError> {
    let user_id = parse_user_id(query.user_id.as_deref())?;
    let recap_id = query
        .recap_id
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::validation("recapId is required"))?;
    let recap_id = Uuid::parse_str(recap_id)
        .map_err(|_| ApiError::validation("recapId must be a valid UUID"))?;

    sqlx::query("DELETE FROM month_recaps WHERE id = $1 AND user_id = $2")
        .bind(recap_id)
        .bind(user_id)
        .execute(state.pool_ref())
        .await?;

    Ok(Json(ApiMessage::new("recap deleted")))
}

async fn fetch_recaps(pool: &PgPool, user_id: Uuid) -> sqlx::Result<Vec<RecapRow>> {
    sqlx::query_as::<_, RecapRow>(
        "SELECT id, user_id, recap_name, month, mood_summary, summary,
                favorite_day_date, favorite_day_description, highs, lows, total_entries
         FROM month_recaps WHERE user_id = $1 ORDER BY month DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
}

async fn upsert_recap(
    pool: &PgPool,
    user_id: Uuid,
    target: &TargetMonth,
    parsed: &ParsedRecap,
) -> Result<RecapRow, ApiError> {
    let mood_summary =
        serde_json::to_value(&parsed.mood_summary).map_err(|err| ApiError::Store(anyhow!(err)))?;
    let highs =
        serde_json::to_value(&parsed.highs).map_err(|err| ApiError::Store(anyhow!(err)))?;
    let lows = serde_json::to_value(&parsed.lows).map_err(|err| ApiError::Store(anyhow!(err)))?;

    let row = sqlx::query_as::<_, RecapRow>(
        "INSERT INTO month_recaps
            (id, user_id, recap_name, month, mood_summary, summary,
             favorite_day_date, favorite_day_description, highs, lows, total_entries)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
         ON CONFLICT (user_id, month) DO UPDATE SET
            recap_name = EXCLUDED.recap_name,
            mood_summary = EXCLUDED.mood_summary,
            summary = EXCLUDED.summary,
            favorite_day_date = EXCLUDED.favorite_day_date,
            favorite_day_description = EXCLUDED.favorite_day_description,
            highs = EXCLUDED.highs,
            lows = EXCLUDED.lows,
            total_entries = EXCLUDED.total_entries,
            created_at = NOW()
         RETURNING id, user_id, recap_name, month, mood_summary, summary,
                   favorite_day_date, favorite_day_description, highs, lows, total_entries",
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(&parsed.recap_name)
    .bind(target.first_day())
    .bind(mood_summary)
    .bind(&parsed.summary)
    .bind(parsed.favorite_day.date)
    .bind(&parsed.favorite_day.description)
    .bind(highs)
    .bind(lows)
    .bind(parsed.total_entries as i32)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt_entry(name: &str, date: &str, emoji: &str, summary: &str) -> PromptEntry {
        PromptEntry {
            name: name.to_string(),
            date: parse_date_like(date).unwrap(),
            emoji: emoji.to_string(),
            summary: summary.to_string(),
        }
    }

    fn january() -> TargetMonth {
        TargetMonth::parse("2024-01").unwrap()
    }

    const STUB_RESPONSE: &str = r#"{"recapName":"January Recap","month":"2024-01-01T00:00:00Z","moodSummary":{"😊":1,"😔":1},"summary":"Mixed month.","favoriteDay":{"date":"2024-01-01T00:00:00Z","description":"Great day"},"totalEntries":2}"#;

    #[test]
    fn target_month_parses_year_month_and_full_dates() {
        let target = january();
        assert_eq!(target.label(), "2024-01");
        assert_eq!(
            TargetMonth::parse("2024-01-15").unwrap().first_day(),
            target.first_day()
        );
        assert_eq!(
            TargetMonth::parse("2024-01-31T12:00:00Z").unwrap(),
            target
        );
    }

    #[test]
    fn target_month_rejects_invalid_input() {
        assert!(TargetMonth::parse("2024-13").is_none());
        assert!(TargetMonth::parse("2024").is_none());
        assert!(TargetMonth::parse("january").is_none());
    }

    #[test]
    fn filters_entries_outside_the_target_month() {
        let entries = vec![
            prompt_entry("Great day", "2024-01-15", "😊", "Great day"),
            prompt_entry("February", "2024-02-01", "😊", "Out of scope"),
            prompt_entry("Last year", "2023-01-20", "😔", "Wrong year"),
        ];

        let kept = entries_in_month(entries, &january());
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name, "Great day");
    }

    #[test]
    fn empty_month_yields_empty_prompt_list() {
        let entries = vec![prompt_entry("February", "2024-02-01", "😊", "Out")];
        assert!(entries_in_month(entries, &january()).is_empty());
    }

    #[test]
    fn generation_request_embeds_month_and_entries() {
        let settings = RecapSettings {
            model: "gpt-4o".to_string(),
            prompts: crate::config::RecapPrompts {
                instructions: format!("Recap for {MONTH_PLACEHOLDER}. JSON only."),
            },
        };
        let entries = vec![prompt_entry("Great day", "2024-01-15", "😊", "Great day")];

        let request = build_generation_request(&settings, &january(), &entries).unwrap();
        assert_eq!(request.model, "gpt-4o");
        assert_eq!(request.messages.len(), 2);
        assert!(request.messages[0].text.contains("Recap for 2024-01"));
        assert!(request.messages[1].text.contains("\"emoji\": \"😊\""));
        assert!(request.messages[1].text.contains("2024-01-15"));
    }

    #[test]
    fn parses_well_formed_recap() {
        let parsed = parse_recap(STUB_RESPONSE).unwrap();
        assert_eq!(parsed.recap_name, "January Recap");
        assert_eq!(parsed.total_entries, 2);
        assert_eq!(parsed.mood_summary.get("😊"), Some(&1));
        assert_eq!(parsed.mood_summary.get("😔"), Some(&1));
        assert_eq!(
            parsed.favorite_day.date,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
        );
        assert!(parsed.highs.is_empty());
        assert!(parsed.lows.is_empty());
    }

    #[test]
    fn parses_optional_highs_and_lows_when_present() {
        let raw = r#"{"recapName":"R","month":"2024-11-01","highs":[{"title":"Walk","description":"Peaceful"}],"lows":[{"title":"Deadline","description":"Stressful"}],"moodSummary":{"😊":5},"summary":"S","favoriteDay":{"date":"2024-11-05","description":"Outing"},"totalEntries":7}"#;
        let parsed = parse_recap(raw).unwrap();
        assert_eq!(parsed.highs[0].title, "Walk");
        assert_eq!(parsed.lows[0].description, "Stressful");
    }

    #[test]
    fn salvages_json_wrapped_in_prose() {
        let raw = format!("Here is your recap:\n```json\n{STUB_RESPONSE}\n```\nEnjoy!");
        let parsed = parse_recap(&raw).unwrap();
        assert_eq!(parsed.total_entries, 2);
    }

    #[test]
    fn missing_total_entries_is_malformed_not_zero() {
        let raw = r#"{"recapName":"R","month":"2024-01-01","moodSummary":{"😊":1},"summary":"S","favoriteDay":{"date":"2024-01-01","description":"D"}}"#;
        assert!(matches!(
            parse_recap(raw),
            Err(ApiError::MalformedRecap { .. })
        ));
    }

    #[test]
    fn negative_counts_are_malformed() {
        let raw = r#"{"recapName":"R","month":"2024-01-01","moodSummary":{"😊":-1},"summary":"S","favoriteDay":{"date":"2024-01-01","description":"D"},"totalEntries":2}"#;
        assert!(matches!(
            parse_recap(raw),
            Err(ApiError::MalformedRecap { .. })
        ));

        let raw = r#"{"recapName":"R","month":"2024-01-01","moodSummary":{"😊":1},"summary":"S","favoriteDay":{"date":"2024-01-01","description":"D"},"totalEntries":-2}"#;
        assert!(matches!(
            parse_recap(raw),
            Err(ApiError::MalformedRecap { .. })
        ));
    }

    #[test]
    fn unparseable_dates_are_malformed() {
        let raw = r#"{"recapName":"R","month":"soon","moodSummary":{"😊":1},"summary":"S","favoriteDay":{"date":"2024-01-01","description":"D"},"totalEntries":1}"#;
        assert!(matches!(
            parse_recap(raw),
            Err(ApiError::MalformedRecap { .. })
        ));

        let raw = r#"{"recapName":"R","month":"2024-01-01","moodSummary":{"😊":1},"summary":"S","favoriteDay":{"date":"someday","description":"D"},"totalEntries":1}"#;
        assert!(matches!(
            parse_recap(raw),
            Err(ApiError::MalformedRecap { .. })
        ));
    }

    #[test]
    fn malformed_error_carries_raw_text() {
        let raw = "I could not produce a recap, sorry.";
        match parse_recap(raw) {
            Err(ApiError::MalformedRecap { raw: carried, .. }) => assert_eq!(carried, raw),
            other => panic!("expected malformed recap error, got {other:?}"),
        }
    }

    // Full generation chain minus the network and store hops: two January
    // entries and one February entry, target 2024-01, stubbed completion
    // output.
    #[test]
    fn january_scenario_filters_then_parses() {
        let target = january();
        let entries = vec![
            prompt_entry("Great day", "2024-01-10", "😊", "Great day"),
            prompt_entry("Hard day", "2024-01-20", "😔", "Hard day"),
            prompt_entry("February", "2024-02-01", "😊", "Not this month"),
        ];

        let qualifying = entries_in_month(entries, &target);
        assert_eq!(qualifying.len(), 2);
        assert!(qualifying.iter().all(|entry| target.contains(entry.date)));

        let parsed = parse_recap(STUB_RESPONSE).unwrap();
        assert_eq!(parsed.total_entries as usize, qualifying.len());
        // The persisted month comes from the resolved target, not the model.
        assert_eq!(target.first_day(), NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
    }

    #[test]
    fn recap_row_round_trips_jsonb_columns() {
        let row = RecapRow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            recap_name: "January Recap".to_string(),
            month: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            mood_summary: serde_json::json!({"😊": 1, "😔": 1}),
            summary: "Mixed month.".to_string(),
            favorite_day_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            favorite_day_description: "Great day".to_string(),
            highs: serde_json::json!([{"title": "Walk", "description": "Peaceful"}]),
            lows: serde_json::json!([]),
            total_entries: 2,
        };

        let recap = row.into_recap().unwrap();
        assert_eq!(recap.mood_summary.get("😊"), Some(&1));
        assert_eq!(recap.highs.len(), 1);
        assert!(recap.lows.is_empty());
    }

    #[test]
    fn corrupt_stored_mood_summary_is_rejected() {
        let row = RecapRow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            recap_name: "R".to_string(),
            month: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            mood_summary: serde_json::json!("not a map"),
            summary: "S".to_string(),
            favorite_day_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            favorite_day_description: "D".to_string(),
            highs: serde_json::json!([]),
            lows: serde_json::json!([]),
            total_entries: 0,
        };

        assert!(row.into_recap().is_err());
    }
}
