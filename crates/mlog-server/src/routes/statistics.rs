use crate::error::AppResult;
use crate::AppState;
use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use mlog_proto::MissionStatus;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Success rate (percent) at or above which a nationality counts as doing well.
const GOOD_SUCCESS_RATE: f64 = 25.0;

#[derive(Debug, Serialize)]
pub struct NationalitySuccess {
    pub nationality: String,
    pub total_missions: i64,
    pub completed_missions: i64,
    pub success_rate: f64,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct NationalitySummary {
    pub total_nationalities: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct NationalityReport {
    pub summary: NationalitySummary,
    pub data: Vec<NationalitySuccess>,
}

#[derive(Debug, Serialize)]
pub struct BudgetGroup {
    pub destination: String,
    pub crew_size: i64,
    pub average_budget: f64,
    pub mission_count: i64,
}

#[derive(Debug, Serialize)]
pub struct BudgetReport {
    pub data: Vec<BudgetGroup>,
}

/// Per-nationality success rates, best first.
pub fn nationality_success(rows: &[(String, MissionStatus, i64)]) -> Vec<NationalitySuccess> {
    let mut totals: BTreeMap<&str, (i64, i64)> = BTreeMap::new();
    for (nationality, status, count) in rows {
        let entry = totals.entry(nationality.as_str()).or_default();
        entry.0 += count;
        if *status == MissionStatus::Completed {
            entry.1 += count;
        }
    }

    let mut data: Vec<NationalitySuccess> = totals
        .into_iter()
        .map(|(nationality, (total, completed))| {
            let rate = if total > 0 {
                completed as f64 * 100.0 / total as f64
            } else {
                0.0
            };
            let success_rate = (rate * 100.0).round() / 100.0;
            NationalitySuccess {
                nationality: nationality.to_string(),
                total_missions: total,
                completed_missions: completed,
                success_rate,
                status: if success_rate >= GOOD_SUCCESS_RATE {
                    "Good"
                } else {
                    "Needs Improvement"
                },
            }
        })
        .collect();
    data.sort_by(|a, b| b.success_rate.total_cmp(&a.success_rate));
    data
}

/// Average budget grouped by destination and crew size.
pub fn budget_groups(rows: &[(String, f64, i64)]) -> Vec<BudgetGroup> {
    let mut groups: BTreeMap<(&str, i64), (f64, i64)> = BTreeMap::new();
    for (destination, budget, crew_size) in rows {
        let entry = groups.entry((destination.as_str(), *crew_size)).or_default();
        entry.0 += budget;
        entry.1 += 1;
    }
    groups
        .into_iter()
        .map(|((destination, crew_size), (sum, count))| BudgetGroup {
            destination: destination.to_string(),
            crew_size,
            average_budget: ((sum / count as f64) * 100.0).round() / 100.0,
            mission_count: count,
        })
        .collect()
}

pub async fn mission_success_by_nationality(
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<NationalityReport>> {
    let rows = state.db.nationality_status_counts().await?;
    let data = nationality_success(&rows);
    Ok(Json(NationalityReport {
        summary: NationalitySummary {
            total_nationalities: data.len(),
            timestamp: Utc::now(),
        },
        data,
    }))
}

pub async fn mission_budget_stats(
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<BudgetReport>> {
    let rows = state.db.mission_budget_rows().await?;
    Ok(Json(BudgetReport {
        data: budget_groups(&rows),
    }))
}
