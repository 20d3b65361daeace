//! Field-level validation of mission and crew payloads.
//!
//! Payloads are accepted as loosely typed JSON so that every offending field
//! can be reported at once instead of failing on the first type mismatch.
//! A field sent as `null` is present and gets validated; only a missing key
//! counts as absent.

use crate::error::FieldErrors;
use chrono::{DateTime, NaiveDate};
use lazy_static::lazy_static;
use mlog_proto::{
    CrewDraft, CrewStatus, MissionDraft, MissionPatch, MissionStatus, MissionType,
};
use regex::Regex;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

lazy_static! {
    static ref MISSION_NAME: Regex = Regex::new(r"^[A-Za-z0-9_\s\-,.!?]+$").unwrap();
    static ref CREW_NAME: Regex = Regex::new(r"^[a-zA-Z\s\-']+$").unwrap();
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionPayload {
    #[serde(default, deserialize_with = "present")]
    pub name: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    pub status: Option<Value>,
    #[serde(default, rename = "type", deserialize_with = "present")]
    pub mission_type: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    pub destination: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    pub launch_date: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    pub budget: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    pub crew_members: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CrewPayload {
    #[serde(default, deserialize_with = "present")]
    pub name: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    pub role: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    pub nationality: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    pub age: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    pub experience: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    pub status: Option<Value>,
}

/// Keeps an explicit `null` as `Some(Value::Null)`.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

type Check<T> = Result<T, String>;

/// Validate a create or full-update body.
pub fn validate_mission(payload: &MissionPayload) -> Result<MissionDraft, FieldErrors> {
    let mut errors = FieldErrors::new();
    let name = record(&mut errors, "name", mission_name(payload.name.as_ref()));
    let status = record(&mut errors, "status", mission_status(payload.status.as_ref()));
    let mission_type = record(&mut errors, "type", mission_type(payload.mission_type.as_ref()));
    let destination = record(
        &mut errors,
        "destination",
        required_text(payload.destination.as_ref(), "Destination is required"),
    );
    let launch_date = record(&mut errors, "launchDate", launch_date(payload.launch_date.as_ref()));
    let budget = record(&mut errors, "budget", budget(payload.budget.as_ref()));
    let crew_members = match payload.crew_members.as_ref() {
        Some(v) => record(&mut errors, "crewMembers", crew_names(v)),
        None => Some(Vec::new()),
    };

    match (name, status, mission_type, destination, launch_date, budget, crew_members) {
        (
            Some(name),
            Some(status),
            Some(mission_type),
            Some(destination),
            Some(launch_date),
            Some(budget),
            Some(crew_members),
        ) if errors.is_empty() => Ok(MissionDraft {
            name,
            status,
            mission_type,
            destination,
            launch_date,
            budget,
            crew_members,
        }),
        _ => Err(errors),
    }
}

/// Validate a partial update body: only the fields present are checked.
pub fn validate_mission_patch(payload: &MissionPayload) -> Result<MissionPatch, FieldErrors> {
    let mut errors = FieldErrors::new();
    let patch = MissionPatch {
        name: payload
            .name
            .as_ref()
            .and_then(|v| record(&mut errors, "name", mission_name(Some(v)))),
        status: payload
            .status
            .as_ref()
            .and_then(|v| record(&mut errors, "status", mission_status(Some(v)))),
        mission_type: payload
            .mission_type
            .as_ref()
            .and_then(|v| record(&mut errors, "type", mission_type(Some(v)))),
        destination: payload.destination.as_ref().and_then(|v| {
            record(
                &mut errors,
                "destination",
                required_text(Some(v), "Destination is required"),
            )
        }),
        launch_date: payload
            .launch_date
            .as_ref()
            .and_then(|v| record(&mut errors, "launchDate", launch_date(Some(v)))),
        budget: payload
            .budget
            .as_ref()
            .and_then(|v| record(&mut errors, "budget", budget(Some(v)))),
        crew_members: payload
            .crew_members
            .as_ref()
            .and_then(|v| record(&mut errors, "crewMembers", crew_names(v))),
    };
    if errors.is_empty() {
        Ok(patch)
    } else {
        Err(errors)
    }
}

pub fn validate_crew(payload: &CrewPayload) -> Result<CrewDraft, FieldErrors> {
    let mut errors = FieldErrors::new();
    let name = record(
        &mut errors,
        "name",
        required_text(payload.name.as_ref(), "Name is required"),
    );
    let role = record(
        &mut errors,
        "role",
        required_text(payload.role.as_ref(), "Role is required"),
    );
    let nationality = record(
        &mut errors,
        "nationality",
        required_text(payload.nationality.as_ref(), "Nationality is required"),
    );
    let age = record(
        &mut errors,
        "age",
        integer_at_least(payload.age.as_ref(), 18, "Age must be at least 18"),
    );
    let experience = record(
        &mut errors,
        "experience",
        integer_at_least(
            payload.experience.as_ref(),
            0,
            "Experience must be a non-negative number",
        ),
    );
    let status = match payload.status.as_ref() {
        None => Some(CrewStatus::default()),
        Some(v) => record(
            &mut errors,
            "status",
            v.as_str()
                .and_then(|s| s.parse::<CrewStatus>().ok())
                .ok_or_else(|| "Invalid status".to_string()),
        ),
    };

    match (name, role, nationality, age, experience, status) {
        (Some(name), Some(role), Some(nationality), Some(age), Some(experience), Some(status))
            if errors.is_empty() =>
        {
            Ok(CrewDraft {
                name,
                role,
                nationality,
                age,
                experience,
                status,
            })
        }
        _ => Err(errors),
    }
}

fn record<T>(errors: &mut FieldErrors, field: &str, check: Check<T>) -> Option<T> {
    match check {
        Ok(value) => Some(value),
        Err(message) => {
            errors.insert(field.to_string(), message);
            None
        }
    }
}

fn required_text(value: Option<&Value>, message: &str) -> Check<String> {
    match value {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        _ => Err(message.to_string()),
    }
}

fn mission_name(value: Option<&Value>) -> Check<String> {
    let name = match value {
        Some(Value::String(s)) if s.trim().chars().count() >= 3 => s.trim(),
        _ => return Err("Mission Name must be at least 3 characters long".to_string()),
    };
    if !MISSION_NAME.is_match(name) {
        return Err("Mission Name contains invalid characters".to_string());
    }
    Ok(name.to_string())
}

fn mission_status(value: Option<&Value>) -> Check<MissionStatus> {
    let raw = required_text(value, "Status is required")?;
    raw.parse().map_err(|_| {
        format!(
            "Status must be one of {}",
            join_variants(MissionStatus::ALL.iter().map(|s| s.as_str()))
        )
    })
}

fn mission_type(value: Option<&Value>) -> Check<MissionType> {
    let raw = required_text(value, "Mission Type is required")?;
    raw.parse().map_err(|_| {
        format!(
            "Mission Type must be one of {}",
            join_variants(MissionType::ALL.iter().map(|t| t.as_str()))
        )
    })
}

fn join_variants<'a>(names: impl Iterator<Item = &'a str>) -> String {
    names.collect::<Vec<_>>().join(", ")
}

/// Accepts `YYYY-MM-DD` or a full RFC 3339 timestamp.
fn launch_date(value: Option<&Value>) -> Check<NaiveDate> {
    let raw = required_text(value, "Launch Date is required")?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(&raw).ok().map(|dt| dt.date_naive()))
        .ok_or_else(|| "Launch Date must be a valid date".to_string())
}

/// Numbers and numeric strings are both accepted.
fn budget(value: Option<&Value>) -> Check<f64> {
    let amount = match value {
        None | Some(Value::Null) => return Err("Budget is required".to_string()),
        Some(Value::String(s)) if s.trim().is_empty() => {
            return Err("Budget is required".to_string())
        }
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
    };
    match amount {
        Some(a) if !a.is_finite() => Err("Budget must be a valid number".to_string()),
        Some(a) if a < 0.0 => Err("Budget must be a positive number".to_string()),
        Some(a) => Ok(a),
        None => Err("Budget must be a valid number".to_string()),
    }
}

fn crew_names(value: &Value) -> Check<Vec<String>> {
    let items = match value {
        Value::Array(items) => items,
        _ => return Err("Crew Members must be an array".to_string()),
    };
    items
        .iter()
        .map(|item| {
            let name = match item {
                Value::String(s) if s.trim().chars().count() >= 2 => s.trim(),
                _ => {
                    return Err(
                        "Each crew member name must be at least 2 characters long".to_string()
                    )
                }
            };
            if !CREW_NAME.is_match(name) {
                return Err(
                    "Crew member names can only contain letters, spaces, hyphens, and apostrophes"
                        .to_string(),
                );
            }
            Ok(name.to_string())
        })
        .collect()
}

fn integer_at_least(value: Option<&Value>, min: i64, message: &str) -> Check<i64> {
    let n = match value {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    match n {
        Some(n) if n >= min => Ok(n),
        _ => Err(message.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> MissionPayload {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn short_name_and_negative_budget_are_reported_together() {
        let errors = validate_mission(&payload(json!({"name": "Ab", "budget": -1}))).unwrap_err();
        assert_eq!(
            errors.get("name").map(String::as_str),
            Some("Mission Name must be at least 3 characters long")
        );
        assert_eq!(
            errors.get("budget").map(String::as_str),
            Some("Budget must be a positive number")
        );
        assert!(errors.contains_key("status"));
        assert!(errors.contains_key("launchDate"));
    }

    #[test]
    fn valid_mission_is_normalized() {
        let draft = validate_mission(&payload(json!({
            "name": "  Mars 2020 ",
            "status": "Ongoing",
            "type": "Exploration",
            "destination": "Mars",
            "launchDate": "2020-07-30T12:00:00Z",
            "budget": "2700000000",
            "crewMembers": ["Buzz Aldrin", "O'Neil"]
        })))
        .unwrap();
        assert_eq!(draft.name, "Mars 2020");
        assert_eq!(draft.launch_date, NaiveDate::from_ymd_opt(2020, 7, 30).unwrap());
        assert_eq!(draft.budget, 2_700_000_000.0);
        assert_eq!(draft.crew_members.len(), 2);
    }

    #[test]
    fn invalid_characters_and_crew_names() {
        let errors = validate_mission(&payload(json!({
            "name": "Drop <table>",
            "status": "Paused",
            "type": "Exploration",
            "destination": "Moon",
            "launchDate": "not a date",
            "budget": "lots",
            "crewMembers": ["R2-D2"]
        })))
        .unwrap_err();
        assert_eq!(errors["name"], "Mission Name contains invalid characters");
        assert_eq!(errors["status"], "Status must be one of Ongoing, Completed, Failed");
        assert_eq!(errors["launchDate"], "Launch Date must be a valid date");
        assert_eq!(errors["budget"], "Budget must be a valid number");
        assert_eq!(
            errors["crewMembers"],
            "Crew member names can only contain letters, spaces, hyphens, and apostrophes"
        );
    }

    #[test]
    fn patch_only_checks_present_fields() {
        let patch = validate_mission_patch(&payload(json!({"budget": 5}))).unwrap();
        assert_eq!(patch.budget, Some(5.0));
        assert!(patch.name.is_none());

        let errors = validate_mission_patch(&payload(json!({"crewMembers": "Alice"}))).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors["crewMembers"], "Crew Members must be an array");
    }

    #[test]
    fn explicit_null_is_validated_not_ignored() {
        let errors = validate_mission_patch(&payload(json!({
            "name": null,
            "budget": null,
            "crewMembers": null
        })))
        .unwrap_err();
        assert_eq!(errors["name"], "Mission Name must be at least 3 characters long");
        assert_eq!(errors["budget"], "Budget is required");
        assert_eq!(errors["crewMembers"], "Crew Members must be an array");

        let patch = validate_mission_patch(&payload(json!({}))).unwrap();
        assert!(patch.is_empty());
    }

    #[test]
    fn crew_rules() {
        let crew: CrewPayload = serde_json::from_value(json!({
            "name": "Yuri Gagarin", "role": "Pilot", "nationality": "Soviet",
            "age": 27, "experience": 0
        }))
        .unwrap();
        let draft = validate_crew(&crew).unwrap();
        assert_eq!(draft.status, CrewStatus::Active);

        let crew: CrewPayload = serde_json::from_value(json!({
            "name": "", "role": "Pilot", "nationality": "Soviet",
            "age": 17, "experience": -1, "status": "missing"
        }))
        .unwrap();
        let errors = validate_crew(&crew).unwrap_err();
        assert_eq!(errors["name"], "Name is required");
        assert_eq!(errors["age"], "Age must be at least 18");
        assert_eq!(errors["experience"], "Experience must be a non-negative number");
        assert_eq!(errors["status"], "Invalid status");
    }
}
