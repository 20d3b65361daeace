//! Wire types shared by `mlog-server` and `mlog-syncd`.
//!
//! Everything here serializes to the camelCase JSON the REST API speaks.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when a string does not name a variant of one of the enums below.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

// --- Missions ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MissionStatus {
    Ongoing,
    Completed,
    Failed,
}

string_enum!(MissionStatus, "mission status", {
    Ongoing => "Ongoing",
    Completed => "Completed",
    Failed => "Failed",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MissionType {
    Exploration,
    Deployment,
    Resupply,
}

string_enum!(MissionType, "mission type", {
    Exploration => "Exploration",
    Deployment => "Deployment",
    Resupply => "Resupply",
});

/// A crew member attached to a mission together with the role they fill on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrewAssignment {
    pub crew_member_id: i64,
    pub role_in_mission: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mission {
    pub id: i64,
    pub name: String,
    pub status: MissionStatus,
    #[serde(rename = "type")]
    pub mission_type: MissionType,
    pub destination: String,
    pub launch_date: NaiveDate,
    pub budget: f64,
    #[serde(default)]
    pub crew_members: Vec<String>,
    #[serde(default)]
    pub assignments: Vec<CrewAssignment>,
}

/// Every writable field of a mission. Body of create and full update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionDraft {
    pub name: String,
    pub status: MissionStatus,
    #[serde(rename = "type")]
    pub mission_type: MissionType,
    pub destination: String,
    pub launch_date: NaiveDate,
    pub budget: f64,
    #[serde(default)]
    pub crew_members: Vec<String>,
}

/// Partial update body; absent fields keep their stored value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MissionStatus>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub mission_type: Option<MissionType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crew_members: Option<Vec<String>>,
}

impl MissionPatch {
    pub fn is_empty(&self) -> bool {
        *self == MissionPatch::default()
    }

    /// Apply the patch on top of an existing mission's writable fields.
    pub fn apply_to(&self, mission: &Mission) -> MissionDraft {
        MissionDraft {
            name: self.name.clone().unwrap_or_else(|| mission.name.clone()),
            status: self.status.unwrap_or(mission.status),
            mission_type: self.mission_type.unwrap_or(mission.mission_type),
            destination: self
                .destination
                .clone()
                .unwrap_or_else(|| mission.destination.clone()),
            launch_date: self.launch_date.unwrap_or(mission.launch_date),
            budget: self.budget.unwrap_or(mission.budget),
            crew_members: self
                .crew_members
                .clone()
                .unwrap_or_else(|| mission.crew_members.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterField {
    Name,
    Status,
    Destination,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MissionSortKey {
    Id,
    Name,
    Status,
    Type,
    Destination,
    LaunchDate,
    Budget,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    #[serde(alias = "ASC")]
    Asc,
    #[serde(alias = "DESC")]
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

string_enum!(FilterField, "filter field", {
    Name => "name",
    Status => "status",
    Destination => "destination",
});

string_enum!(MissionSortKey, "mission sort key", {
    Id => "id",
    Name => "name",
    Status => "status",
    Type => "type",
    Destination => "destination",
    LaunchDate => "launchDate",
    Budget => "budget",
});

string_enum!(SortOrder, "sort order", {
    Asc => "asc",
    Desc => "desc",
});

/// Query string of `GET /api/missions`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_type: Option<FilterField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<MissionSortKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<SortOrder>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionList {
    pub missions: Vec<Mission>,
}

// --- Crew ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrewStatus {
    #[default]
    Active,
    Retired,
    Deceased,
}

string_enum!(CrewStatus, "crew status", {
    Active => "active",
    Retired => "retired",
    Deceased => "deceased",
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrewMember {
    pub id: i64,
    pub name: String,
    pub role: String,
    pub nationality: String,
    pub age: i64,
    pub experience: i64,
    pub status: CrewStatus,
}

/// Validated crew member fields, used for create and update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrewDraft {
    pub name: String,
    pub role: String,
    pub nationality: String,
    pub age: i64,
    pub experience: i64,
    pub status: CrewStatus,
}

/// A mission seen from one of its crew members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrewMission {
    pub mission_id: i64,
    pub name: String,
    pub status: MissionStatus,
    pub destination: String,
    pub role_in_mission: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrewMemberDetail {
    #[serde(flatten)]
    pub member: CrewMember,
    pub missions: Vec<CrewMission>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CrewSortKey {
    Name,
    Role,
    Nationality,
    Age,
    Experience,
    Status,
}

/// Query string of `GET /api/crew`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrewQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<CrewStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nationality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<CrewSortKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<SortOrder>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
}

impl CrewQuery {
    pub const DEFAULT_LIMIT: i64 = 10;

    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT).clamp(1, 100)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrewPage {
    pub crew_members: Vec<CrewMemberDetail>,
    pub total: i64,
    pub page: i64,
    pub total_pages: i64,
}

// --- Users ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

string_enum!(Role, "role", {
    User => "user",
    Admin => "admin",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    /// TOTP code; required once two-factor authentication is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub id: i64,
    pub username: String,
    pub role: Role,
    #[serde(default)]
    pub two_factor_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserInfo,
}

// --- Offline queue ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMethod {
    Post,
    Put,
    Patch,
    Delete,
}

impl WriteMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteMethod::Post => "POST",
            WriteMethod::Put => "PUT",
            WriteMethod::Patch => "PATCH",
            WriteMethod::Delete => "DELETE",
        }
    }
}

/// A mission write that could not reach the server and waits in the local queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PendingOperation {
    CreateMission { draft: MissionDraft },
    UpdateMission { id: i64, draft: MissionDraft },
    PatchMission { id: i64, patch: MissionPatch },
    DeleteMission { id: i64 },
}

impl PendingOperation {
    pub fn method(&self) -> WriteMethod {
        match self {
            PendingOperation::CreateMission { .. } => WriteMethod::Post,
            PendingOperation::UpdateMission { .. } => WriteMethod::Put,
            PendingOperation::PatchMission { .. } => WriteMethod::Patch,
            PendingOperation::DeleteMission { .. } => WriteMethod::Delete,
        }
    }

    /// Path relative to the API base URL.
    pub fn endpoint(&self) -> String {
        match self {
            PendingOperation::CreateMission { .. } => "/api/missions".to_string(),
            PendingOperation::UpdateMission { id, .. }
            | PendingOperation::PatchMission { id, .. }
            | PendingOperation::DeleteMission { id } => format!("/api/missions/{}", id),
        }
    }

    pub fn body(&self) -> Result<Option<serde_json::Value>, serde_json::Error> {
        match self {
            PendingOperation::CreateMission { draft }
            | PendingOperation::UpdateMission { draft, .. } => {
                serde_json::to_value(draft).map(Some)
            }
            PendingOperation::PatchMission { patch, .. } => serde_json::to_value(patch).map(Some),
            PendingOperation::DeleteMission { .. } => Ok(None),
        }
    }
}

impl fmt::Display for PendingOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method().as_str(), self.endpoint())
    }
}

// --- Real-time channel ---

/// Messages pushed to every client connected to `/api/events`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    MissionUpdate { new_mission: Mission },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}
