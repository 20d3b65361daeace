use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use mlog_proto::{
    CrewAssignment, CrewDraft, CrewMember, CrewMission, CrewQuery, CrewSortKey, FilterField,
    Mission, MissionDraft, MissionQuery, MissionSortKey, MissionStatus, Role, SortOrder, UserInfo,
};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};
use std::collections::HashMap;
use std::path::Path;

/// The single authoritative store: missions, crew, users, action logs.
#[derive(Clone)]
pub struct MissionDb {
    pool: SqlitePool,
}

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub role: Role,
    pub two_factor_secret: Option<String>,
    pub two_factor_enabled: bool,
}

impl UserRecord {
    pub fn info(&self) -> UserInfo {
        UserInfo {
            id: self.id,
            username: self.username.clone(),
            role: self.role,
            two_factor_enabled: self.two_factor_enabled,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoredUser {
    pub id: i64,
    pub user_id: i64,
    pub username: Option<String>,
    pub role: Option<Role>,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

const MISSION_COLUMNS: &str =
    "id, name, status, mission_type, destination, launch_date, budget, crew_members";

impl MissionDb {
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create database directory {}", parent.display())
                })?;
            }
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open database {}", path.display()))?;
        Self::init(pool).await
    }

    /// Close every pooled connection; later queries fail.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Private database living as long as the pool; used by tests.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::init(pool).await
    }

    async fn init(pool: SqlitePool) -> Result<Self> {
        let statements = [
            r#"CREATE TABLE IF NOT EXISTS missions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                mission_type TEXT NOT NULL,
                destination TEXT NOT NULL,
                launch_date TEXT NOT NULL,
                budget REAL NOT NULL,
                crew_members TEXT NOT NULL DEFAULT '[]'
            )"#,
            r#"CREATE TABLE IF NOT EXISTS crew_members (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                role TEXT NOT NULL,
                nationality TEXT NOT NULL,
                age INTEGER NOT NULL,
                experience INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'active'
            )"#,
            r#"CREATE TABLE IF NOT EXISTS mission_crew (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                mission_id INTEGER NOT NULL,
                crew_member_id INTEGER NOT NULL,
                role_in_mission TEXT NOT NULL,
                UNIQUE (mission_id, crew_member_id)
            )"#,
            r#"CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT 'user',
                two_factor_secret TEXT,
                two_factor_enabled INTEGER NOT NULL DEFAULT 0
            )"#,
            r#"CREATE TABLE IF NOT EXISTS action_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                action TEXT NOT NULL,
                entity TEXT NOT NULL,
                timestamp_ms INTEGER NOT NULL
            )"#,
            "CREATE INDEX IF NOT EXISTS idx_action_logs_time ON action_logs (timestamp_ms)",
            r#"CREATE TABLE IF NOT EXISTS monitored_users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                reason TEXT NOT NULL,
                timestamp_ms INTEGER NOT NULL
            )"#,
        ];
        for statement in statements {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(MissionDb { pool })
    }

    // --- Missions ---

    pub async fn list_missions(&self, query: &MissionQuery) -> Result<Vec<Mission>> {
        let mut sql = format!("SELECT {} FROM missions", MISSION_COLUMNS);
        let term = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        if term.is_some() {
            let column = match query.filter_type.unwrap_or(FilterField::Name) {
                FilterField::Name => "name",
                FilterField::Status => "status",
                FilterField::Destination => "destination",
            };
            sql.push_str(&format!(" WHERE instr(lower({}), lower(?)) > 0", column));
        }
        let sort_column = match query.sort_by.unwrap_or(MissionSortKey::Id) {
            MissionSortKey::Id => "id",
            MissionSortKey::Name => "name",
            MissionSortKey::Status => "status",
            MissionSortKey::Type => "mission_type",
            MissionSortKey::Destination => "destination",
            MissionSortKey::LaunchDate => "launch_date",
            MissionSortKey::Budget => "budget",
        };
        let order = query.sort_order.unwrap_or(SortOrder::Asc);
        sql.push_str(&format!(" ORDER BY {} {}, id ASC", sort_column, order.as_sql()));

        let mut q = sqlx::query(&sql);
        if let Some(term) = term {
            q = q.bind(term);
        }
        let rows = q.fetch_all(&self.pool).await?;

        let mut assignments = self.all_assignments().await?;
        rows.iter()
            .map(|row| {
                let mut mission = mission_from_row(row)?;
                mission.assignments = assignments.remove(&mission.id).unwrap_or_default();
                Ok(mission)
            })
            .collect()
    }

    pub async fn get_mission(&self, id: i64) -> Result<Option<Mission>> {
        let sql = format!("SELECT {} FROM missions WHERE id = ?", MISSION_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let mut mission = mission_from_row(&row)?;
                mission.assignments = self.assignments_for(id).await?;
                Ok(Some(mission))
            }
            None => Ok(None),
        }
    }

    pub async fn insert_mission(&self, draft: &MissionDraft) -> Result<Mission> {
        let crew = serde_json::to_string(&draft.crew_members)?;
        let id = sqlx::query(
            r#"INSERT INTO missions (name, status, mission_type, destination, launch_date, budget, crew_members)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&draft.name)
        .bind(draft.status.as_str())
        .bind(draft.mission_type.as_str())
        .bind(&draft.destination)
        .bind(draft.launch_date)
        .bind(draft.budget)
        .bind(crew)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        self.get_mission(id)
            .await?
            .ok_or_else(|| anyhow!("mission {} vanished after insert", id))
    }

    /// Overwrite every writable field. `None` when the mission does not exist.
    pub async fn replace_mission(&self, id: i64, draft: &MissionDraft) -> Result<Option<Mission>> {
        let crew = serde_json::to_string(&draft.crew_members)?;
        let affected = sqlx::query(
            r#"UPDATE missions SET
                   name = ?, status = ?, mission_type = ?, destination = ?,
                   launch_date = ?, budget = ?, crew_members = ?
               WHERE id = ?"#,
        )
        .bind(&draft.name)
        .bind(draft.status.as_str())
        .bind(draft.mission_type.as_str())
        .bind(&draft.destination)
        .bind(draft.launch_date)
        .bind(draft.budget)
        .bind(crew)
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if affected == 0 {
            return Ok(None);
        }
        self.get_mission(id).await
    }

    pub async fn delete_mission(&self, id: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM mission_crew WHERE mission_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let affected = sqlx::query("DELETE FROM missions WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(affected > 0)
    }

    /// Attach a crew member to a mission, or change their role if already attached.
    pub async fn upsert_assignment(
        &self,
        mission_id: i64,
        crew_member_id: i64,
        role_in_mission: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO mission_crew (mission_id, crew_member_id, role_in_mission)
               VALUES (?, ?, ?)
               ON CONFLICT(mission_id, crew_member_id) DO UPDATE SET
                   role_in_mission = excluded.role_in_mission"#,
        )
        .bind(mission_id)
        .bind(crew_member_id)
        .bind(role_in_mission)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn remove_assignment(&self, mission_id: i64, crew_member_id: i64) -> Result<bool> {
        let affected =
            sqlx::query("DELETE FROM mission_crew WHERE mission_id = ? AND crew_member_id = ?")
                .bind(mission_id)
                .bind(crew_member_id)
                .execute(&self.pool)
                .await?
                .rows_affected();
        Ok(affected > 0)
    }

    async fn assignments_for(&self, mission_id: i64) -> Result<Vec<CrewAssignment>> {
        let rows = sqlx::query(
            "SELECT crew_member_id, role_in_mission FROM mission_crew WHERE mission_id = ? ORDER BY id",
        )
        .bind(mission_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| CrewAssignment {
                crew_member_id: row.get("crew_member_id"),
                role_in_mission: row.get("role_in_mission"),
            })
            .collect())
    }

    async fn all_assignments(&self) -> Result<HashMap<i64, Vec<CrewAssignment>>> {
        let rows = sqlx::query(
            "SELECT mission_id, crew_member_id, role_in_mission FROM mission_crew ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut by_mission: HashMap<i64, Vec<CrewAssignment>> = HashMap::new();
        for row in rows {
            by_mission
                .entry(row.get("mission_id"))
                .or_default()
                .push(CrewAssignment {
                    crew_member_id: row.get("crew_member_id"),
                    role_in_mission: row.get("role_in_mission"),
                });
        }
        Ok(by_mission)
    }

    // --- Crew ---

    /// One page of crew members plus the total number matching the filters.
    pub async fn list_crew(&self, query: &CrewQuery) -> Result<(Vec<CrewMember>, i64)> {
        let mut count: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT COUNT(*) AS total FROM crew_members WHERE 1 = 1");
        push_crew_filters(&mut count, query);
        let total: i64 = count.build().fetch_one(&self.pool).await?.get("total");

        let sort_column = match query.sort_by.unwrap_or(CrewSortKey::Name) {
            CrewSortKey::Name => "name",
            CrewSortKey::Role => "role",
            CrewSortKey::Nationality => "nationality",
            CrewSortKey::Age => "age",
            CrewSortKey::Experience => "experience",
            CrewSortKey::Status => "status",
        };
        let order = query.sort_order.unwrap_or(SortOrder::Asc);
        let limit = query.limit();
        let offset = (query.page() - 1).saturating_mul(limit);

        let mut select: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, name, role, nationality, age, experience, status FROM crew_members WHERE 1 = 1",
        );
        push_crew_filters(&mut select, query);
        select.push(format!(" ORDER BY {} {}, id ASC", sort_column, order.as_sql()));
        select.push(" LIMIT ").push_bind(limit);
        select.push(" OFFSET ").push_bind(offset);
        let rows = select.build().fetch_all(&self.pool).await?;

        let members = rows
            .iter()
            .map(crew_from_row)
            .collect::<Result<Vec<_>>>()?;
        Ok((members, total))
    }

    pub async fn get_crew(&self, id: i64) -> Result<Option<CrewMember>> {
        let row = sqlx::query(
            "SELECT id, name, role, nationality, age, experience, status FROM crew_members WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(crew_from_row).transpose()
    }

    pub async fn crew_missions(&self, crew_member_id: i64) -> Result<Vec<CrewMission>> {
        let rows = sqlx::query(
            r#"SELECT m.id AS mission_id, m.name AS name, m.status AS status,
                      m.destination AS destination, mc.role_in_mission AS role_in_mission
               FROM mission_crew mc JOIN missions m ON m.id = mc.mission_id
               WHERE mc.crew_member_id = ?
               ORDER BY m.id"#,
        )
        .bind(crew_member_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                Ok(CrewMission {
                    mission_id: row.get("mission_id"),
                    name: row.get("name"),
                    status: parse_column(&row, "status")?,
                    destination: row.get("destination"),
                    role_in_mission: row.get("role_in_mission"),
                })
            })
            .collect()
    }

    pub async fn insert_crew(&self, draft: &CrewDraft) -> Result<CrewMember> {
        let id = sqlx::query(
            r#"INSERT INTO crew_members (name, role, nationality, age, experience, status)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&draft.name)
        .bind(&draft.role)
        .bind(&draft.nationality)
        .bind(draft.age)
        .bind(draft.experience)
        .bind(draft.status.as_str())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(CrewMember {
            id,
            name: draft.name.clone(),
            role: draft.role.clone(),
            nationality: draft.nationality.clone(),
            age: draft.age,
            experience: draft.experience,
            status: draft.status,
        })
    }

    pub async fn update_crew(&self, id: i64, draft: &CrewDraft) -> Result<Option<CrewMember>> {
        let affected = sqlx::query(
            r#"UPDATE crew_members SET
                   name = ?, role = ?, nationality = ?, age = ?, experience = ?, status = ?
               WHERE id = ?"#,
        )
        .bind(&draft.name)
        .bind(&draft.role)
        .bind(&draft.nationality)
        .bind(draft.age)
        .bind(draft.experience)
        .bind(draft.status.as_str())
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if affected == 0 {
            return Ok(None);
        }
        self.get_crew(id).await
    }

    pub async fn delete_crew(&self, id: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM mission_crew WHERE crew_member_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let affected = sqlx::query("DELETE FROM crew_members WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(affected > 0)
    }

    // --- Users ---

    /// `None` when the username is already taken.
    pub async fn insert_user(
        &self,
        username: &str,
        password_hash: &str,
        role: Role,
    ) -> Result<Option<UserRecord>> {
        let result = sqlx::query(
            "INSERT INTO users (username, password_hash, role) VALUES (?, ?, ?) ON CONFLICT(username) DO NOTHING",
        )
        .bind(username)
        .bind(password_hash)
        .bind(role.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.find_user(result.last_insert_rowid()).await
    }

    pub async fn find_user(&self, id: i64) -> Result<Option<UserRecord>> {
        let row = sqlx::query(
            "SELECT id, username, password_hash, role, two_factor_secret, two_factor_enabled FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    pub async fn find_user_by_name(&self, username: &str) -> Result<Option<UserRecord>> {
        let row = sqlx::query(
            "SELECT id, username, password_hash, role, two_factor_secret, two_factor_enabled FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    pub async fn set_two_factor(&self, id: i64, secret: Option<&str>, enabled: bool) -> Result<()> {
        sqlx::query("UPDATE users SET two_factor_secret = ?, two_factor_enabled = ? WHERE id = ?")
            .bind(secret)
            .bind(enabled)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // --- Activity ---

    pub async fn log_action(&self, user_id: i64, action: &str, entity: &str) -> Result<()> {
        self.log_action_at(user_id, action, entity, Utc::now()).await
    }

    pub async fn log_action_at(
        &self,
        user_id: i64,
        action: &str,
        entity: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO action_logs (user_id, action, entity, timestamp_ms) VALUES (?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(action)
        .bind(entity)
        .bind(at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// (user id, number of actions) for every user active since `since`.
    pub async fn action_counts_since(&self, since: DateTime<Utc>) -> Result<Vec<(i64, i64)>> {
        let rows = sqlx::query(
            r#"SELECT user_id, COUNT(*) AS actions FROM action_logs
               WHERE timestamp_ms >= ? GROUP BY user_id ORDER BY user_id"#,
        )
        .bind(since.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get("user_id"), row.get("actions")))
            .collect())
    }

    pub async fn add_monitored(&self, user_id: i64, reason: &str) -> Result<MonitoredUser> {
        let now = Utc::now();
        let id = sqlx::query(
            "INSERT INTO monitored_users (user_id, reason, timestamp_ms) VALUES (?, ?, ?)",
        )
        .bind(user_id)
        .bind(reason)
        .bind(now.timestamp_millis())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        let user = self.find_user(user_id).await?;
        Ok(MonitoredUser {
            id,
            user_id,
            username: user.as_ref().map(|u| u.username.clone()),
            role: user.map(|u| u.role),
            reason: reason.to_string(),
            timestamp: millis_to_datetime(now.timestamp_millis()),
        })
    }

    /// Newest first.
    pub async fn list_monitored(&self) -> Result<Vec<MonitoredUser>> {
        let rows = sqlx::query(
            r#"SELECT mu.id AS id, mu.user_id AS user_id, mu.reason AS reason,
                      mu.timestamp_ms AS timestamp_ms, u.username AS username, u.role AS role
               FROM monitored_users mu LEFT JOIN users u ON u.id = mu.user_id
               ORDER BY mu.timestamp_ms DESC, mu.id DESC"#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                let role: Option<String> = row.get("role");
                Ok(MonitoredUser {
                    id: row.get("id"),
                    user_id: row.get("user_id"),
                    username: row.get("username"),
                    role: role.map(|r| r.parse()).transpose()?,
                    reason: row.get("reason"),
                    timestamp: millis_to_datetime(row.get("timestamp_ms")),
                })
            })
            .collect()
    }

    // --- Statistics ---

    /// (nationality, mission status, distinct missions) over all crew assignments.
    pub async fn nationality_status_counts(&self) -> Result<Vec<(String, MissionStatus, i64)>> {
        let rows = sqlx::query(
            r#"SELECT c.nationality AS nationality, m.status AS status,
                      COUNT(DISTINCT m.id) AS mission_count
               FROM missions m
               JOIN mission_crew mc ON mc.mission_id = m.id
               JOIN crew_members c ON c.id = mc.crew_member_id
               GROUP BY c.nationality, m.status"#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                Ok((
                    row.get("nationality"),
                    parse_column(&row, "status")?,
                    row.get("mission_count"),
                ))
            })
            .collect()
    }

    /// (destination, budget, assigned crew size) for every mission.
    pub async fn mission_budget_rows(&self) -> Result<Vec<(String, f64, i64)>> {
        let rows = sqlx::query(
            r#"SELECT m.destination AS destination, m.budget AS budget, COUNT(mc.id) AS crew_size
               FROM missions m LEFT JOIN mission_crew mc ON mc.mission_id = m.id
               GROUP BY m.id"#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get("destination"), row.get("budget"), row.get("crew_size")))
            .collect())
    }
}

fn push_crew_filters<'a>(qb: &mut QueryBuilder<'a, Sqlite>, query: &'a CrewQuery) {
    if let Some(role) = query.role.as_deref() {
        qb.push(" AND role = ").push_bind(role);
    }
    if let Some(status) = query.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(nationality) = query.nationality.as_deref() {
        qb.push(" AND nationality = ").push_bind(nationality);
    }
}

fn parse_column<T>(row: &SqliteRow, column: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(column);
    raw.parse::<T>()
        .with_context(|| format!("corrupt value in column {}", column))
}

fn mission_from_row(row: &SqliteRow) -> Result<Mission> {
    let crew: String = row.get("crew_members");
    Ok(Mission {
        id: row.get("id"),
        name: row.get("name"),
        status: parse_column(row, "status")?,
        mission_type: parse_column(row, "mission_type")?,
        destination: row.get("destination"),
        launch_date: row.get::<NaiveDate, _>("launch_date"),
        budget: row.get("budget"),
        crew_members: serde_json::from_str(&crew).context("corrupt crew_members column")?,
        assignments: Vec::new(),
    })
}

fn crew_from_row(row: &SqliteRow) -> Result<CrewMember> {
    Ok(CrewMember {
        id: row.get("id"),
        name: row.get("name"),
        role: row.get("role"),
        nationality: row.get("nationality"),
        age: row.get("age"),
        experience: row.get("experience"),
        status: parse_column(row, "status")?,
    })
}

fn user_from_row(row: &SqliteRow) -> Result<UserRecord> {
    Ok(UserRecord {
        id: row.get("id"),
        username: row.get("username"),
        password_hash: row.get("password_hash"),
        role: parse_column(row, "role")?,
        two_factor_secret: row.get("two_factor_secret"),
        two_factor_enabled: row.get("two_factor_enabled"),
    })
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlog_proto::{CrewStatus, MissionType};

    fn draft(name: &str, destination: &str, budget: f64) -> MissionDraft {
        MissionDraft {
            name: name.to_string(),
            status: MissionStatus::Ongoing,
            mission_type: MissionType::Exploration,
            destination: destination.to_string(),
            launch_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            budget,
            crew_members: vec!["Alice".to_string()],
        }
    }

    #[tokio::test]
    async fn mission_roundtrip_and_delete() {
        let db = MissionDb::in_memory().await.unwrap();
        let created = db.insert_mission(&draft("Apollo 11", "Moon", 10.0)).await.unwrap();
        assert_eq!(created.id, 1);
        assert_eq!(created.crew_members, vec!["Alice".to_string()]);

        let mut changed = draft("Apollo 12", "Moon", 20.0);
        changed.status = MissionStatus::Completed;
        let replaced = db.replace_mission(1, &changed).await.unwrap().unwrap();
        assert_eq!(replaced.name, "Apollo 12");
        assert_eq!(replaced.status, MissionStatus::Completed);

        assert!(db.replace_mission(99, &changed).await.unwrap().is_none());
        assert!(db.delete_mission(1).await.unwrap());
        assert!(!db.delete_mission(1).await.unwrap());
        assert!(db.get_mission(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn assignments_upsert_and_cascade() {
        let db = MissionDb::in_memory().await.unwrap();
        let mission = db.insert_mission(&draft("Artemis", "Moon", 1.0)).await.unwrap();
        let crew = db
            .insert_crew(&CrewDraft {
                name: "Sally Ride".to_string(),
                role: "Pilot".to_string(),
                nationality: "USA".to_string(),
                age: 40,
                experience: 12,
                status: CrewStatus::Active,
            })
            .await
            .unwrap();

        db.upsert_assignment(mission.id, crew.id, "Pilot").await.unwrap();
        db.upsert_assignment(mission.id, crew.id, "Commander").await.unwrap();
        let loaded = db.get_mission(mission.id).await.unwrap().unwrap();
        assert_eq!(loaded.assignments.len(), 1);
        assert_eq!(loaded.assignments[0].role_in_mission, "Commander");

        let missions = db.crew_missions(crew.id).await.unwrap();
        assert_eq!(missions.len(), 1);
        assert_eq!(missions[0].mission_id, mission.id);

        assert!(db.delete_crew(crew.id).await.unwrap());
        let loaded = db.get_mission(mission.id).await.unwrap().unwrap();
        assert!(loaded.assignments.is_empty());
    }

    #[tokio::test]
    async fn duplicate_username_is_rejected() {
        let db = MissionDb::in_memory().await.unwrap();
        assert!(db.insert_user("neil", "hash", Role::User).await.unwrap().is_some());
        assert!(db.insert_user("neil", "hash", Role::Admin).await.unwrap().is_none());
    }
}
