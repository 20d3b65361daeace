use crate::config::MonitorSettings;
use crate::db::{MissionDb, MonitoredUser};
use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Flags users whose write rate exceeds the configured threshold.
pub struct ActivityMonitor {
    db: MissionDb,
    settings: MonitorSettings,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ActivityMonitor {
    pub fn new(db: MissionDb, settings: MonitorSettings) -> Self {
        Self {
            db,
            settings,
            task: Mutex::new(None),
        }
    }

    /// Spawn the polling loop. Returns false if it is already running.
    pub async fn start(&self) -> bool {
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return false;
        }
        let db = self.db.clone();
        let settings = self.settings.clone();
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(settings.poll_secs.max(1)));
            loop {
                ticker.tick().await;
                match scan_once(&db, &settings).await {
                    Ok(flagged) if !flagged.is_empty() => {
                        tracing::warn!(count = flagged.len(), "flagged users for high activity");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = ?e, "activity scan failed"),
                }
            }
        }));
        tracing::info!(
            threshold = self.settings.threshold,
            window_secs = self.settings.window_secs,
            "activity monitor started"
        );
        true
    }

    pub async fn stop(&self) {
        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
        }
    }
}

/// One pass over the action log: every user above the threshold inside the
/// window gets a monitored entry.
pub async fn scan_once(db: &MissionDb, settings: &MonitorSettings) -> Result<Vec<MonitoredUser>> {
    let now = Utc::now();
    let since = now - ChronoDuration::seconds(settings.window_secs as i64);
    let mut flagged = Vec::new();
    for (user_id, actions) in db.action_counts_since(since).await? {
        if actions <= settings.threshold {
            continue;
        }
        let reason = format!(
            "High activity: {} actions in {}s at {}",
            actions,
            settings.window_secs,
            now.to_rfc3339()
        );
        tracing::info!(user_id, actions, "user exceeded activity threshold");
        flagged.push(db.add_monitored(user_id, &reason).await?);
    }
    Ok(flagged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlog_proto::Role;

    #[tokio::test]
    async fn flags_only_users_above_threshold() {
        let db = MissionDb::in_memory().await.unwrap();
        let busy = db.insert_user("busy", "x", Role::User).await.unwrap().unwrap();
        let calm = db.insert_user("calm", "x", Role::User).await.unwrap().unwrap();
        let settings = MonitorSettings {
            threshold: 3,
            window_secs: 60,
            poll_secs: 60,
        };

        for _ in 0..4 {
            db.log_action(busy.id, "create", "mission").await.unwrap();
        }
        for _ in 0..3 {
            db.log_action(calm.id, "update", "mission").await.unwrap();
        }
        // outside the window
        let old = Utc::now() - ChronoDuration::minutes(10);
        for _ in 0..5 {
            db.log_action_at(calm.id, "delete", "mission", old).await.unwrap();
        }

        let flagged = scan_once(&db, &settings).await.unwrap();
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].user_id, busy.id);
        assert!(flagged[0].reason.starts_with("High activity: 4 actions"));

        let listed = db.list_monitored().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].username.as_deref(), Some("busy"));
    }
}
