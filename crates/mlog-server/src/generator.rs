use crate::db::MissionDb;
use crate::wordlist;
use crate::ws::broadcast_event;
use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use mlog_proto::{Mission, MissionDraft, MissionStatus, MissionType, ServerEvent};
use rand::seq::SliceRandom;
use rand::Rng;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStatus {
    Started,
    AlreadyRunning,
    Stopped,
    NotRunning,
}

impl GenerationStatus {
    pub fn message(&self) -> &'static str {
        match self {
            GenerationStatus::Started => "Started generation",
            GenerationStatus::AlreadyRunning => "Already running",
            GenerationStatus::Stopped => "Stopped generation",
            GenerationStatus::NotRunning => "Not running",
        }
    }
}

/// Periodically inserts a random mission and announces it to event subscribers.
pub struct MissionGenerator {
    db: MissionDb,
    events: broadcast::Sender<String>,
    interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MissionGenerator {
    pub fn new(db: MissionDb, events: broadcast::Sender<String>, interval: Duration) -> Self {
        Self {
            db,
            events,
            interval,
            task: Mutex::new(None),
        }
    }

    pub async fn start(&self) -> GenerationStatus {
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return GenerationStatus::AlreadyRunning;
        }

        let db = self.db.clone();
        let events = self.events.clone();
        let period = self.interval;
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = generate_once(&db, &events).await {
                    tracing::error!(error = ?e, "mission generation failed");
                }
            }
        }));
        tracing::info!(interval = ?period, "mission generation started");
        GenerationStatus::Started
    }

    pub async fn stop(&self) -> GenerationStatus {
        match self.task.lock().await.take() {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                tracing::info!("mission generation stopped");
                GenerationStatus::Stopped
            }
            _ => GenerationStatus::NotRunning,
        }
    }

    pub async fn is_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

/// Persist one random mission and broadcast it.
pub async fn generate_once(db: &MissionDb, events: &broadcast::Sender<String>) -> Result<Mission> {
    let draft = random_draft();
    let mission = db.insert_mission(&draft).await?;
    tracing::debug!(id = mission.id, name = %mission.name, "generated mission");
    broadcast_event(
        events,
        &ServerEvent::MissionUpdate {
            new_mission: mission.clone(),
        },
    );
    Ok(mission)
}

pub fn random_draft() -> MissionDraft {
    let mut rng = rand::thread_rng();
    let name = wordlist::WORDS
        .choose_multiple(&mut rng, 2)
        .map(|word| capitalize(word))
        .collect::<Vec<_>>()
        .join(" ");
    let crew_size = rng.gen_range(1..=3);
    let crew_members = wordlist::CREW_NAMES
        .choose_multiple(&mut rng, crew_size)
        .map(|name| name.to_string())
        .collect();

    MissionDraft {
        name,
        status: *MissionStatus::ALL.choose(&mut rng).unwrap_or(&MissionStatus::Ongoing),
        mission_type: *MissionType::ALL
            .choose(&mut rng)
            .unwrap_or(&MissionType::Exploration),
        destination: wordlist::DESTINATIONS
            .choose(&mut rng)
            .unwrap_or(&"Mars")
            .to_string(),
        launch_date: (Utc::now() + ChronoDuration::days(rng.gen_range(1..=365))).date_naive(),
        budget: rng.gen_range(100_000..10_000_000) as f64,
        crew_members,
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_draft_is_plausible() {
        for _ in 0..20 {
            let draft = random_draft();
            assert_eq!(draft.name.split(' ').count(), 2);
            assert!((1..=3).contains(&draft.crew_members.len()));
            assert!(draft.budget >= 100_000.0 && draft.budget < 10_000_000.0);
            assert!(draft.launch_date > Utc::now().date_naive());
            assert!(wordlist::DESTINATIONS.contains(&draft.destination.as_str()));
        }
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let db = MissionDb::in_memory().await.unwrap();
        let (tx, _) = broadcast::channel(8);
        let generator = MissionGenerator::new(db, tx, Duration::from_secs(60));

        assert_eq!(generator.stop().await, GenerationStatus::NotRunning);
        assert_eq!(generator.start().await, GenerationStatus::Started);
        assert_eq!(generator.start().await, GenerationStatus::AlreadyRunning);
        assert!(generator.is_running().await);
        assert_eq!(generator.stop().await, GenerationStatus::Stopped);
        assert_eq!(generator.stop().await, GenerationStatus::NotRunning);
    }

    #[tokio::test]
    async fn generated_mission_is_stored_and_broadcast() {
        let db = MissionDb::in_memory().await.unwrap();
        let (tx, mut rx) = broadcast::channel(8);

        let mission = generate_once(&db, &tx).await.unwrap();

        assert!(db.get_mission(mission.id).await.unwrap().is_some());
        let ServerEvent::MissionUpdate { new_mission } =
            serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(new_mission, mission);
    }
}
