#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use courier_chats::{EventPublisher, MembershipChange, ServerEvent};
use courier_config::DatabaseConfig;
use courier_database::initialize_database;
use sqlx::SqlitePool;
use tempfile::TempDir;

#[derive(Debug, Clone)]
pub struct Published {
    pub chat_id: String,
    pub event: ServerEvent,
    pub excluded: Option<String>,
}

/// Captures everything the services publish.
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<Published>>,
    memberships: Mutex<Vec<MembershipChange>>,
}

impl RecordingPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Published> {
        self.events.lock().unwrap().clone()
    }

    pub fn event_types(&self) -> Vec<&'static str> {
        self.events().iter().map(|p| p.event.event_type()).collect()
    }

    pub fn memberships(&self) -> Vec<MembershipChange> {
        self.memberships.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
        self.memberships.lock().unwrap().clear();
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, chat_id: &str, event: &ServerEvent) {
        self.events.lock().unwrap().push(Published {
            chat_id: chat_id.to_string(),
            event: event.clone(),
            excluded: None,
        });
    }

    fn publish_except(&self, chat_id: &str, event: &ServerEvent, excluded_user: &str) {
        self.events.lock().unwrap().push(Published {
            chat_id: chat_id.to_string(),
            event: event.clone(),
            excluded: Some(excluded_user.to_string()),
        });
    }

    fn membership_changed(&self, change: MembershipChange) {
        self.memberships.lock().unwrap().push(change);
    }
}

pub async fn test_pool() -> (SqlitePool, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let config = DatabaseConfig {
        url: format!("sqlite://{}", temp_dir.path().join("chats.db").display()),
        max_connections: 5,
    };
    let pool = initialize_database(&config).await.unwrap();
    (pool, temp_dir)
}
