//! Load-time schema migration
//!
//! Older registry files stored Slack-style records with `channel_id` and
//! `thread_ts` but no routing key. They are rebuilt into current mappings
//! as they are read; current records pass through untouched.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::types::{ExtraFields, SessionId, SurfaceSessionMapping};

/// Record shape written before routing keys existed
#[derive(Debug, Deserialize)]
struct LegacyMapping {
    channel_id: String,
    #[serde(default)]
    thread_ts: Option<String>,
    session_id: SessionId,
    #[serde(default, alias = "created_by")]
    user_id: String,
    #[serde(default)]
    surface: Option<String>,
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    last_active: Option<DateTime<Utc>>,
    #[serde(default = "default_active")]
    is_active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredRecord {
    Current(SurfaceSessionMapping),
    Legacy(LegacyMapping),
}

/// Routing key for a channel, narrowed to a thread when one is known
#[must_use]
pub fn routing_key(channel_id: &str, thread_ts: Option<&str>) -> String {
    match thread_ts {
        Some(thread) if !thread.is_empty() => format!("{channel_id}:{thread}"),
        _ => channel_id.to_string(),
    }
}

impl LegacyMapping {
    fn into_current(self, default_surface: &str) -> SurfaceSessionMapping {
        let now = Utc::now();
        let routing_key = routing_key(&self.channel_id, self.thread_ts.as_deref());

        let mut extra = ExtraFields::new();
        extra.insert("channel_id".to_string(), self.channel_id.into());
        if let Some(thread_ts) = self.thread_ts {
            extra.insert("thread_ts".to_string(), thread_ts.into());
        }

        let created_at = self.created_at.unwrap_or(now);
        SurfaceSessionMapping {
            routing_key,
            session_id: self.session_id,
            surface: self.surface.unwrap_or_else(|| default_surface.to_string()),
            created_by: self.user_id,
            project_id: self.project_id,
            description: self.description,
            created_at,
            last_active: self.last_active.unwrap_or(created_at),
            is_active: self.is_active,
            extra,
        }
    }
}

/// Decode persisted records, upgrading legacy ones
///
/// Records that fit neither schema are skipped with a warning so one bad
/// entry does not cost the whole table.
pub fn migrate_records(
    records: Vec<serde_json::Value>,
    default_surface: &str,
) -> Vec<SurfaceSessionMapping> {
    let mut migrated = 0usize;
    let mappings: Vec<SurfaceSessionMapping> = records
        .into_iter()
        .enumerate()
        .filter_map(|(index, raw)| match serde_json::from_value::<StoredRecord>(raw) {
            Ok(StoredRecord::Current(mapping)) => Some(mapping),
            Ok(StoredRecord::Legacy(legacy)) => {
                migrated += 1;
                Some(legacy.into_current(default_surface))
            }
            Err(e) => {
                log::warn!("Skipping unreadable registry record #{index}: {e}");
                None
            }
        })
        .collect();

    if migrated > 0 {
        log::info!("Migrated {migrated} legacy registry record(s)");
    }
    mappings
}
