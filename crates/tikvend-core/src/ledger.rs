// ── Session Ledger ──
//
// Read-optimized projection of the AAA accounting log, keyed by the
// accounting unique id. Upserts are last-writer-wins per record; a
// record that arrives first as open and later as closed converges to
// closed no matter the apply order within one sync pass.

use dashmap::DashMap;

use crate::aaa::AcctRecord;
use crate::model::{DeviceId, Session};

fn project(record: &AcctRecord) -> Session {
    Session {
        unique_id: record.unique_id.clone(),
        username: record.username.clone(),
        device_id: record.device_id.clone(),
        started_at: record.started_at,
        stopped_at: record.stopped_at,
        bytes_in: record.bytes_in,
        bytes_out: record.bytes_out,
        uptime_seconds: record.session_seconds,
    }
}

/// In-memory session projection maintained by the sync job.
#[derive(Debug, Default)]
pub struct SessionLedger {
    sessions: DashMap<String, Session>,
}

impl SessionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert open records. A ledger entry already marked closed is
    /// never reopened by a stale open record.
    pub fn apply_open(&self, records: &[AcctRecord]) {
        for record in records {
            let session = project(record);
            match self.sessions.get_mut(&record.unique_id) {
                Some(mut existing) if existing.stopped_at.is_some() => {
                    // Keep the close, refresh counters only.
                    existing.bytes_in = session.bytes_in.max(existing.bytes_in);
                    existing.bytes_out = session.bytes_out.max(existing.bytes_out);
                }
                Some(mut existing) => *existing = session,
                None => {
                    self.sessions.insert(record.unique_id.clone(), session);
                }
            }
        }
    }

    /// Upsert closed records, overwriting any open projection.
    pub fn apply_closed(&self, records: &[AcctRecord]) {
        for record in records {
            self.sessions
                .insert(record.unique_id.clone(), project(record));
        }
    }

    /// All sessions for a username, newest first.
    pub fn sessions_for(&self, username: &str) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .sessions
            .iter()
            .filter(|s| s.username == username)
            .map(|s| s.value().clone())
            .collect();
        sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        sessions
    }

    /// Open sessions for a username.
    pub fn active_for(&self, username: &str) -> Vec<Session> {
        self.sessions
            .iter()
            .filter(|s| s.username == username && s.is_active())
            .map(|s| s.value().clone())
            .collect()
    }

    /// Open sessions on one device.
    pub fn active_on_device(&self, device_id: &DeviceId) -> Vec<Session> {
        self.sessions
            .iter()
            .filter(|s| s.device_id == *device_id && s.is_active())
            .map(|s| s.value().clone())
            .collect()
    }

    /// `(total, open)` counts across the whole ledger.
    pub fn counts(&self) -> (usize, usize) {
        let total = self.sessions.len();
        let open = self.sessions.iter().filter(|s| s.is_active()).count();
        (total, open)
    }
}
