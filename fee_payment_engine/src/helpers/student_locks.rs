use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use log::*;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = Arc<Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>>;

/// A keyed async mutex map. Allocations for the same student run one at a time; different students never contend.
///
/// Entries are removed when the last guard or waiter for a student goes away, so the map only ever holds students
/// with allocations in flight.
#[derive(Clone, Default)]
pub struct StudentLocks {
    locks: LockMap,
}

impl StudentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, student_id: i64) -> StudentGuard {
        let mutex = {
            let mut map = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(map.entry(student_id).or_default())
        };
        let guard = mutex.lock_owned().await;
        trace!("🔒️ Acquired allocation lock for student #{student_id}");
        StudentGuard { student_id, locks: Arc::clone(&self.locks), guard: Some(guard) }
    }

    /// The number of students that currently have a lock held or awaited.
    pub fn active(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

pub struct StudentGuard {
    student_id: i64,
    locks: LockMap,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for StudentGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut map = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // Only the map's own reference left means nobody else is holding or waiting on this student.
        if map.get(&self.student_id).is_some_and(|m| Arc::strong_count(m) == 1) {
            map.remove(&self.student_id);
        }
        trace!("🔒️ Released allocation lock for student #{}", self.student_id);
    }
}
