//! Process-wide critical section for duplicate detection
//!
//! Every pipeline checks "does this id exist yet" and stages the new rows
//! while holding the same [`DuplicateGuard`]. Staged ids are reserved before
//! the section closes and stay reserved until the pipeline's insert has
//! finished, so a later section sees them as taken even though they are not
//! committed yet. Parsing, validation and the final insert stay outside the
//! section.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, LazyLock, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Instant;

use tokio::sync::Mutex;

use crate::model::DatasetKind;

static SHARED: LazyLock<Arc<DuplicateGuard>> = LazyLock::new(|| Arc::new(DuplicateGuard::new()));

/// A single mutual-exclusion section shared by all datasets
#[derive(Debug, Default)]
pub struct DuplicateGuard {
    section: Mutex<()>,
    reserved: StdMutex<HashMap<DatasetKind, HashSet<String>>>,
}

impl DuplicateGuard {
    /// An isolated guard; production code should use [`DuplicateGuard::shared`]
    pub fn new() -> Self {
        Self::default()
    }

    /// The guard shared by every coordinator in this process
    pub fn shared() -> Arc<DuplicateGuard> {
        Arc::clone(&SHARED)
    }

    /// Run `section` with exclusive access to the check-and-stage step
    pub async fn with_guard<F, Fut, T>(&self, kind: DatasetKind, section: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let waiting = Instant::now();
        let _held = self.section.lock().await;
        tracing::debug!(
            dataset = %kind,
            waited_ms = waiting.elapsed().as_millis() as u64,
            "Duplicate guard acquired"
        );

        let held_since = Instant::now();
        let result = section().await;

        tracing::debug!(
            dataset = %kind,
            held_ms = held_since.elapsed().as_millis() as u64,
            "Duplicate guard released"
        );
        result
    }

    /// Whether another pipeline has staged `id` and not finished inserting it
    pub fn is_reserved(&self, kind: DatasetKind, id: &str) -> bool {
        self.reservations()
            .get(&kind)
            .is_some_and(|ids| ids.contains(id))
    }

    /// Reserve staged ids until the returned handle is dropped
    ///
    /// Call from inside [`DuplicateGuard::with_guard`] and drop the handle
    /// only once the insert has committed or failed.
    pub fn reserve<I, S>(&self, kind: DatasetKind, ids: I) -> Reservation<'_>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: Vec<String> = ids.into_iter().map(Into::into).collect();
        self.reservations()
            .entry(kind)
            .or_default()
            .extend(ids.iter().cloned());
        Reservation {
            guard: self,
            kind,
            ids,
        }
    }

    fn reservations(&self) -> MutexGuard<'_, HashMap<DatasetKind, HashSet<String>>> {
        self.reserved.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Ids staged by one pipeline; released on drop
#[derive(Debug)]
#[must_use = "ids are released as soon as the reservation is dropped"]
pub struct Reservation<'a> {
    guard: &'a DuplicateGuard,
    kind: DatasetKind,
    ids: Vec<String>,
}

impl Reservation<'_> {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        let mut reservations = self.guard.reservations();
        if let Some(reserved) = reservations.get_mut(&self.kind) {
            for id in &self.ids {
                reserved.remove(id);
            }
        }
    }
}
