//! Optimistic local mutation with rollback on remote failure.

use crate::domain::{SessionId, Task, TaskId, WorkSession};
use std::future::Future;

/// A record addressable by a stable key inside a locally owned list
pub trait Keyed {
    type Key: PartialEq + Clone;

    fn key(&self) -> &Self::Key;
}

impl Keyed for Task {
    type Key = TaskId;

    fn key(&self) -> &TaskId {
        &self.id
    }
}

impl Keyed for WorkSession {
    type Key = SessionId;

    fn key(&self) -> &SessionId {
        &self.id
    }
}

/// Prior values of some records, with their positions at capture time
#[derive(Debug, Clone)]
pub struct Snapshot<T> {
    entries: Vec<(usize, T)>,
}

impl<T: Keyed + Clone> Snapshot<T> {
    /// Keys not present in `items` are skipped
    pub fn capture(items: &[T], keys: &[&T::Key]) -> Self {
        let mut entries: Vec<(usize, T)> = items
            .iter()
            .enumerate()
            .filter(|(_, item)| keys.contains(&item.key()))
            .map(|(index, item)| (index, item.clone()))
            .collect();
        entries.sort_by_key(|(index, _)| *index);
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Put every captured record back: in place if still present, otherwise at
    /// its original position (clamped to the current length).
    pub fn restore(self, items: &mut Vec<T>) {
        for (index, saved) in self.entries {
            match items.iter().position(|item| item.key() == saved.key()) {
                Some(pos) => items[pos] = saved,
                None => {
                    let pos = index.min(items.len());
                    items.insert(pos, saved);
                }
            }
        }
    }
}

/// Snapshot `keys`, apply `mutate` locally, then await `remote`.
/// On failure the snapshot is restored and the error returned.
pub async fn optimistic<T, R, E, F, Fut>(
    items: &mut Vec<T>,
    keys: &[&T::Key],
    mutate: F,
    remote: Fut,
) -> Result<R, E>
where
    T: Keyed + Clone,
    F: FnOnce(&mut Vec<T>),
    Fut: Future<Output = Result<R, E>>,
{
    let snapshot = Snapshot::capture(items, keys);
    mutate(items);

    match remote.await {
        Ok(value) => Ok(value),
        Err(err) => {
            snapshot.restore(items);
            Err(err)
        }
    }
}
