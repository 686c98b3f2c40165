use std::collections::HashMap;

use futures::stream::{self, BoxStream, StreamExt};

use crate::error::TaskError;
use crate::gateway::{FeedUpdate, Subscription, UpdateCallback};
use crate::models::task::sort_by_due;
use crate::models::Task;

/// One message from an underlying push feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// Full current contents of the feed.
    Snapshot(Vec<Task>),
    /// Transient failure; the feed keeps running.
    Failed(TaskError),
    /// Permission rejected; the feed is dead.
    Denied(String),
}

pub type FeedStream = BoxStream<'static, FeedEvent>;

/// Folds the events of several feeds into one ordered list.
///
/// Feeds are indexed by precedence: on an id collision the record from the higher index wins.
#[derive(Debug)]
pub struct FeedMerger {
    snapshots: Vec<Option<Vec<Task>>>,
    disabled: Vec<bool>,
    last_emitted: Option<Vec<Task>>,
}

impl FeedMerger {
    pub fn new(feeds: usize) -> Self {
        FeedMerger {
            snapshots: vec![None; feeds],
            disabled: vec![false; feeds],
            last_emitted: None,
        }
    }

    /// Applies `event` from feed `index`; returns what to publish, if anything changed.
    ///
    /// Failures are published as errors. After one, the next merged list is published even if
    /// it equals the last one, so subscribers learn the feed recovered. A permission rejection
    /// is only an error once no feed is left.
    pub fn apply(&mut self, index: usize, event: FeedEvent) -> Option<FeedUpdate> {
        if index >= self.snapshots.len() || self.disabled[index] {
            return None;
        }
        match event {
            FeedEvent::Snapshot(tasks) => {
                self.snapshots[index] = Some(tasks);
            }
            FeedEvent::Failed(err) => {
                log::warn!("Task feed {} reported an error: {}", index, err);
                self.last_emitted = None;
                return Some(Err(err));
            }
            FeedEvent::Denied(reason) => {
                log::warn!("Task feed {} disabled after permission error: {}", index, reason);
                self.disabled[index] = true;
                self.snapshots[index] = None;
                if self.active_feeds() == 0 {
                    self.last_emitted = None;
                    return Some(Err(TaskError::Authorization(reason)));
                }
            }
        }

        let merged = self.merged();
        if self.last_emitted.as_ref() == Some(&merged) {
            return None;
        }
        self.last_emitted = Some(merged.clone());
        Some(Ok(merged))
    }

    pub fn active_feeds(&self) -> usize {
        self.disabled.iter().filter(|disabled| !**disabled).count()
    }

    fn merged(&self) -> Vec<Task> {
        merge_by_id(self.snapshots.iter().flatten())
    }
}

/// Unions task lists by id, later lists overriding earlier ones, then sorts by due date.
pub fn merge_by_id<'a, I>(sources: I) -> Vec<Task>
where
    I: IntoIterator<Item = &'a Vec<Task>>,
{
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut merged: Vec<Task> = Vec::new();

    for task in sources.into_iter().flatten() {
        match positions.get(&task.id) {
            Some(&at) => merged[at] = task.clone(),
            None => {
                positions.insert(task.id.clone(), merged.len());
                merged.push(task.clone());
            }
        }
    }
    sort_by_due(&mut merged);
    merged
}

/// Runs the feeds on a background task, publishing merged lists to `on_update`.
pub fn spawn_merged(feeds: Vec<FeedStream>, on_update: UpdateCallback) -> Subscription {
    let mut merger = FeedMerger::new(feeds.len());
    let mut events = stream::select_all(
        feeds
            .into_iter()
            .enumerate()
            .map(|(index, feed)| feed.map(move |event| (index, event)).boxed()),
    );

    let handle = tokio::spawn(async move {
        while let Some((index, event)) = events.next().await {
            if let Some(update) = merger.apply(index, event) {
                if let Ok(tasks) = &update {
                    log::debug!("Publishing {} tasks from feed {}", tasks.len(), index);
                }
                on_update(update);
            }
        }
        log::debug!("All task feeds ended ({} active)", merger.active_feeds());
    });

    Subscription::new(handle.abort_handle())
}
