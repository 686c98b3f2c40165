use crate::models::Task;

/// A local change to the task list, applied before the backend confirms it.
///
/// Every mutation touches a single id, so concurrent mutations of different tasks commute and
/// can be undone independently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Put a new task at the front.
    Insert(Task),
    /// Swap the task with the same id for this record.
    Replace(Task),
    Remove(String),
}

/// The inverse of an applied [`Mutation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Undo {
    Discard(String),
    Restore(Task),
    Reinsert { index: usize, task: Task },
}

impl Mutation {
    /// The new list plus the way back, or `None` when the target id is not in `tasks`.
    pub fn apply(self, tasks: &[Task]) -> Option<(Vec<Task>, Undo)> {
        match self {
            Mutation::Insert(task) => {
                let undo = Undo::Discard(task.id.clone());
                let mut next = Vec::with_capacity(tasks.len() + 1);
                next.push(task);
                next.extend_from_slice(tasks);
                Some((next, undo))
            }
            Mutation::Replace(task) => {
                let index = position(tasks, &task.id)?;
                let mut next = tasks.to_vec();
                let previous = std::mem::replace(&mut next[index], task);
                Some((next, Undo::Restore(previous)))
            }
            Mutation::Remove(id) => {
                let index = position(tasks, &id)?;
                let mut next = tasks.to_vec();
                let task = next.remove(index);
                Some((next, Undo::Reinsert { index, task }))
            }
        }
    }
}

impl Undo {
    /// Reverts the mutation in whatever list is current now.
    pub fn apply(self, tasks: &[Task]) -> Vec<Task> {
        let mut next = tasks.to_vec();
        match self {
            Undo::Discard(id) => next.retain(|task| task.id != id),
            Undo::Restore(previous) => {
                if let Some(index) = position(&next, &previous.id) {
                    next[index] = previous;
                }
            }
            Undo::Reinsert { index, task } => {
                if position(&next, &task.id).is_none() {
                    next.insert(index.min(next.len()), task);
                }
            }
        }
        next
    }
}

/// Swaps the placeholder for the confirmed record, or adds the record if a feed refresh
/// already dropped the placeholder.
pub fn confirm_insert(tasks: &[Task], placeholder_id: &str, confirmed: Task) -> Vec<Task> {
    let mut next = tasks.to_vec();
    match position(&next, placeholder_id) {
        Some(index) => {
            if position(&next, &confirmed.id).is_some() {
                next.remove(index);
            } else {
                next[index] = confirmed;
            }
        }
        None => {
            if position(&next, &confirmed.id).is_none() {
                next.insert(0, confirmed);
            }
        }
    }
    next
}

fn position(tasks: &[Task], id: &str) -> Option<usize> {
    tasks.iter().position(|task| task.id == id)
}
