//! Group key derivation and schedule lookup.
//!
//! Items are grouped either by the folder directly under the top-level
//! folder of their path (`Directory`) or by their user-assigned category
//! (`Custom`). Schedules are keyed by the `(key, mode)` string pair at
//! lookup time, so renaming a category leaves its previous schedule behind.

use super::{GroupSchedule, GroupingMode, SyncState, TrackedItem, DEFAULT_CATEGORY};

pub const ROOT_GROUP: &str = "Root";

/// Group key for `item` whose current path is `path`.
pub fn group_key(item: &TrackedItem, path: &str, mode: GroupingMode) -> String {
    match mode {
        GroupingMode::Directory => directory_key(path),
        GroupingMode::Custom => category_key(&item.category),
    }
}

/// Second segment of a `/`-separated path when it has a nested segment below it.
pub fn directory_key(path: &str) -> String {
    let segments: Vec<&str> = path
        .split(|c| c == '/' || c == '\\')
        .filter(|s| !s.is_empty())
        .collect();

    if segments.len() > 2 {
        segments[1].to_string()
    } else {
        ROOT_GROUP.to_string()
    }
}

pub fn category_key(category: &str) -> String {
    let trimmed = category.trim();
    if trimmed.is_empty() {
        DEFAULT_CATEGORY.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Returns the index of the schedule for `(key, mode)` and whether it was created.
pub fn get_or_create_schedule(state: &mut SyncState, key: &str, mode: GroupingMode) -> (usize, bool) {
    if let Some(index) = state
        .group_schedules
        .iter()
        .position(|s| s.group_key == key && s.mode == mode)
    {
        return (index, false);
    }

    state.group_schedules.push(GroupSchedule::new(key, mode));
    (state.group_schedules.len() - 1, true)
}

/// Moves every item in category `old` to `new`. Returns how many items changed.
pub fn rename_group(state: &mut SyncState, old: &str, new: &str) -> usize {
    let old = category_key(old);
    let new = category_key(new);
    let mut renamed = 0;

    for item in state.items.iter_mut() {
        if category_key(&item.category) == old {
            item.category = new.clone();
            renamed += 1;
        }
    }

    renamed
}
