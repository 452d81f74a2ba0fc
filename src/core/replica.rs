// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The per-node replica stack: an ordered list of key -> value maps, index 0
//! (the primary) through index `r - 1` (the tail).

use super::id::Id;
use std::collections::HashMap;

/// One level of the replica stack.
pub type ReplicaMap = HashMap<String, String>;

/// Ordered replica levels. Level 0 holds the keys this node is primary for;
/// level i holds the keys it is the i-th downstream successor for.
#[derive(Clone, Debug, Default)]
pub struct ReplicaStack {
    levels: Vec<ReplicaMap>,
}

impl ReplicaStack {
    /// A fresh stack with `r` empty levels.
    pub fn new(r: usize) -> Self {
        Self {
            levels: (0..r).map(|_| ReplicaMap::new()).collect(),
        }
    }

    /// Build a stack from already-populated levels (used during join
    /// hand-off, where level 0 is the hand-off set and the rest are copies).
    pub fn from_levels(levels: Vec<ReplicaMap>) -> Self {
        Self { levels }
    }

    /// Current replication factor (number of levels).
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn level(&self, distance: usize) -> Option<&ReplicaMap> {
        self.levels.get(distance)
    }

    pub fn level_mut(&mut self, distance: usize) -> Option<&mut ReplicaMap> {
        self.levels.get_mut(distance)
    }

    pub fn levels(&self) -> &[ReplicaMap] {
        &self.levels
    }

    /// `insert` semantics: concatenate to the existing value, or set if
    /// absent.
    pub fn insert(&mut self, distance: usize, key: String, value: &str) {
        let level = self
            .levels
            .get_mut(distance)
            .expect("insert at distance beyond the replication factor");
        level
            .entry(key)
            .and_modify(|existing| existing.push_str(value))
            .or_insert_with(|| value.to_string());
    }

    /// `delete` semantics: a no-op if the key is absent.
    pub fn delete(&mut self, distance: usize, key: &str) {
        if let Some(level) = self.levels.get_mut(distance) {
            level.remove(key);
        }
    }

    pub fn get(&self, distance: usize, key: &str) -> Option<&String> {
        self.levels.get(distance).and_then(|level| level.get(key))
    }

    /// Grow the stack by one empty tail level (used by
    /// `inc_replication_factor`).
    pub fn push_empty_tail(&mut self) {
        self.levels.push(ReplicaMap::new());
    }

    /// Shrink the stack by dropping the tail level (used by
    /// `dec_replication_factor`).
    pub fn pop_tail(&mut self) {
        self.levels.pop();
    }

    /// Replace the tail level wholesale (used by `shift_down_replicas`,
    /// which hands the departing node's old tail to the new tail position).
    pub fn set_tail(&mut self, tail: ReplicaMap) {
        if let Some(last) = self.levels.last_mut() {
            *last = tail;
        } else {
            self.levels.push(tail);
        }
    }

    /// `shift_up_replicas`: starting at `distance`, move each level i to
    /// i + 1, except the keys in `[exclude_start, exclude_end]` which stay
    /// at `distance` (they remain locally owned). Returns the portion that
    /// moved off level `distance` so the caller can forward it to the
    /// successor with `distance + 1`. If `distance + 1 >= len`, the excess
    /// that would fall off the tail is returned as `None` inside the map
    /// (dropped by the caller).
    pub fn shift_up(&mut self, distance: usize, exclude_start: Id, exclude_end: Id) -> Option<ReplicaMap> {
        if distance >= self.levels.len() {
            return None;
        }
        let current = std::mem::take(&mut self.levels[distance]);
        let mut stays = ReplicaMap::new();
        let mut moves = ReplicaMap::new();
        for (key, value) in current {
            if Id::in_range(exclude_start, exclude_end, Id::of(&key)) {
                stays.insert(key, value);
            } else {
                moves.insert(key, value);
            }
        }
        self.levels[distance] = stays;
        if distance + 1 < self.levels.len() {
            // merge into whatever is already sitting at distance + 1, since
            // shift-up is applied level-by-level along the ring and a level
            // may already hold keys shifted in from an earlier pass.
            for (key, value) in moves.drain() {
                self.levels[distance + 1].insert(key, value);
            }
            None
        } else {
            Some(moves)
        }
    }

    /// Move every level at index > `distance` one slot toward the tail,
    /// leaving level `distance` empty and level `distance - 1` untouched.
    /// Used by `inc_replication_factor`, which partitions the untouched
    /// level afterward.
    pub fn shift_right_from(&mut self, distance: usize) {
        for i in (distance + 1..self.levels.len()).rev() {
            let moved = std::mem::take(&mut self.levels[i - 1]);
            self.levels[i] = moved;
        }
    }

    /// Split `source`'s entries by `[start, end]` membership: matches move
    /// to `dest` (overwriting it), the rest stay at `source`.
    pub fn partition_level(&mut self, source: usize, dest: usize, start: Id, end: Id) {
        let contents = std::mem::take(&mut self.levels[source]);
        let mut stays = ReplicaMap::new();
        let mut moves = ReplicaMap::new();
        for (key, value) in contents {
            if Id::in_range(start, end, Id::of(&key)) {
                moves.insert(key, value);
            } else {
                stays.insert(key, value);
            }
        }
        self.levels[source] = stays;
        self.levels[dest] = moves;
    }

    /// Union `other` into an existing level (used when a node absorbs its
    /// departed predecessor's primary set into its own second replica).
    pub fn merge_into(&mut self, distance: usize, other: ReplicaMap) {
        let level = &mut self.levels[distance];
        for (key, value) in other {
            level.insert(key, value);
        }
    }

    /// `shift_down_replicas`: level i becomes level i - 1 for i >= distance
    /// + 1 (caller passes `distance` as the level the departed predecessor's
    /// hand-off is merged into, see `NodeState::absorb_departed_primary`);
    /// the new tail receives `maxdist_replica`.
    pub fn shift_down(&mut self, maxdist_replica: ReplicaMap) {
        if self.levels.is_empty() {
            self.levels.push(maxdist_replica);
            return;
        }
        self.levels.remove(0);
        self.levels.push(maxdist_replica);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_accumulates_by_concatenation() {
        let mut stack = ReplicaStack::new(1);
        stack.insert(0, "x".into(), "a");
        stack.insert(0, "x".into(), "b");
        assert_eq!(stack.get(0, "x"), Some(&"ab".to_string()));
    }

    #[test]
    fn delete_of_unknown_key_is_silent_noop() {
        let mut stack = ReplicaStack::new(1);
        stack.delete(0, "missing");
        assert!(stack.get(0, "missing").is_none());
    }

    #[test]
    fn delete_removes_existing_key() {
        let mut stack = ReplicaStack::new(1);
        stack.insert(0, "x".into(), "a");
        stack.delete(0, "x");
        assert!(stack.get(0, "x").is_none());
    }

    #[test]
    fn shift_up_splits_by_new_node_range() {
        let mut stack = ReplicaStack::new(2);
        let low = Id::of("low-key");
        let high = Id::of("high-key");
        let (low, high) = if low <= high { (low, high) } else { (high, low) };
        // find two keys, one inside [low, high], one outside, by construction
        stack.level_mut(0).unwrap().insert("inside".into(), "v1".into());
        stack.level_mut(0).unwrap().insert("outside".into(), "v2".into());
        // force "inside" to be actually inside the exclude range by using its
        // own id as both bounds (full point range only matches itself, so
        // instead use the full-ring shorthand: start == end means everything
        // is "excluded" i.e. stays local).
        let id = Id::of("inside");
        let moved = stack.shift_up(0, id, id);
        // everything except "inside" moved to level 1 (merged since
        // distance+1 < len), nothing fell off the tail.
        assert!(moved.is_none());
        assert_eq!(stack.level(0).unwrap().get("inside"), Some(&"v1".to_string()));
        assert!(stack.level(0).unwrap().get("outside").is_none());
        assert_eq!(stack.level(1).unwrap().get("outside"), Some(&"v2".to_string()));
        let _ = low;
        let _ = high;
    }

    #[test]
    fn shift_up_off_the_tail_returns_moved_set() {
        let mut stack = ReplicaStack::new(1);
        stack.level_mut(0).unwrap().insert("k".into(), "v".into());
        let zero = Id::ZERO;
        // exclude nothing (use a range that doesn't contain the key's id)
        let other = Id::of("definitely-not-k");
        let moved = stack.shift_up(0, other, other);
        assert_eq!(moved.unwrap().get("k"), Some(&"v".to_string()));
        let _ = zero;
    }

    #[test]
    fn shift_down_drops_primary_and_appends_tail() {
        let mut stack = ReplicaStack::new(3);
        stack.level_mut(0).unwrap().insert("a".into(), "1".into());
        stack.level_mut(1).unwrap().insert("b".into(), "2".into());
        stack.level_mut(2).unwrap().insert("c".into(), "3".into());
        let mut incoming_tail = ReplicaMap::new();
        incoming_tail.insert("d".into(), "4".into());
        stack.shift_down(incoming_tail.clone());
        assert_eq!(stack.level(0).unwrap().get("b"), Some(&"2".to_string()));
        assert_eq!(stack.level(1).unwrap().get("c"), Some(&"3".to_string()));
        assert_eq!(stack.level(2), Some(&incoming_tail));
    }

    #[test]
    fn push_and_pop_tail_adjust_length() {
        let mut stack = ReplicaStack::new(1);
        stack.push_empty_tail();
        assert_eq!(stack.len(), 2);
        stack.pop_tail();
        assert_eq!(stack.len(), 1);
    }
}
