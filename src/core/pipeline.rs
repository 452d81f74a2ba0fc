// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The operation pipeline: `modify`, `query`, `query_star`, and `overlay`,
//! each dispatching either to local chain state or to the next routing hop.

use super::error::CoreError;
use super::id::Id;
use super::state::{ConsistencyMode, NodeState};
use std::collections::HashMap;

/// The two mutation kinds accepted by `modify`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModifyOp {
    Insert,
    Delete,
}

/// Where a pipeline call should go next: apply locally and begin (or
/// continue) a chain step, or route onward to a peer.
#[derive(Debug, PartialEq, Eq)]
pub enum Route {
    /// Begin (or continue) a chain step at this node, at the given replica
    /// distance.
    BeginChain { distance: usize },
    /// Forward the whole request unchanged to the named peer.
    Forward { to: String },
    /// Answer immediately with this value (eventual reads, local hits).
    AnswerLocally { value: Option<String> },
}

/// `modify(uid, origin_url, op, key, value)` routing decision, per the
/// responsibility rule: handle locally if this node owns the key's range,
/// otherwise route via the finger table.
pub fn route_modify(node: &NodeState, op: ModifyOp, key: &str, value: Option<&str>) -> Result<Route, CoreError> {
    if op == ModifyOp::Insert && value.is_none() {
        return Err(CoreError::InsertMissingValue);
    }
    let h = Id::of(key);
    if node.is_responsible(h) {
        Ok(Route::BeginChain { distance: 0 })
    } else {
        let hop = node.fingers.lookup(node.id, h);
        Ok(Route::Forward { to: hop.url })
    }
}

/// `query(uid, origin_url, key)` routing decision. LINEARIZABLE always
/// chains to the tail; EVENTUAL answers from the first chain level (counting
/// from the tail backward) that holds the key, or routes onward.
pub fn route_query(node: &NodeState, key: &str) -> Route {
    let h = Id::of(key);
    match node.consistency {
        ConsistencyMode::Linearizable => {
            if node.is_responsible(h) {
                Route::BeginChain { distance: 0 }
            } else {
                let hop = node.fingers.lookup(node.id, h);
                Route::Forward { to: hop.url }
            }
        }
        ConsistencyMode::Eventual => {
            if node.is_responsible(h) {
                let value = node.replicas.get(0, key).cloned();
                return Route::AnswerLocally { value };
            }
            for distance in (0..node.replication_factor()).rev() {
                if let Some(value) = node.replicas.get(distance, key) {
                    return Route::AnswerLocally { value: Some(value.clone()) };
                }
            }
            let hop = node.fingers.lookup(node.id, h);
            Route::Forward { to: hop.url }
        }
    }
}

/// Apply a modify chain step already admitted at `distance`, returning
/// whichever of {forward to successor, reply to originator} applies next.
pub fn apply_modify_step(node: &mut NodeState, distance: usize, op: ModifyOp, key: String, value: Option<String>) {
    match op {
        ModifyOp::Insert => {
            let value = value.expect("insert step admitted without a value");
            node.replicas.insert(distance, key, &value);
        }
        ModifyOp::Delete => {
            node.replicas.delete(distance, &key);
        }
    }
}

/// Whether a chain step at `distance` is the tail and should reply to the
/// originator instead of forwarding.
pub fn is_tail_step(node: &NodeState, distance: usize) -> bool {
    distance == node.replication_factor() - 1
}

/// `query_star(uid, origin_url, accumulator)`: the tail-copy accumulation
/// rule avoids counting a key once per replica by folding only
/// `replicas[r-1]` at each hop.
pub fn query_star_step(node: &NodeState, mut accumulator: HashMap<String, String>) -> HashMap<String, String> {
    if let Some(tail) = node.replicas.level(node.replication_factor() - 1) {
        for (key, value) in tail {
            accumulator.insert(key.clone(), value.clone());
        }
    }
    accumulator
}

/// One entry of an `overlay` walk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OverlayEntry {
    pub url: String,
    pub pred: String,
    pub succ: String,
    pub keys_start: Id,
    pub keys_end: Id,
}

pub fn overlay_entry(node: &NodeState) -> OverlayEntry {
    OverlayEntry {
        url: node.url.clone(),
        pred: node.pred_url().to_string(),
        succ: node.succ_url().to_string(),
        keys_start: node.keys_start,
        keys_end: node.keys_end,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solitary_node() -> NodeState {
        NodeState::bootstrap("http://self".into(), 3, ConsistencyMode::Linearizable)
    }

    #[test]
    fn modify_insert_without_value_is_rejected() {
        let node = solitary_node();
        let err = route_modify(&node, ModifyOp::Insert, "k", None).unwrap_err();
        assert!(matches!(err, CoreError::InsertMissingValue));
    }

    #[test]
    fn modify_on_responsible_node_begins_chain_at_zero() {
        let node = solitary_node();
        let route = route_modify(&node, ModifyOp::Insert, "k", Some("v")).unwrap();
        assert_eq!(route, Route::BeginChain { distance: 0 });
    }

    #[test]
    fn eventual_query_answers_locally_when_responsible() {
        let mut node = NodeState::bootstrap("http://self".into(), 3, ConsistencyMode::Eventual);
        node.replicas.insert(0, "k".into(), "v");
        let route = route_query(&node, "k");
        assert_eq!(route, Route::AnswerLocally { value: Some("v".to_string()) });
    }

    #[test]
    fn eventual_query_scans_from_tail_backward() {
        let mut node = NodeState::bootstrap("http://self".into(), 1, ConsistencyMode::Eventual);
        // force not-responsible by shrinking the range to nothing
        node.keys_start = node.id;
        node.keys_end = node.id;
        node.keys_start = Id::of("unrelated").plus_one();
        node.keys_end = Id::of("unrelated");
        node.replicas.insert(0, "k".into(), "v");
        let route = route_query(&node, "k");
        assert_eq!(route, Route::AnswerLocally { value: Some("v".to_string()) });
    }

    #[test]
    fn linearizable_query_on_responsible_node_begins_chain() {
        let node = solitary_node();
        let route = route_query(&node, "k");
        assert_eq!(route, Route::BeginChain { distance: 0 });
    }

    #[test]
    fn apply_modify_step_insert_then_insert_concatenates() {
        let mut node = solitary_node();
        apply_modify_step(&mut node, 0, ModifyOp::Insert, "k".into(), Some("a".into()));
        apply_modify_step(&mut node, 0, ModifyOp::Insert, "k".into(), Some("b".into()));
        assert_eq!(node.replicas.get(0, "k"), Some(&"ab".to_string()));
    }

    #[test]
    fn tail_step_detection_uses_replication_factor() {
        let node = solitary_node();
        assert!(is_tail_step(&node, 0));
    }

    #[test]
    fn query_star_accumulates_from_tail_level_only() {
        let mut node = NodeState::bootstrap("http://self".into(), 2, ConsistencyMode::Linearizable);
        node.replicas.push_empty_tail();
        node.replicas.insert(0, "primary-only".into(), "x");
        node.replicas.insert(1, "tail".into(), "y");
        let acc = query_star_step(&node, HashMap::new());
        assert_eq!(acc.len(), 1);
        assert_eq!(acc.get("tail"), Some(&"y".to_string()));
        assert!(acc.get("primary-only").is_none());
    }
}
