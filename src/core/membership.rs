// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Pure state transformations for join and graceful depart. Network
//! dispatch (who gets called, in what order) belongs to the app layer;
//! this module only ever mutates the `NodeState` passed to it and reports
//! what the caller must still send onward.

use super::error::CoreError;
use super::finger::Finger;
use super::id::Id;
use super::replica::ReplicaMap;
use super::state::{ConsistencyMode, NodeState};

/// What the responsible node (the new node's soon-to-be successor) must
/// send onward after executing `new_pred`.
pub struct NewPredOutcome {
    pub pred_before: String,
    pub keys_start_before: Id,
    pub new_replicas: Vec<ReplicaMap>,
    pub replication_factor: usize,
    /// `true` when the ring grew past its previous depth (r < K), which
    /// means the caller propagates `inc_replication_factor`; `false` means
    /// it propagates `shift_up_replicas` instead.
    pub grows_replication: bool,
}

/// Step 3 of join: executed by the node responsible for the new node's
/// hash. Mutates `node` in place (new `keys_start`, new `pred`, sequencer
/// reset) and returns what to hand the new node plus what to propagate.
pub fn new_pred(node: &mut NodeState, new_node_url: &str) -> NewPredOutcome {
    let new_id = Id::of(new_node_url);
    let keys_start_before = node.keys_start;
    let pred_before = node.pred_url().to_string();
    let r = node.replication_factor();
    let grows_replication = r < node.max_replication_factor;

    let hand_off = node.hand_off_for_new_pred(new_id);

    let mut new_replicas = Vec::with_capacity(r + 1);
    new_replicas.push(hand_off.clone());
    for i in 1..r {
        new_replicas.push(node.replicas.level(i).cloned().unwrap_or_default());
    }
    if grows_replication {
        let primary = node.replicas.level(0).cloned().unwrap_or_default();
        let remainder: ReplicaMap = primary.into_iter().filter(|(k, _)| !hand_off.contains_key(k)).collect();
        new_replicas.push(remainder);
    }

    node.keys_start = new_id.plus_one();
    node.fingers.set_predecessor(Finger {
        url: new_node_url.to_string(),
        id: new_id,
    });
    node.link.reset();

    // P is itself one hop downstream of the new node now: grow P's own
    // stack the same way `inc_replication_factor` grows every node further
    // down the chain, carving the hand-off range out of P's old primary
    // into P's new level 1. Without this P never reaches r+1 and the ring
    // falls short of `r = min(K, ring_size)`.
    if grows_replication {
        inc_replication_factor_step(node, 1, keys_start_before, new_id);
    } else {
        for key in hand_off.keys() {
            node.replicas.delete(0, key);
        }
    }

    NewPredOutcome {
        pred_before,
        keys_start_before,
        replication_factor: if grows_replication { r + 1 } else { r },
        grows_replication,
        new_replicas,
    }
}

/// Step 4 of join: the new node N builds its own state from `joinResponse`.
/// The finger table holds only the two ring neighbors until the first
/// phase 1/2 rebuild runs (see `finger::FingerTable::rebuild`).
#[allow(clippy::too_many_arguments)]
pub fn accept_join_response(
    url: String,
    pred: String,
    succ: String,
    keys_start: Id,
    keys_end: Id,
    max_replication_factor: usize,
    consistency: ConsistencyMode,
    new_replicas: Vec<ReplicaMap>,
) -> NodeState {
    let id = Id::of(&url);
    let pred_id = Id::of(&pred);
    let succ_id = Id::of(&succ);
    NodeState {
        url,
        id,
        keys_start,
        keys_end,
        max_replication_factor,
        consistency,
        replicas: super::replica::ReplicaStack::from_levels(new_replicas),
        fingers: super::finger::FingerTable::with_neighbors(
            Finger { url: succ, id: succ_id },
            Finger { url: pred, id: pred_id },
        ),
        link: super::sequencer::Sequencer::new(),
        is_bootstrap: false,
    }
}

/// A single hop of `inc_replication_factor`, applied while it is still
/// travelling between the join initiator's immediate successor chain.
/// `distance` starts at 1 and increases by one per hop.
pub fn inc_replication_factor_step(node: &mut NodeState, distance: usize, new_node_start: Id, new_node_end: Id) {
    node.replicas.push_empty_tail();
    node.replicas.shift_right_from(distance);
    node.replicas.partition_level(distance - 1, distance, new_node_start, new_node_end);
}

/// A single hop of `shift_up_replicas`, used instead of
/// `inc_replication_factor` when the ring was already at `K`.
pub fn shift_up_replicas_step(node: &mut NodeState, distance: usize, exclude_start: Id, exclude_end: Id) -> Option<ReplicaMap> {
    node.replicas.shift_up(distance, exclude_start, exclude_end)
}

/// What a departing node reports before clearing its own pred/succ and
/// terminating.
pub struct DepartOutcome {
    pub keys_start: Id,
    pub predecessor_url: String,
    pub successor_url: String,
    pub maxdistance_replica: ReplicaMap,
}

/// Steps 3-4 of depart, computed from the departing node's state. The
/// caller is responsible for steps 1 (lock), 2 (drain wait), and 5
/// (clearing state / terminating) since those touch resources this module
/// has no visibility into.
pub fn depart(node: &NodeState) -> Result<DepartOutcome, CoreError> {
    if node.is_bootstrap {
        return Err(CoreError::BootstrapCannotDepart);
    }
    let tail = node.replication_factor() - 1;
    Ok(DepartOutcome {
        keys_start: node.keys_start,
        predecessor_url: node.pred_url().to_string(),
        successor_url: node.succ_url().to_string(),
        maxdistance_replica: node.replicas.level(tail).cloned().unwrap_or_default(),
    })
}

/// The successor's handling of `departPred`: absorb the departed node's
/// range and fold its own primary set into its second replica level so a
/// following `shift_down_replicas` promotes the absorbed keys to primary.
pub fn depart_pred(node: &mut NodeState, departed_keys_start: Id, departed_pred_url: String) {
    node.keys_start = departed_keys_start;
    let pred_id = Id::of(&departed_pred_url);
    node.fingers.set_predecessor(Finger {
        url: departed_pred_url,
        id: pred_id,
    });
    if node.replication_factor() > 1 {
        let primary = node.replicas.level(0).cloned().unwrap_or_default();
        node.replicas.merge_into(1, primary);
    }
}

/// A single hop of `shift_down_replicas`.
pub fn shift_down_replicas_step(node: &mut NodeState, maxdist_replica: ReplicaMap) {
    node.replicas.shift_down(maxdist_replica);
}

/// A single hop of `dec_replication_factor`, fired only when ring size has
/// dropped below `K` (the conservative reading of the open question).
pub fn dec_replication_factor_step(node: &mut NodeState) {
    node.replicas.pop_tail();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_pred_hands_off_matching_range_and_shrinks_local_primary() {
        let mut node = NodeState::bootstrap("http://p".into(), 3, ConsistencyMode::Linearizable);
        node.replicas.insert(0, "will-move".into(), "v1");
        let new_node_url = "http://n";
        let new_id = Id::of(new_node_url);

        let outcome = new_pred(&mut node, new_node_url);

        assert!(outcome.grows_replication);
        assert_eq!(outcome.replication_factor, 2);
        assert_eq!(node.replicas.len(), 2);
        assert_eq!(node.keys_start, new_id.plus_one());
        assert_eq!(node.pred_url(), new_node_url);
        assert_eq!(node.link.seq_from_prev(), 0);
    }

    #[test]
    fn new_pred_does_not_grow_replication_when_already_at_k() {
        let mut node = NodeState::bootstrap("http://p".into(), 1, ConsistencyMode::Linearizable);
        let outcome = new_pred(&mut node, "http://n");
        assert!(!outcome.grows_replication);
        assert_eq!(outcome.replication_factor, 1);
        assert_eq!(outcome.new_replicas.len(), 1);
    }

    #[test]
    fn accept_join_response_builds_consistent_state() {
        let levels = vec![ReplicaMap::new(), ReplicaMap::new()];
        let node = accept_join_response(
            "http://n".into(),
            "http://p".into(),
            "http://s".into(),
            Id::of("http://p"),
            Id::of("http://n"),
            3,
            ConsistencyMode::Eventual,
            levels,
        );
        assert_eq!(node.pred_url(), "http://p");
        assert_eq!(node.succ_url(), "http://s");
        assert_eq!(node.replication_factor(), 2);
        assert!(!node.is_bootstrap);
    }

    #[test]
    fn inc_replication_factor_step_splits_predecessor_level_by_new_range() {
        let mut node = NodeState::bootstrap("http://p".into(), 5, ConsistencyMode::Linearizable);
        // set up r = 2: level 0 = primary, level 1 = existing replica copy
        node.replicas.push_empty_tail();
        let keep_key = "outside-new-range";
        let move_key = "inside-new-range";
        node.replicas.insert(0, keep_key.into(), "a");
        node.replicas.insert(0, move_key.into(), "b");

        let new_start = Id::of(move_key);
        let new_end = Id::of(move_key);
        inc_replication_factor_step(&mut node, 1, new_start, new_end);

        assert_eq!(node.replication_factor(), 3);
        assert_eq!(node.replicas.get(0, keep_key), Some(&"a".to_string()));
        assert_eq!(node.replicas.get(1, move_key), Some(&"b".to_string()));
    }

    #[test]
    fn depart_rejects_bootstrap() {
        let node = NodeState::bootstrap("http://p".into(), 3, ConsistencyMode::Linearizable);
        let err = depart(&node).unwrap_err();
        assert!(matches!(err, CoreError::BootstrapCannotDepart));
    }

    #[test]
    fn depart_pred_extends_range_and_merges_primary_into_second_level() {
        let mut node = NodeState::bootstrap("http://s".into(), 3, ConsistencyMode::Linearizable);
        node.replicas.push_empty_tail();
        node.replicas.insert(0, "own-primary".into(), "x");
        let departed_start = Id::of("far-away").plus_one();
        depart_pred(&mut node, departed_start, "http://old-pred".into());
        assert_eq!(node.keys_start, departed_start);
        assert_eq!(node.pred_url(), "http://old-pred");
        assert_eq!(node.replicas.get(1, "own-primary"), Some(&"x".to_string()));
    }

    #[test]
    fn shift_down_replicas_step_promotes_absorbed_keys_toward_primary() {
        let mut node = NodeState::bootstrap("http://s".into(), 3, ConsistencyMode::Linearizable);
        node.replicas.push_empty_tail();
        node.replicas.insert(1, "absorbed".into(), "v");
        let mut incoming_tail = ReplicaMap::new();
        incoming_tail.insert("from-departed-tail".into(), "w".into());
        shift_down_replicas_step(&mut node, incoming_tail);
        assert_eq!(node.replicas.get(0, "absorbed"), Some(&"v".to_string()));
    }

    #[test]
    fn dec_replication_factor_step_pops_tail() {
        let mut node = NodeState::bootstrap("http://p".into(), 3, ConsistencyMode::Linearizable);
        node.replicas.push_empty_tail();
        assert_eq!(node.replication_factor(), 2);
        dec_replication_factor_step(&mut node);
        assert_eq!(node.replication_factor(), 1);
    }
}
