// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The `Node` actor: the administrative (backstage) half of a ring member.
//! Mirroring the teacher's stage, which splits a raw socket `IoChannel`
//! (data path) from an `UnboundedChannel<StageEvent>` (administrative
//! supervision), a `Node` here polls its `PeerTransport` inbox (data path —
//! chain hops, topology RPCs) alongside an `UnboundedChannel<NodeEvent>`
//! (administrative — shutdown) in the same `run` loop.

pub mod handle;

use crate::app::correlator::Correlator;
use crate::app::lock::TopologyLock;
use crate::app::message::{OperationResponse, OverlayNode, PeerMessage};
use crate::app::transport::PeerTransport;
use crate::core::membership;
use crate::core::pipeline::{self, ModifyOp, Route};
use crate::core::{Admit, ChainPayload, ConsistencyMode, Id, NodeState};
use async_trait::async_trait;
use backstage::core::{
    Actor,
    ActorResult,
    Rt,
    StreamExt,
    SupHandle,
    UnboundedChannel,
};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Administrative events a `Node` reacts to through its backstage channel.
#[backstage::core::supervise]
pub enum NodeEvent {
    /// Graceful depart, driven by the client API's `/api/depart` endpoint.
    /// Carries the reply channel for the refusal/success outcome.
    Depart(tokio::sync::oneshot::Sender<Result<(), String>>),
    #[shutdown]
    Shutdown,
}

/// Static configuration a node is constructed with; mirrors the
/// `NODE_URL`/`BOOTSTRAP_URL`/`IS_BOOTSTRAP`/`CONSISTENCY_MODEL`/
/// `REPLICATION_FACTOR` startup inputs the management surface provides.
pub enum Bootstrap {
    /// This node starts a fresh ring owning the entire keyspace.
    Genesis {
        max_replication_factor: usize,
        consistency: ConsistencyMode,
    },
    /// This node joins an existing ring through `bootstrap_url`.
    Join { bootstrap_url: String },
}

/// A live Chord ring member.
pub struct Node {
    url: String,
    bootstrap: Bootstrap,
    state: Option<NodeState>,
    transport: Arc<dyn PeerTransport>,
    lock: Arc<dyn TopologyLock>,
    correlator: Arc<Correlator>,
    peer_inbox: Option<mpsc::UnboundedReceiver<PeerMessage>>,
    admin: Option<backstage::core::UnboundedHandle<NodeEvent>>,
}

impl Node {
    /// `transport`, `lock`, and `correlator` are dependency-injected rather
    /// than constructed here, so a caller keeps the handles it needs to
    /// build a `NodeHandle` without waiting on `init` to run.
    pub fn new(
        url: String,
        bootstrap: Bootstrap,
        transport: Arc<dyn PeerTransport>,
        lock: Arc<dyn TopologyLock>,
        correlator: Arc<Correlator>,
    ) -> Self {
        Self {
            url,
            bootstrap,
            state: None,
            transport,
            lock,
            correlator,
            peer_inbox: None,
            admin: None,
        }
    }

    /// A client-facing handle, available once `init` has run (the point at
    /// which the actor's own administrative channel exists).
    pub fn client_handle(&self) -> handle::NodeHandle {
        handle::NodeHandle {
            url: self.url.clone(),
            transport: self.transport.clone(),
            correlator: self.correlator.clone(),
            admin: self.admin.clone().expect("client_handle requested before init"),
        }
    }

    fn state(&self) -> &NodeState {
        self.state.as_ref().expect("node state initialized before run")
    }

    fn state_mut(&mut self) -> &mut NodeState {
        self.state.as_mut().expect("node state initialized before run")
    }

    async fn join_ring(&mut self, bootstrap_url: &str) -> anyhow::Result<()> {
        self.transport
            .send(bootstrap_url, PeerMessage::Join { new_node_url: self.url.clone() })
            .await?;
        let inbox = self.peer_inbox.as_mut().expect("peer inbox registered before join");
        loop {
            match inbox.recv().await {
                Some(PeerMessage::JoinResponse {
                    pred,
                    succ,
                    keys_start,
                    keys_end,
                    max_replication_factor,
                    consistency,
                    new_replicas,
                    ..
                }) => {
                    let state = membership::accept_join_response(
                        self.url.clone(),
                        pred,
                        succ.clone(),
                        keys_start,
                        keys_end,
                        max_replication_factor,
                        consistency,
                        new_replicas,
                    );
                    self.state = Some(state);
                    self.trigger_finger_rebuild(succ).await?;
                    return Ok(());
                }
                Some(_) => continue,
                None => anyhow::bail!("peer transport closed before join completed"),
            }
        }
    }

    async fn trigger_finger_rebuild(&self, succ: String) -> anyhow::Result<()> {
        self.transport
            .send(
                &succ,
                PeerMessage::UpdateFingerTablePhase1 {
                    initiator_url: self.url.clone(),
                    ring: vec![self.url.clone()],
                },
            )
            .await
    }

    async fn handle_peer_message(&mut self, message: PeerMessage) -> anyhow::Result<()> {
        match message {
            PeerMessage::Modify { uid, origin_url, distance, seq, op, key, value } => {
                self.handle_modify(uid, origin_url, distance, seq, op, key, value).await?
            }
            PeerMessage::Query { uid, origin_url, distance, seq, key } => {
                self.handle_query(uid, origin_url, distance, seq, key).await?
            }
            PeerMessage::QueryStar { uid, origin_url, accumulator } => {
                self.handle_query_star(uid, origin_url, accumulator).await?
            }
            PeerMessage::Join { new_node_url } => self.handle_join(new_node_url).await?,
            PeerMessage::JoinResponse { .. } => {
                // only expected during `join_ring`; a late or duplicate
                // arrival here is ignored rather than treated as fatal.
            }
            PeerMessage::UpdateSuccInfo { new_node_url } => {
                let id = Id::of(&new_node_url);
                self.state_mut()
                    .fingers
                    .set_successor(crate::core::Finger { url: new_node_url, id });
            }
            PeerMessage::DepartPred { keys_start, predecessor_url, maxdistance_replica } => {
                self.handle_depart_pred(keys_start, predecessor_url, maxdistance_replica).await?
            }
            PeerMessage::ShiftUpReplicas { distance, exclude_start, exclude_end } => {
                self.handle_shift_up(distance, exclude_start, exclude_end).await?
            }
            PeerMessage::ShiftDownReplicas { origin_url, distance, maxdist_replica } => {
                self.handle_shift_down(origin_url, distance, maxdist_replica).await?
            }
            PeerMessage::IncReplicationFactor { distance, new_node_start, new_node_end, initiator_url } => {
                self.handle_inc_replication_factor(distance, new_node_start, new_node_end, initiator_url).await?
            }
            PeerMessage::DecReplicationFactor { initiator_url } => {
                self.handle_dec_replication_factor(initiator_url).await?
            }
            PeerMessage::Overlay { uid, origin_url, mut entries } => self.handle_overlay(uid, origin_url, &mut entries).await?,
            PeerMessage::UpdateFingerTablePhase1 { initiator_url, mut ring } => {
                self.handle_finger_phase1(initiator_url, &mut ring).await?
            }
            PeerMessage::UpdateFingerTablePhase2 { initiator_url, ring } => self.handle_finger_phase2(initiator_url, ring).await?,
            PeerMessage::OperationResp { uid, response } => {
                let _ = self.correlator.resolve(uid, response).await;
            }
            PeerMessage::DebugReplicas { uid } => self.handle_debug_replicas(uid).await?,
        }
        Ok(())
    }

    /// `modify(uid, origin_url, op, key, value)` for a distance-0 arrival:
    /// route away if this node isn't responsible, otherwise apply locally
    /// and begin the chain. A locally originated step carries a null seq
    /// and bypasses reorder gating, since it is the source of the sequence.
    /// Any distance > 0 arrival travelled a real link and is admitted
    /// through that link's sequencer before being applied.
    async fn handle_modify(
        &mut self,
        uid: uuid::Uuid,
        origin_url: String,
        distance: usize,
        seq: Option<u64>,
        op: ModifyOp,
        key: String,
        value: Option<String>,
    ) -> anyhow::Result<()> {
        if distance == 0 {
            match pipeline::route_modify(self.state(), op, &key, value.as_deref()) {
                Ok(Route::Forward { to }) => {
                    return self
                        .transport
                        .send(&to, PeerMessage::Modify { uid, origin_url, distance: 0, seq: None, op, key, value })
                        .await;
                }
                Ok(Route::BeginChain { .. }) => {}
                Ok(Route::AnswerLocally { .. }) => unreachable!("route_modify never answers locally"),
                Err(e) => {
                    return self
                        .transport
                        .send(&origin_url, PeerMessage::OperationResp { uid, response: OperationResponse::Error(e.to_string()) })
                        .await;
                }
            }
            return self.apply_modify_payload(uid, origin_url, distance, op, key, value).await;
        }
        let seq = seq.expect("a forwarded chain hop always carries a sequence number");
        let payload = ChainPayload::Modify { uid, origin_url, distance, op, key, value };
        self.admit_and_apply(seq, payload).await
    }

    /// `query(uid, origin_url, key)` for a distance-0 arrival: EVENTUAL mode
    /// may answer immediately without ever starting a chain; LINEARIZABLE
    /// always chains to the tail. Non-zero distance is a chain continuation
    /// and goes through the same sequencer gating as modify.
    async fn handle_query(&mut self, uid: uuid::Uuid, origin_url: String, distance: usize, seq: Option<u64>, key: String) -> anyhow::Result<()> {
        if distance == 0 {
            match pipeline::route_query(self.state(), &key) {
                Route::AnswerLocally { value } => {
                    return self
                        .transport
                        .send(&origin_url, PeerMessage::OperationResp { uid, response: OperationResponse::Value(value) })
                        .await;
                }
                Route::Forward { to } => {
                    return self
                        .transport
                        .send(&to, PeerMessage::Query { uid, origin_url, distance: 0, seq: None, key })
                        .await;
                }
                Route::BeginChain { .. } => {}
            }
            return self.apply_query_payload(uid, origin_url, distance, key).await;
        }
        let seq = seq.expect("a forwarded chain hop always carries a sequence number");
        let payload = ChainPayload::Query { uid, origin_url, distance, key };
        self.admit_and_apply(seq, payload).await
    }

    /// Runs an inbound chain message through this link's sequencer,
    /// applying it (and anything the admission drains from the reorder
    /// buffer) in `seq` order.
    async fn admit_and_apply(&mut self, seq: u64, payload: ChainPayload) -> anyhow::Result<()> {
        match self.state_mut().link.admit(seq, payload) {
            Admit::Parked => Ok(()),
            Admit::ApplyNow(first, drained) => {
                self.apply_chain_payload(first).await?;
                for payload in drained {
                    self.apply_chain_payload(payload).await?;
                }
                Ok(())
            }
        }
    }

    async fn apply_chain_payload(&mut self, payload: ChainPayload) -> anyhow::Result<()> {
        match payload {
            ChainPayload::Modify { uid, origin_url, distance, op, key, value } => {
                self.apply_modify_payload(uid, origin_url, distance, op, key, value).await
            }
            ChainPayload::Query { uid, origin_url, distance, key } => self.apply_query_payload(uid, origin_url, distance, key).await,
        }
    }

    async fn apply_modify_payload(
        &mut self,
        uid: uuid::Uuid,
        origin_url: String,
        distance: usize,
        op: ModifyOp,
        key: String,
        value: Option<String>,
    ) -> anyhow::Result<()> {
        pipeline::apply_modify_step(self.state_mut(), distance, op, key.clone(), value.clone());
        if pipeline::is_tail_step(self.state(), distance) {
            self.transport
                .send(&origin_url, PeerMessage::OperationResp { uid, response: OperationResponse::Modified })
                .await
        } else {
            let succ = self.state().succ_url().to_string();
            let seq = Some(self.state_mut().link.next_outbound());
            self.transport
                .send(&succ, PeerMessage::Modify { uid, origin_url, distance: distance + 1, seq, op, key, value })
                .await
        }
    }

    async fn apply_query_payload(&mut self, uid: uuid::Uuid, origin_url: String, distance: usize, key: String) -> anyhow::Result<()> {
        if pipeline::is_tail_step(self.state(), distance) {
            let value = self.state().replicas.get(distance, &key).cloned();
            self.transport
                .send(&origin_url, PeerMessage::OperationResp { uid, response: OperationResponse::Value(value) })
                .await
        } else {
            let succ = self.state().succ_url().to_string();
            let seq = Some(self.state_mut().link.next_outbound());
            self.transport
                .send(&succ, PeerMessage::Query { uid, origin_url, distance: distance + 1, seq, key })
                .await
        }
    }

    async fn handle_query_star(&mut self, uid: uuid::Uuid, origin_url: String, accumulator: Vec<(String, String)>) -> anyhow::Result<()> {
        if !accumulator.is_empty() && origin_url == self.url {
            self.transport
                .send(
                    &origin_url,
                    PeerMessage::OperationResp { uid, response: OperationResponse::Dump(accumulator) },
                )
                .await?;
            return Ok(());
        }
        let map: std::collections::HashMap<String, String> = accumulator.into_iter().collect();
        let merged = pipeline::query_star_step(self.state(), map);
        let succ = self.state().succ_url().to_string();
        self.transport
            .send(
                &succ,
                PeerMessage::QueryStar { uid, origin_url, accumulator: merged.into_iter().collect() },
            )
            .await
    }

    async fn handle_join(&mut self, new_node_url: String) -> anyhow::Result<()> {
        let h = Id::of(&new_node_url);
        if !self.state().is_responsible(h) {
            let succ = self.state().succ_url().to_string();
            self.transport.send(&succ, PeerMessage::Join { new_node_url }).await?;
            return Ok(());
        }
        let pred_before = self.state().pred_url().to_string();
        let outcome = membership::new_pred(self.state_mut(), &new_node_url);
        self.transport
            .send(
                &new_node_url,
                PeerMessage::JoinResponse {
                    pred: outcome.pred_before.clone(),
                    succ: self.url.clone(),
                    keys_start: outcome.keys_start_before,
                    keys_end: Id::of(&new_node_url),
                    replication_factor: outcome.replication_factor,
                    max_replication_factor: self.state().max_replication_factor,
                    consistency: self.state().consistency,
                    new_replicas: outcome.new_replicas,
                },
            )
            .await?;
        self.transport
            .send(&pred_before, PeerMessage::UpdateSuccInfo { new_node_url: new_node_url.clone() })
            .await?;
        if outcome.grows_replication {
            self.transport
                .send(
                    self.state().succ_url(),
                    PeerMessage::IncReplicationFactor {
                        distance: 1,
                        new_node_start: outcome.keys_start_before,
                        new_node_end: Id::of(&new_node_url),
                        initiator_url: new_node_url,
                    },
                )
                .await?;
        } else {
            let exclude_start = self.state().keys_start;
            let exclude_end = self.state().keys_end;
            self.transport
                .send(
                    self.state().succ_url(),
                    PeerMessage::ShiftUpReplicas { distance: 0, exclude_start, exclude_end },
                )
                .await?;
        }
        Ok(())
    }

    async fn handle_depart_pred(&mut self, keys_start: Id, predecessor_url: String, maxdistance_replica: crate::core::ReplicaMap) -> anyhow::Result<()> {
        membership::depart_pred(self.state_mut(), keys_start, predecessor_url);
        self.trigger_finger_rebuild(self.state().succ_url().to_string()).await?;
        let succ = self.state().succ_url().to_string();
        self.transport
            .send(
                &succ,
                PeerMessage::ShiftDownReplicas { origin_url: self.url.clone(), distance: 1, maxdist_replica: maxdistance_replica },
            )
            .await
    }

    async fn handle_shift_up(&mut self, distance: usize, exclude_start: Id, exclude_end: Id) -> anyhow::Result<()> {
        let fell_off = membership::shift_up_replicas_step(self.state_mut(), distance, exclude_start, exclude_end);
        if fell_off.is_some() {
            // fell off the tail: nothing further to propagate.
            return Ok(());
        }
        let succ = self.state().succ_url().to_string();
        self.transport
            .send(&succ, PeerMessage::ShiftUpReplicas { distance: distance + 1, exclude_start, exclude_end })
            .await
    }

    /// `distance` doubles as a hop counter here: the initiator sends 1, and
    /// every hop increments it, so by the time the walk returns to the
    /// initiator it equals the current ring size exactly. This avoids
    /// depending on the finger rebuild's asynchronously-cached ring size,
    /// which is not guaranteed to have caught up with this depart yet.
    async fn handle_shift_down(&mut self, origin_url: String, distance: usize, maxdist_replica: crate::core::ReplicaMap) -> anyhow::Result<()> {
        if origin_url == self.url {
            // the walk is back at its initiator: decide whether the ring
            // dropped below K and, if so, kick off dec_replication_factor.
            if distance < self.state().max_replication_factor {
                membership::dec_replication_factor_step(self.state_mut());
                let succ = self.state().succ_url().to_string();
                self.transport
                    .send(&succ, PeerMessage::DecReplicationFactor { initiator_url: self.url.clone() })
                    .await?;
            }
            return Ok(());
        }
        let next_tail = self.state().replicas.level(self.state().replication_factor() - 1).cloned().unwrap_or_default();
        membership::shift_down_replicas_step(self.state_mut(), maxdist_replica);
        let succ = self.state().succ_url().to_string();
        self.transport
            .send(
                &succ,
                PeerMessage::ShiftDownReplicas { origin_url, distance: distance + 1, maxdist_replica: next_tail },
            )
            .await
    }

    async fn handle_inc_replication_factor(&mut self, distance: usize, new_node_start: Id, new_node_end: Id, initiator_url: String) -> anyhow::Result<()> {
        if initiator_url == self.url {
            return Ok(());
        }
        membership::inc_replication_factor_step(self.state_mut(), distance, new_node_start, new_node_end);
        let succ = self.state().succ_url().to_string();
        self.transport
            .send(
                &succ,
                PeerMessage::IncReplicationFactor { distance: distance + 1, new_node_start, new_node_end, initiator_url },
            )
            .await
    }

    async fn handle_dec_replication_factor(&mut self, initiator_url: String) -> anyhow::Result<()> {
        if initiator_url == self.url {
            return Ok(());
        }
        membership::dec_replication_factor_step(self.state_mut());
        let succ = self.state().succ_url().to_string();
        self.transport
            .send(&succ, PeerMessage::DecReplicationFactor { initiator_url })
            .await
    }

    async fn handle_overlay(&mut self, uid: uuid::Uuid, origin_url: String, entries: &mut Vec<OverlayNode>) -> anyhow::Result<()> {
        let entry = pipeline::overlay_entry(self.state());
        if origin_url == self.url && !entries.is_empty() {
            self.transport
                .send(
                    &origin_url,
                    PeerMessage::OperationResp { uid, response: OperationResponse::Overlay(std::mem::take(entries)) },
                )
                .await?;
            return Ok(());
        }
        entries.push(OverlayNode {
            url: entry.url,
            pred: entry.pred,
            succ: entry.succ,
            keys_start: entry.keys_start,
            keys_end: entry.keys_end,
        });
        let succ = self.state().succ_url().to_string();
        self.transport
            .send(&succ, PeerMessage::Overlay { uid, origin_url, entries: std::mem::take(entries) })
            .await
    }

    /// Snapshots this node's own replica stack, one level per entry, level 0
    /// first. Answered locally and immediately; unlike the client operations,
    /// it never forwards, so tests can tell which node actually holds a key
    /// apart from which node answered the client.
    async fn handle_debug_replicas(&mut self, uid: uuid::Uuid) -> anyhow::Result<()> {
        let levels: Vec<Vec<(String, String)>> = self
            .state()
            .replicas
            .levels()
            .iter()
            .map(|level| level.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .collect();
        self.transport
            .send(&self.url, PeerMessage::OperationResp { uid, response: OperationResponse::ReplicaLevels(levels) })
            .await
    }

    async fn handle_finger_phase1(&mut self, initiator_url: String, ring: &mut Vec<String>) -> anyhow::Result<()> {
        if ring.contains(&self.url) {
            // phase 1 has gone all the way around once; start phase 2 with
            // the completed membership list.
            return self
                .transport
                .send(
                    &initiator_url,
                    PeerMessage::UpdateFingerTablePhase2 { initiator_url: initiator_url.clone(), ring: std::mem::take(ring) },
                )
                .await;
        }
        ring.push(self.url.clone());
        let succ = self.state().succ_url().to_string();
        self.transport
            .send(&succ, PeerMessage::UpdateFingerTablePhase1 { initiator_url, ring: std::mem::take(ring) })
            .await
    }

    async fn handle_finger_phase2(&mut self, initiator_url: String, ring: Vec<String>) -> anyhow::Result<()> {
        let rebuilt = crate::core::FingerTable::rebuild(&self.url, &ring);
        self.state_mut().fingers = rebuilt;
        if self.url == initiator_url {
            // the list has made it all the way around a second time.
            return Ok(());
        }
        let succ = self.state().succ_url().to_string();
        self.transport
            .send(&succ, PeerMessage::UpdateFingerTablePhase2 { initiator_url, ring })
            .await
    }

    /// Steps 1-4 of graceful depart, driven by the `NodeEvent::Depart`
    /// administrative event. Step 5 (clearing pred/succ, terminating) is the
    /// caller's job once this returns `Ok(true)`.
    async fn handle_depart(&mut self) -> Result<bool, crate::core::CoreError> {
        if self.state().is_bootstrap {
            return Err(crate::core::CoreError::BootstrapCannotDepart);
        }
        self.lock.acquire().await;
        while !self.state().link.reorder_buffer_is_empty() {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        let outcome = membership::depart(self.state())?;
        let result: anyhow::Result<()> = async {
            self.transport
                .send(&outcome.predecessor_url, PeerMessage::UpdateSuccInfo { new_node_url: outcome.successor_url.clone() })
                .await?;
            self.transport
                .send(
                    &outcome.successor_url,
                    PeerMessage::DepartPred {
                        keys_start: outcome.keys_start,
                        predecessor_url: outcome.predecessor_url.clone(),
                        maxdistance_replica: outcome.maxdistance_replica.clone(),
                    },
                )
                .await
        }
        .await;
        self.transport.deregister(&self.url).await;
        self.lock.release().await;
        if let Err(e) = result {
            log::warn!("{} depart could not notify neighbours: {}", self.url, e);
        }
        Ok(true)
    }
}

#[async_trait]
impl<S> Actor<S> for Node
where
    S: SupHandle<Self>,
{
    type Data = ();
    type Channel = UnboundedChannel<NodeEvent>;

    async fn init(&mut self, rt: &mut Rt<Self, S>) -> ActorResult<Self::Data> {
        log::info!("{} node initializing", self.url);
        self.admin = Some(rt.handle().clone());
        self.peer_inbox = Some(self.transport.register(self.url.clone()).await);
        match &self.bootstrap {
            Bootstrap::Genesis { max_replication_factor, consistency } => {
                self.state = Some(NodeState::bootstrap(self.url.clone(), *max_replication_factor, *consistency));
            }
            Bootstrap::Join { bootstrap_url } => {
                let bootstrap_url = bootstrap_url.clone();
                self.join_ring(&bootstrap_url)
                    .await
                    .map_err(|e| backstage::core::ActorError::exit_msg(e.to_string(), None))?;
            }
        }
        Ok(())
    }

    async fn run(&mut self, rt: &mut Rt<Self, S>, _: Self::Data) -> ActorResult<Self::Data> {
        log::info!("{} node is {}", self.url, rt.service().status());
        let mut peer_inbox = self.peer_inbox.take().expect("peer inbox registered before run");
        loop {
            tokio::select! {
                event = rt.inbox_mut().next() => {
                    match event {
                        Some(NodeEvent::Shutdown) | None => break,
                        Some(NodeEvent::Depart(reply)) => {
                            let outcome = self.handle_depart().await;
                            let departed = matches!(outcome, Ok(true));
                            let _ = reply.send(outcome.map(|_| ()).map_err(|e| e.to_string()));
                            if departed {
                                break;
                            }
                        }
                    }
                }
                message = peer_inbox.recv() => {
                    match message {
                        Some(message) => {
                            if let Err(e) = self.handle_peer_message(message).await {
                                log::warn!("{} failed to handle peer message: {}", self.url, e);
                            }
                        }
                        None => break,
                    }
                }
            }
        }
        self.peer_inbox = Some(peer_inbox);
        log::info!("{} node gracefully shutdown", self.url);
        Ok(())
    }
}
