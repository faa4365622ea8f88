//! The simulation runner.

use isaac_consensus::ConsensusState;
use isaac_core::{Action, Event, StateMachine, TimerId};
use isaac_ledger::{
    apply_synced_block, finish_ballot, get_block_by_height, get_tx_pool, make_genesis,
    preflight_transaction, save_tx_history, save_tx_pool, validate_proposal_transactions,
    validate_transaction, IntakeError,
};
use isaac_messages::{BallotGossip, Envelope, NetworkMessage};
use isaac_mempool::TransactionPool;
use isaac_node::NodeStateMachine;
use isaac_storage::{keys, MemoryBackend, Store};
use isaac_types::test_utils::test_keypair;
use isaac_types::{
    Address, Ballot, Block, ConsensusConfig, Hash, KeyPair, Transaction, ValidatorSet,
    VotingBasis,
};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Base wall-clock offset so proposal timestamps look like real dates.
const SIM_EPOCH: Duration = Duration::from_secs(1_700_000_000);

/// Simulation parameters.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub validators: usize,
    /// One-way network delivery latency.
    pub latency: Duration,
    pub consensus: ConsensusConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            validators: 4,
            latency: Duration::from_millis(50),
            consensus: ConsensusConfig {
                common_account: test_keypair(201).address(),
                ..ConsensusConfig::default()
            },
        }
    }
}

struct Scheduled {
    at: Duration,
    seq: u64,
    node: usize,
    kind: SimEvent,
}

enum SimEvent {
    Machine(Event),
    Frame { data: Vec<u8>, from: Address },
    Timer { id: TimerId, generation: u64 },
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}
impl Eq for Scheduled {}
impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Scheduled {
    // Reversed so the BinaryHeap pops the earliest (time, sequence) first.
    fn cmp(&self, other: &Self) -> Ordering {
        (other.at, other.seq).cmp(&(self.at, self.seq))
    }
}

struct SimNode {
    machine: NodeStateMachine,
    store: Store,
    started: bool,
    timer_generation: HashMap<TimerId, u64>,
    committed: Vec<Block>,
    broadcasts: Vec<Vec<u8>>,
    sync_targets: Vec<u64>,
    acks: Vec<(Hash, bool, Option<String>)>,
}

/// A deterministic in-memory network of validator nodes.
pub struct Simulation {
    config: SimulationConfig,
    keypairs: Vec<KeyPair>,
    genesis_keypair: KeyPair,
    nodes: Vec<SimNode>,
    queue: BinaryHeap<Scheduled>,
    now: Duration,
    seq: u64,
    /// Blocked directed links `(from, to)`.
    blocked: HashSet<(usize, usize)>,
}

impl Simulation {
    pub fn new(config: SimulationConfig) -> Self {
        let keypairs: Vec<KeyPair> = (0..config.validators)
            .map(|i| test_keypair(i as u8 + 1))
            .collect();
        let genesis_keypair = test_keypair(200);
        let validators = ValidatorSet::new(keypairs.iter().map(|kp| kp.address()).collect());

        let nodes = keypairs
            .iter()
            .map(|kp| {
                let store = Store::new(Arc::new(MemoryBackend::new()));
                let genesis = make_genesis(
                    &store,
                    &config.consensus,
                    genesis_keypair.address(),
                    "2024-01-01T00:00:00+00:00".to_string(),
                )
                .expect("genesis");
                SimNode {
                    machine: NodeStateMachine::new(
                        kp.clone(),
                        validators.clone(),
                        config.consensus.clone(),
                        genesis,
                    ),
                    store,
                    started: false,
                    timer_generation: HashMap::new(),
                    committed: Vec::new(),
                    broadcasts: Vec::new(),
                    sync_targets: Vec::new(),
                    acks: Vec::new(),
                }
            })
            .collect();

        Simulation {
            config,
            keypairs,
            genesis_keypair,
            nodes,
            queue: BinaryHeap::new(),
            now: Duration::ZERO,
            seq: 0,
            blocked: HashSet::new(),
        }
    }

    // ── Accessors ──────────────────────────────────────────────────────

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn keypair(&self, node: usize) -> &KeyPair {
        &self.keypairs[node]
    }

    pub fn genesis_keypair(&self) -> &KeyPair {
        &self.genesis_keypair
    }

    pub fn address(&self, node: usize) -> Address {
        self.keypairs[node].address()
    }

    pub fn consensus_config(&self) -> &ConsensusConfig {
        &self.config.consensus
    }

    pub fn machine(&self, node: usize) -> &NodeStateMachine {
        &self.nodes[node].machine
    }

    pub fn consensus(&self, node: usize) -> &ConsensusState {
        self.nodes[node].machine.consensus()
    }

    pub fn pool(&self, node: usize) -> &TransactionPool {
        self.nodes[node].machine.pool()
    }

    pub fn latest_block(&self, node: usize) -> &Block {
        self.nodes[node].machine.latest_block()
    }

    pub fn store(&self, node: usize) -> &Store {
        &self.nodes[node].store
    }

    /// Blocks this node committed or applied, in order.
    pub fn committed(&self, node: usize) -> &[Block] {
        &self.nodes[node].committed
    }

    /// Raw frames this node broadcast, in order.
    pub fn broadcasts(&self, node: usize) -> &[Vec<u8>] {
        &self.nodes[node].broadcasts
    }

    /// Sync targets this node started fetching.
    pub fn sync_targets(&self, node: usize) -> &[u64] {
        &self.nodes[node].sync_targets
    }

    pub fn acks(&self, node: usize) -> &[(Hash, bool, Option<String>)] {
        &self.nodes[node].acks
    }

    /// The proposer every honest node elects for `(height, round)`.
    pub fn elected_proposer(&self, height: u64, round: u64) -> Address {
        self.nodes[0]
            .machine
            .consensus()
            .isaac()
            .select_proposer(height, round)
    }

    /// Node index of an address.
    pub fn index_of(&self, address: &Address) -> usize {
        self.keypairs
            .iter()
            .position(|kp| kp.address() == *address)
            .expect("address is a validator")
    }

    // ── Topology control ───────────────────────────────────────────────

    pub fn block_link(&mut self, from: usize, to: usize) {
        self.blocked.insert((from, to));
    }

    pub fn unblock_link(&mut self, from: usize, to: usize) {
        self.blocked.remove(&(from, to));
    }

    /// Cut every link to and from `node`.
    pub fn isolate(&mut self, node: usize) {
        for other in 0..self.nodes.len() {
            if other != node {
                self.blocked.insert((node, other));
                self.blocked.insert((other, node));
            }
        }
    }

    /// Restore every link to and from `node`.
    pub fn reconnect(&mut self, node: usize) {
        self.blocked
            .retain(|(from, to)| *from != node && *to != node);
    }

    // ── Driving ────────────────────────────────────────────────────────

    /// Start consensus on every node.
    pub fn start_all(&mut self) {
        for node in 0..self.nodes.len() {
            self.start_node(node);
        }
    }

    /// Start consensus on one node.
    pub fn start_node(&mut self, node: usize) {
        if self.nodes[node].started {
            return;
        }
        self.nodes[node].started = true;
        self.nodes[node].machine.set_now(SIM_EPOCH + self.now);
        let actions = self.nodes[node].machine.start();
        self.execute(node, actions, false);
    }

    /// Submit a client transaction to `node`, with gossip.
    pub fn submit_transaction(
        &mut self,
        node: usize,
        transaction: &Transaction,
    ) -> Result<Hash, IntakeError> {
        preflight_transaction(
            &self.nodes[node].store,
            transaction,
            &self.config.consensus.network_id,
        )?;
        let hash = transaction.hash();
        self.schedule(
            node,
            SimEvent::Machine(Event::ClientTransactionSubmitted {
                transaction: transaction.clone(),
            }),
            self.now,
        );
        Ok(hash)
    }

    /// Submit a transaction to `node` only, suppressing gossip. Used to
    /// set up scenarios where one validator holds a body its peers lack.
    pub fn submit_transaction_local(
        &mut self,
        node: usize,
        transaction: &Transaction,
    ) -> Result<Hash, IntakeError> {
        preflight_transaction(
            &self.nodes[node].store,
            transaction,
            &self.config.consensus.network_id,
        )?;
        let hash = transaction.hash();
        self.nodes[node].machine.set_now(SIM_EPOCH + self.now);
        let actions = self
            .nodes[node]
            .machine
            .handle(Event::ClientTransactionSubmitted {
                transaction: transaction.clone(),
            });
        self.execute(node, actions, true);
        Ok(hash)
    }

    /// Plant a transaction body in a node's history store without intake
    /// checks, standing in for a peer that accepted it long ago.
    pub fn seed_history(&mut self, node: usize, transaction: &Transaction) {
        let _ = save_tx_history(&self.nodes[node].store, transaction);
    }

    /// Deliver a crafted ballot to one node.
    pub fn deliver_ballot(&mut self, node: usize, ballot: &Ballot) {
        let data = BallotGossip::new(ballot.clone()).to_bytes();
        self.schedule(
            node,
            SimEvent::Machine(Event::BallotReceived { data }),
            self.now,
        );
    }

    /// Process the queue for `duration` of virtual time.
    pub fn run_for(&mut self, duration: Duration) {
        let deadline = self.now + duration;
        while let Some(next) = self.queue.peek() {
            if next.at > deadline {
                break;
            }
            let Scheduled { at, node, kind, .. } = self.queue.pop().expect("peeked");
            if at > self.now {
                self.now = at;
            }
            self.process(node, kind);
        }
        self.now = deadline;
    }

    // ── Internals ──────────────────────────────────────────────────────

    fn schedule(&mut self, node: usize, kind: SimEvent, at: Duration) {
        let seq = self.seq;
        self.seq += 1;
        self.queue.push(Scheduled {
            at,
            seq,
            node,
            kind,
        });
    }

    fn process(&mut self, node: usize, kind: SimEvent) {
        match kind {
            SimEvent::Timer { id, generation } => {
                if self.nodes[node].timer_generation.get(&id).copied() != Some(generation) {
                    return;
                }
                let event = match id {
                    TimerId::Sign => Event::SignTimer,
                    TimerId::Accept => Event::AcceptTimer,
                };
                self.dispatch(node, event);
            }
            SimEvent::Frame { data, from } => match Envelope::from_bytes(&data) {
                Ok(Envelope::Ballot(gossip)) => {
                    self.dispatch(
                        node,
                        Event::BallotReceived {
                            data: gossip.to_bytes(),
                        },
                    );
                }
                Ok(Envelope::Transaction(gossip)) => {
                    let transaction = gossip.into_transaction();
                    if preflight_transaction(
                        &self.nodes[node].store,
                        &transaction,
                        &self.config.consensus.network_id,
                    )
                    .is_ok()
                    {
                        self.dispatch(node, Event::TransactionReceived { transaction, from });
                    }
                }
                Err(_) => {}
            },
            SimEvent::Machine(event) => self.dispatch(node, event),
        }
    }

    fn dispatch(&mut self, node: usize, event: Event) {
        if !self.nodes[node].started {
            return;
        }
        trace!(node, event = event.type_name(), at = ?self.now, "dispatch");
        self.nodes[node].machine.set_now(SIM_EPOCH + self.now);
        let actions = self.nodes[node].machine.handle(event);
        self.execute(node, actions, false);
    }

    fn execute(&mut self, node: usize, actions: Vec<Action>, suppress_broadcast: bool) {
        for action in actions {
            match action {
                Action::Broadcast { message, exclude } => {
                    if suppress_broadcast {
                        continue;
                    }
                    let frame = message.to_bytes();
                    self.nodes[node].broadcasts.push(frame.clone());
                    let from = self.address(node);
                    for peer in 0..self.nodes.len() {
                        if peer == node
                            || exclude == Some(self.address(peer))
                            || self.blocked.contains(&(node, peer))
                        {
                            continue;
                        }
                        let at = self.now + self.config.latency;
                        self.schedule(
                            peer,
                            SimEvent::Frame {
                                data: frame.clone(),
                                from,
                            },
                            at,
                        );
                    }
                }

                Action::SetTimer { id, duration } => {
                    let generation = self.bump_timer(node, id);
                    let at = self.now + duration;
                    self.schedule(node, SimEvent::Timer { id, generation }, at);
                }
                Action::CancelTimer { id } => {
                    self.bump_timer(node, id);
                }

                Action::ResolveProposal {
                    basis,
                    proposer,
                    transactions,
                    pooled,
                } => {
                    let event = self.resolve_proposal(node, basis, proposer, transactions, pooled);
                    let at = self.now + self.config.latency;
                    self.schedule(node, SimEvent::Machine(event), at);
                }

                Action::FinalizeBlock {
                    ballot,
                    proposer_transaction,
                    pooled,
                } => {
                    let basis = ballot.basis();
                    let event = match finish_ballot(
                        &self.nodes[node].store,
                        &ballot,
                        &proposer_transaction,
                        &pooled,
                        &self.config.consensus,
                    ) {
                        Ok(outcome) => Event::BlockApplied {
                            block: outcome.block,
                            updated_sources: outcome.updated_sources,
                        },
                        Err(e) => Event::BlockApplyFailed {
                            basis,
                            reason: e.to_string(),
                        },
                    };
                    self.schedule(node, SimEvent::Machine(event), self.now);
                }

                Action::RevalidatePooled { transactions } => {
                    let invalid: Vec<Hash> = transactions
                        .iter()
                        .filter(|tx| validate_transaction(&self.nodes[node].store, tx).is_err())
                        .map(|tx| tx.hash())
                        .collect();
                    if !invalid.is_empty() {
                        self.schedule(
                            node,
                            SimEvent::Machine(Event::PooledInvalidated { hashes: invalid }),
                            self.now,
                        );
                    }
                }

                Action::StartSync { target, validators } => {
                    self.nodes[node].sync_targets.push(target);
                    self.run_sync(node, target, validators);
                }

                Action::PersistTransaction { transaction } => {
                    let _ = save_tx_history(&self.nodes[node].store, &transaction);
                }

                Action::EmitCommittedBlock { block } => {
                    self.nodes[node].committed.push(block);
                }

                Action::ClientResponse {
                    tx_hash,
                    accepted,
                    reason,
                } => {
                    self.nodes[node].acks.push((tx_hash, accepted, reason));
                }
            }
        }
    }

    fn bump_timer(&mut self, node: usize, id: TimerId) -> u64 {
        let entry = self.nodes[node].timer_generation.entry(id).or_insert(0);
        *entry += 1;
        *entry
    }

    /// The harness stands in for the runner's fetch worker: missing bodies
    /// are read from the proposer's stores, the whole set is validated,
    /// and fetched bodies are staged into the local persistent pool.
    fn resolve_proposal(
        &mut self,
        node: usize,
        basis: VotingBasis,
        proposer: Address,
        tx_hashes: Vec<Hash>,
        pooled: Vec<Transaction>,
    ) -> Event {
        let network_id = self.config.consensus.network_id.clone();
        let store = self.nodes[node].store.clone();
        let proposer_idx = self.index_of(&proposer);
        let link_ok = !self.blocked.contains(&(node, proposer_idx))
            && !self.blocked.contains(&(proposer_idx, node));
        let proposer_store = self.nodes[proposer_idx].store.clone();

        let result = (|| -> Result<usize, String> {
            let mut bodies: HashMap<Hash, Transaction> =
                pooled.into_iter().map(|tx| (tx.hash(), tx)).collect();
            let mut fetched = Vec::new();
            for hash in &tx_hashes {
                if bodies.contains_key(hash) {
                    continue;
                }
                if let Some(tx) = get_tx_pool(&store, hash).map_err(|e| e.to_string())? {
                    bodies.insert(*hash, tx);
                    continue;
                }
                if !link_ok {
                    return Err("proposer unreachable".into());
                }
                let tx = lookup_transaction(&proposer_store, hash)
                    .ok_or_else(|| format!("transaction {hash:?} not found at proposer"))?;
                tx.well_formed(&network_id).map_err(|e| e.to_string())?;
                bodies.insert(*hash, tx.clone());
                fetched.push(tx);
            }

            validate_proposal_transactions(&store, &tx_hashes, &bodies, &network_id)
                .map_err(|e| e.to_string())?;

            if !fetched.is_empty() {
                let mut batch = store.open_batch();
                for tx in &fetched {
                    save_tx_pool(&mut batch, tx).map_err(|e| e.to_string())?;
                }
                batch.commit().map_err(|e| e.to_string())?;
            }
            Ok(fetched.len())
        })();

        match result {
            Ok(_) => Event::ProposalResolved {
                basis,
                proposer,
                valid: true,
                reason: None,
            },
            Err(reason) => Event::ProposalResolved {
                basis,
                proposer,
                valid: false,
                reason: Some(reason),
            },
        }
    }

    /// The harness stands in for the sync worker: blocks are read from
    /// whichever reported peer can serve them and applied through the
    /// ledger's sync commit path.
    fn run_sync(&mut self, node: usize, target: u64, validators: Vec<Address>) {
        let store = self.nodes[node].store.clone();
        let config = self.config.consensus.clone();
        let peer_stores: Vec<(usize, Store)> = validators
            .iter()
            .filter_map(|addr| {
                let idx = self.index_of(addr);
                let reachable = !self.blocked.contains(&(idx, node))
                    && !self.blocked.contains(&(node, idx));
                (idx != node && reachable).then(|| (idx, self.nodes[idx].store.clone()))
            })
            .collect();

        let mut latest = self.latest_block(node).clone();
        let mut delay = self.config.latency;
        let mut height = latest.height + 1;
        while height <= target {
            let served = peer_stores.iter().find_map(|(_, peer_store)| {
                let block = get_block_by_height(peer_store, height).ok().flatten()?;
                let transactions = block
                    .transactions
                    .iter()
                    .filter_map(|hash| lookup_transaction(peer_store, hash))
                    .collect::<Vec<_>>();
                Some((block, transactions))
            });
            let Some((block, transactions)) = served else {
                self.schedule(
                    node,
                    SimEvent::Machine(Event::SyncFailed {
                        target,
                        reason: format!("no peer could serve block {height}"),
                    }),
                    self.now + delay,
                );
                return;
            };
            match apply_synced_block(&store, &latest, &block, &transactions, &config) {
                Ok(outcome) => {
                    latest = outcome.block.clone();
                    self.schedule(
                        node,
                        SimEvent::Machine(Event::SyncBlockApplied {
                            block: outcome.block,
                        }),
                        self.now + delay,
                    );
                    delay += self.config.latency;
                    height += 1;
                }
                Err(e) => {
                    self.schedule(
                        node,
                        SimEvent::Machine(Event::SyncFailed {
                            target,
                            reason: e.to_string(),
                        }),
                        self.now + delay,
                    );
                    return;
                }
            }
        }
        self.schedule(
            node,
            SimEvent::Machine(Event::SyncCompleted { target }),
            self.now + delay,
        );
    }
}

/// Look a transaction up in a node's history, then its persistent pool.
fn lookup_transaction(store: &Store, hash: &Hash) -> Option<Transaction> {
    use isaac_storage::KvRead;
    store
        .get_json(&keys::tx_history_key(&hash.to_hex()))
        .ok()
        .flatten()
        .or_else(|| get_tx_pool(store, hash).ok().flatten())
}
