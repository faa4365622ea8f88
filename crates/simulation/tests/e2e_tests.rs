//! End-to-end consensus scenarios on the deterministic harness.
//!
//! Four validators, 66/66 thresholds. Scenarios that need Byzantine or
//! partitioned behavior craft ballots directly with validator keypairs
//! and drive a single observer node.

use isaac_ledger::get_block_by_height;
use isaac_simulation::{Simulation, SimulationConfig};
use isaac_types::test_utils::{test_keypair, test_payment};
use isaac_types::{
    calculate_inflation, Amount, Ballot, BallotState, Block, ConsensusConfig, CreateAccount,
    KeyPair, Operation, ProposerTransaction, Transaction, VotingBasis, VotingHole, BASE_FEE,
};
use std::time::Duration;

const STEP: Duration = Duration::from_millis(100);
const MAX_STEPS: usize = 400;

fn sim() -> Simulation {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    Simulation::new(SimulationConfig::default())
}

/// Step the simulation until `cond` holds, asserting it within the cap.
fn run_until(sim: &mut Simulation, what: &str, mut cond: impl FnMut(&Simulation) -> bool) {
    for _ in 0..MAX_STEPS {
        if cond(sim) {
            return;
        }
        sim.run_for(STEP);
    }
    panic!("condition not reached within {MAX_STEPS} steps: {what}");
}

/// A create-account transaction from the genesis account.
fn create_account_tx(
    sim: &Simulation,
    target: &KeyPair,
    amount: u64,
    sequence_id: u64,
) -> Transaction {
    Transaction::new(
        sim.genesis_keypair().address(),
        sequence_id,
        Amount::from(BASE_FEE),
        vec![Operation::CreateAccount(CreateAccount {
            target: target.address(),
            amount: Amount::from(amount),
        })],
    )
    .signed(sim.genesis_keypair(), &sim.consensus_config().network_id)
}

/// Build a correctly shaped INIT ballot for a crafted round.
fn build_init(
    proposer: &KeyPair,
    config: &ConsensusConfig,
    basis: VotingBasis,
    txs: &[Transaction],
) -> Ballot {
    let fee_total = Amount::sum(txs.iter().map(|tx| tx.fee())).unwrap();
    let inflation = if basis.height <= config.end_of_inflation {
        calculate_inflation(config.initial_balance, &config.inflation_ratio).unwrap()
    } else {
        Amount::ZERO
    };
    let ptx = ProposerTransaction::new(
        proposer,
        &config.network_id,
        basis.height,
        fee_total,
        txs.len() as u64,
        inflation,
        config.common_account,
        config.initial_balance,
        &config.inflation_ratio,
    );
    Ballot::new_init(
        basis,
        proposer,
        &config.network_id,
        txs.iter().map(|tx| tx.hash()).collect(),
        ptx,
        "2024-01-01T00:01:00+00:00".to_string(),
    )
}

/// Derive and deliver votes on `init` from the given validators.
fn deliver_votes(
    sim: &mut Simulation,
    observer: usize,
    from: &[usize],
    init: &Ballot,
    state: BallotState,
    vote: VotingHole,
) {
    let network_id = sim.consensus_config().network_id.clone();
    for idx in from {
        let kp = sim.keypair(*idx).clone();
        let ballot = init.derive(state, vote, &kp, &network_id);
        sim.deliver_ballot(observer, &ballot);
    }
    sim.run_for(STEP);
}

/// The keypair of the validator elected to propose `(height, round)`.
fn elected_keypair(sim: &Simulation, height: u64, round: u64) -> KeyPair {
    let elected = sim.elected_proposer(height, round);
    sim.keypair(sim.index_of(&elected)).clone()
}

/// Decode a node's broadcast SIGN/ACCEPT ballots.
fn broadcast_ballots(sim: &Simulation, node: usize) -> Vec<Ballot> {
    sim.broadcasts(node)
        .iter()
        .filter_map(|frame| match isaac_messages::Envelope::from_bytes(frame) {
            Ok(isaac_messages::Envelope::Ballot(gossip)) => Some(gossip.into_ballot()),
            _ => None,
        })
        .collect()
}

// ── Happy path ─────────────────────────────────────────────────────

#[test]
fn happy_path_commits_proposed_transaction() {
    let mut sim = sim();
    let genesis_hash = sim.latest_block(0).hash;
    let tx_a = create_account_tx(&sim, &test_keypair(50), 5_000_000, 0);

    // Every pool holds tx_a before the first proposal goes out.
    for node in 0..sim.node_count() {
        sim.submit_transaction_local(node, &tx_a).unwrap();
    }
    sim.start_all();

    run_until(&mut sim, "all nodes commit height 1", |s| {
        (0..s.node_count()).all(|n| s.latest_block(n).height >= 1)
    });

    for node in 0..sim.node_count() {
        let block = get_block_by_height(sim.store(node), 1).unwrap().unwrap();
        assert_eq!(block.transactions, vec![tx_a.hash()]);
        assert_eq!(block.previous_hash, genesis_hash);
        // tx_a's source is free to submit again.
        assert!(sim
            .pool(node)
            .get_from_source(&tx_a.source())
            .is_none());
        // The decided basis is marked finished.
        let basis = VotingBasis {
            height: 1,
            round: 0,
            block_hash: genesis_hash,
        };
        assert!(sim.consensus(node).isaac().is_finished_round(&basis));
    }
}

// ── Bad proposer transaction ───────────────────────────────────────

#[test]
fn bad_proposer_transaction_is_voted_down() {
    let mut sim = sim();
    let config = sim.consensus_config().clone();
    let genesis_hash = sim.latest_block(0).hash;

    let proposer_kp = elected_keypair(&sim, 1, 0);
    let absent = sim.index_of(&proposer_kp.address());

    let tx_a = create_account_tx(&sim, &test_keypair(50), 5_000_000, 0);
    for node in 0..sim.node_count() {
        if node != absent {
            sim.submit_transaction_local(node, &tx_a).unwrap();
        }
    }
    for node in 0..sim.node_count() {
        if node != absent {
            sim.start_node(node);
        }
    }

    // The proposer claims an inflated inflation amount.
    let basis = VotingBasis {
        height: 1,
        round: 0,
        block_hash: genesis_hash,
    };
    let honest_inflation =
        calculate_inflation(config.initial_balance, &config.inflation_ratio).unwrap();
    let bad_ptx = ProposerTransaction::new(
        &proposer_kp,
        &config.network_id,
        1,
        Amount::from(BASE_FEE),
        1,
        honest_inflation.checked_add(Amount::from(1)).unwrap(),
        config.common_account,
        config.initial_balance,
        &config.inflation_ratio,
    );
    let bad_init = Ballot::new_init(
        basis,
        &proposer_kp,
        &config.network_id,
        vec![tx_a.hash()],
        bad_ptx,
        "2024-01-01T00:01:00+00:00".to_string(),
    );
    for node in 0..sim.node_count() {
        if node != absent {
            sim.deliver_ballot(node, &bad_init);
        }
    }

    let observer = (0..sim.node_count()).find(|n| *n != absent).unwrap();
    run_until(&mut sim, "round advances past the rejected proposal", |s| {
        s.consensus(observer)
            .round_state()
            .is_some_and(|rs| rs.basis.round >= 1 || rs.basis.height > 1)
    });

    // No block was stored for the bad proposal and tx_a survived.
    assert_eq!(sim.latest_block(observer).height, 0);
    assert!(sim.pool(observer).has(&tx_a.hash()));

    // The observer voted NO in SIGN.
    let no_vote = broadcast_ballots(&sim, observer)
        .iter()
        .any(|b| b.state() == BallotState::Sign && b.vote() == VotingHole::No && b.basis() == basis);
    assert!(no_vote, "expected a SIGN/NO broadcast");
}

// ── Missing transaction fetch ──────────────────────────────────────

#[test]
fn missing_transaction_is_fetched_from_proposer() {
    let mut sim = sim();
    let config = sim.consensus_config().clone();
    let genesis_hash = sim.latest_block(0).hash;
    // The observer must not be a proposer for the crafted rounds, or its
    // own organic proposal would race the crafted one.
    let e1 = sim.elected_proposer(1, 0);
    let e2 = sim.elected_proposer(2, 0);
    let observer = (0..sim.node_count())
        .find(|n| sim.address(*n) != e1 && sim.address(*n) != e2)
        .unwrap();
    sim.start_node(observer);

    // Height 1: create a funded account so height 2 can carry two sources.
    let account_x = test_keypair(60);
    let tx_create = create_account_tx(&sim, &account_x, 50_000_000, 0);
    sim.submit_transaction_local(observer, &tx_create).unwrap();

    let init1 = build_init(
        &elected_keypair(&sim, 1, 0),
        &config,
        VotingBasis {
            height: 1,
            round: 0,
            block_hash: genesis_hash,
        },
        std::slice::from_ref(&tx_create),
    );
    let others: Vec<usize> = (0..sim.node_count()).filter(|n| *n != observer).collect();
    sim.deliver_ballot(observer, &init1);
    sim.run_for(STEP);
    deliver_votes(&mut sim, observer, &others, &init1, BallotState::Sign, VotingHole::Yes);
    deliver_votes(&mut sim, observer, &others, &init1, BallotState::Accept, VotingHole::Yes);

    run_until(&mut sim, "setup block commits", |s| {
        s.latest_block(observer).height == 1
    });

    // Height 2: the proposal carries tx_a (pooled) and tx_b (unknown to
    // the observer; held only by the proposer).
    let proposer_kp = elected_keypair(&sim, 2, 0);
    let proposer_node = sim.index_of(&proposer_kp.address());
    let tx_a = create_account_tx(&sim, &test_keypair(61), 5_000_000, 1);
    let tx_b = test_payment(
        &account_x,
        config.common_account,
        1_000,
        0,
        &config.network_id,
    );
    sim.submit_transaction_local(observer, &tx_a).unwrap();
    sim.seed_history(proposer_node, &tx_b);

    let init2 = build_init(
        &proposer_kp,
        &config,
        VotingBasis {
            height: 2,
            round: 0,
            block_hash: sim.latest_block(observer).hash,
        },
        &[tx_a.clone(), tx_b.clone()],
    );
    sim.deliver_ballot(observer, &init2);
    sim.run_for(STEP);

    // The observer fetched tx_b, validated the proposal, and voted YES.
    let yes_vote = broadcast_ballots(&sim, observer).iter().any(|b| {
        b.state() == BallotState::Sign
            && b.vote() == VotingHole::Yes
            && b.basis().height == 2
    });
    assert!(yes_vote, "expected a SIGN/YES broadcast for height 2");

    deliver_votes(&mut sim, observer, &others, &init2, BallotState::Sign, VotingHole::Yes);
    deliver_votes(&mut sim, observer, &others, &init2, BallotState::Accept, VotingHole::Yes);

    run_until(&mut sim, "block with both transactions commits", |s| {
        s.latest_block(observer).height == 2
    });
    let block = get_block_by_height(sim.store(observer), 2).unwrap().unwrap();
    assert_eq!(block.transactions, vec![tx_a.hash(), tx_b.hash()]);
}

// ── Conflicting proposers at one basis ─────────────────────────────

#[test]
fn byzantine_conflicting_proposer_is_voted_down() {
    let mut sim = sim();
    let config = sim.consensus_config().clone();
    let genesis_hash = sim.latest_block(0).hash;

    let elected = sim.elected_proposer(1, 0);
    let byzantine = (0..sim.node_count())
        .map(|n| sim.keypair(n).clone())
        .find(|kp| kp.address() != elected)
        .unwrap();
    let observer = (0..sim.node_count())
        .find(|n| sim.address(*n) != elected && sim.address(*n) != byzantine.address())
        .unwrap();

    sim.start_all();

    let basis = VotingBasis {
        height: 1,
        round: 0,
        block_hash: genesis_hash,
    };
    let forged = build_init(&byzantine, &config, basis, &[]);
    sim.deliver_ballot(observer, &forged);

    run_until(&mut sim, "height 1 commits", |s| {
        s.latest_block(observer).height >= 1
    });

    let ballots = broadcast_ballots(&sim, observer);
    let voted_no_on_forged = ballots.iter().any(|b| {
        b.state() == BallotState::Sign
            && b.proposer() == byzantine.address()
            && b.vote() == VotingHole::No
    });
    let voted_yes_on_elected = ballots.iter().any(|b| {
        b.state() == BallotState::Sign && b.proposer() == elected && b.vote() == VotingHole::Yes
    });
    assert!(voted_no_on_forged, "expected SIGN/NO on the forged proposer");
    assert!(voted_yes_on_elected, "expected SIGN/YES on the elected proposer");

    // The committed block names the elected proposer, and the running
    // round for the contested basis is gone.
    let block = get_block_by_height(sim.store(observer), 1).unwrap().unwrap();
    assert_eq!(block.proposer, elected);
    assert!(!sim.consensus(observer).isaac().has_running_round(&basis));
}

// ── Range sync ─────────────────────────────────────────────────────

#[test]
fn lagging_node_syncs_block_range() {
    let mut sim = sim();
    let lagging = 3;
    sim.isolate(lagging);
    sim.start_all();

    run_until(&mut sim, "peers reach height 3", |s| {
        (0..3).all(|n| s.latest_block(n).height >= 3)
    });
    assert_eq!(sim.latest_block(lagging).height, 0);

    sim.reconnect(lagging);
    run_until(&mut sim, "lagging node catches up", |s| {
        s.latest_block(lagging).height >= 3
    });

    // The catch-up went through the sync path, and the fetched chain
    // matches the peers' chain.
    assert!(!sim.sync_targets(lagging).is_empty());
    for height in 1..=3 {
        let local = get_block_by_height(sim.store(lagging), height)
            .unwrap()
            .unwrap();
        let remote = get_block_by_height(sim.store(0), height).unwrap().unwrap();
        assert_eq!(local.hash, remote.hash);
    }

    // And the node is back in consensus at the next height.
    run_until(&mut sim, "lagging node rejoins consensus", |s| {
        !s.machine(lagging).is_syncing()
    });
    let round = sim.consensus(lagging).round_state().unwrap().basis;
    assert_eq!(round.height, sim.latest_block(lagging).height + 1);
}

// ── Off-by-one fast path ───────────────────────────────────────────

#[test]
fn off_by_one_finalizes_from_cached_ballot_without_fetch() {
    let mut sim = sim();
    let config = sim.consensus_config().clone();
    let genesis_hash = sim.latest_block(0).hash;
    let proposer1 = elected_keypair(&sim, 1, 0);
    let observer = (0..sim.node_count())
        .find(|n| sim.address(*n) != proposer1.address())
        .unwrap();
    sim.start_node(observer);

    // The observer sees the INIT for height 1 (so the proposal payload is
    // cached) and a below-quorum set of ACCEPT/YES ballots.
    let basis1 = VotingBasis {
        height: 1,
        round: 0,
        block_hash: genesis_hash,
    };
    let init1 = build_init(&proposer1, &config, basis1, &[]);
    sim.deliver_ballot(observer, &init1);
    sim.run_for(STEP);

    let reporters: Vec<usize> = (0..sim.node_count())
        .filter(|n| *n != observer && sim.address(*n) != proposer1.address())
        .take(2)
        .collect();
    deliver_votes(
        &mut sim,
        observer,
        &reporters,
        &init1,
        BallotState::Accept,
        VotingHole::Yes,
    );
    assert_eq!(sim.latest_block(observer).height, 0, "no quorum yet");

    // Block 1 is deterministic from the proposal, so the height-2 basis
    // can reference it before the observer stores it.
    let expected_block1 = Block::from_ballot(
        &init1,
        init1.proposer_transaction().unwrap().clone(),
    );

    // An ACCEPT/YES for height 2 arrives: one block ahead of what the
    // observer can decide. Majority height reports point at height 1.
    let proposer2 = elected_keypair(&sim, 2, 0);
    let basis2 = VotingBasis {
        height: 2,
        round: 0,
        block_hash: expected_block1.hash,
    };
    let init2 = build_init(&proposer2, &config, basis2, &[]);
    let network_id = config.network_id.clone();
    let trigger_kp = sim.keypair(reporters[0]).clone();
    let trigger = init2.derive(BallotState::Accept, VotingHole::Yes, &trigger_kp, &network_id);
    sim.deliver_ballot(observer, &trigger);

    run_until(&mut sim, "fast path finalizes height 1", |s| {
        s.latest_block(observer).height == 1
    });

    // Finalized from the cached ballot, not via a range fetch.
    assert!(sim.sync_targets(observer).is_empty());
    assert_eq!(sim.latest_block(observer).hash, expected_block1.hash);

    // The deferred height-2 ballot was re-processed: its vote is tallied
    // in a fresh running round.
    run_until(&mut sim, "deferred ballot creates the next round", |s| {
        s.consensus(observer).isaac().has_running_round(&basis2)
    });
    assert!(!sim.machine(observer).is_syncing());
}
