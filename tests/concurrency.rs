use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{mpsc, Semaphore};

use hoplite::error::{ChannelStateError, Error, LedgerError};
use hoplite::types::LedgerAddress;
use hoplite::{
    BaseLedger, Channel, ChannelNetwork, InMemoryLedger, KeyringSigner, NetworkConfig, Settlement,
    TxId, UpdateMessage, UpdateSigner,
};

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).try_init();
}

/// A transfer that loses a race fails at whichever phase first observes the
/// winner: discovery, reserve, or commit.
fn is_lost_race(err: &Error) -> bool {
    matches!(
        err,
        Error::RouteNotFound(_) | Error::InsufficientFunds(_) | Error::ConcurrencyConflict(_)
    )
}

/// Ledger that parks each settlement until the test releases it, reporting
/// every arrival on a channel.
struct GatedLedger {
    inner: InMemoryLedger,
    reached: mpsc::Sender<()>,
    release: Semaphore,
}

#[async_trait]
impl BaseLedger for GatedLedger {
    async fn post_funding_transaction(
        &self,
        amount: u64,
        custody: &LedgerAddress,
    ) -> std::result::Result<TxId, LedgerError> {
        self.inner.post_funding_transaction(amount, custody).await
    }

    async fn post_settlement_transaction(
        &self,
        settlement: &Settlement,
    ) -> std::result::Result<TxId, LedgerError> {
        self.reached
            .send(())
            .await
            .map_err(|_| LedgerError::Unreachable("gate dropped".into()))?;
        let _permit = self
            .release
            .acquire()
            .await
            .map_err(|_| LedgerError::Unreachable("gate closed".into()))?;
        self.inner.post_settlement_transaction(settlement).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_transfers_exactly_one_wins() -> Result<()> {
    init_tracing();
    let mut keyring = KeyringSigner::new();
    let alice = keyring.generate_party();
    let bob = keyring.generate_party();

    let network =
        Arc::new(ChannelNetwork::new(NetworkConfig::default(), Arc::new(InMemoryLedger::new()))?);
    let id = network.open_channel(&alice, 40, &bob, 10).await?;
    let keyring = Arc::new(keyring);

    // Two 30-unit transfers cannot both fit in alice's 40
    let mut tasks = Vec::new();
    for _ in 0..2 {
        let network = network.clone();
        let keyring = keyring.clone();
        let (from, to) = (alice.id(), bob.id());
        tasks.push(tokio::spawn(async move {
            network.transfer(&from, &to, 30, keyring.as_ref()).await
        }));
    }

    let mut wins = 0;
    for task in tasks {
        match task.await? {
            Ok(receipt) => {
                assert_eq!(receipt.amount, 30);
                wins += 1;
            }
            Err(err) => assert!(is_lost_race(&err), "unexpected failure: {err}"),
        }
    }
    assert_eq!(wins, 1);

    // Only the winner is reflected in the final state
    let state = network.channel_state(&id).await.unwrap();
    assert_eq!(state.balances(), (10, 40));
    assert_eq!(state.sequence_number(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_routes_share_a_channel() -> Result<()> {
    init_tracing();
    let mut keyring = KeyringSigner::new();
    let alice = keyring.generate_party();
    let dave = keyring.generate_party();
    let bob = keyring.generate_party();
    let charlie = keyring.generate_party();

    let network =
        Arc::new(ChannelNetwork::new(NetworkConfig::default(), Arc::new(InMemoryLedger::new()))?);
    let ab = network.open_channel(&alice, 40, &bob, 10).await?;
    let db = network.open_channel(&dave, 40, &bob, 10).await?;
    let bc = network.open_channel(&bob, 30, &charlie, 50).await?;
    let keyring = Arc::new(keyring);

    // Both routes forward through bob-charlie, which can carry 25 only once
    let first = {
        let network = network.clone();
        let keyring = keyring.clone();
        let (from, to) = (alice.id(), charlie.id());
        tokio::spawn(async move { network.transfer(&from, &to, 25, keyring.as_ref()).await })
    };
    let second = {
        let network = network.clone();
        let keyring = keyring.clone();
        let (from, to) = (dave.id(), charlie.id());
        tokio::spawn(async move { network.transfer(&from, &to, 25, keyring.as_ref()).await })
    };

    let first = first.await?;
    let second = second.await?;
    assert_eq!(first.is_ok() as u32 + second.is_ok() as u32, 1, "exactly one transfer wins");
    if let Err(err) = &first {
        assert!(is_lost_race(err), "unexpected failure: {err}");
    }
    if let Err(err) = &second {
        assert!(is_lost_race(err), "unexpected failure: {err}");
    }

    // The shared hop carried exactly one 25-unit payment, and the loser's
    // own channel was left untouched by the rollback.
    let bc_state = network.channel_state(&bc).await.unwrap();
    assert_eq!(bc_state.balances(), (5, 75));
    let (winner_source, loser_source) =
        if first.is_ok() { (ab, db) } else { (db, ab) };
    let winner_state = network.channel_state(&winner_source).await.unwrap();
    let loser_state = network.channel_state(&loser_source).await.unwrap();
    assert_eq!(winner_state.balances(), (15, 35));
    assert_eq!(loser_state.balances(), (40, 10));
    assert_eq!(loser_state.sequence_number(), 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_updates_keep_sequence_monotonic() -> Result<()> {
    init_tracing();
    let mut keyring = KeyringSigner::new();
    let alice = keyring.generate_party();
    let bob = keyring.generate_party();

    let network =
        Arc::new(ChannelNetwork::new(NetworkConfig::default(), Arc::new(InMemoryLedger::new()))?);
    let id = network.open_channel(&alice, 40, &bob, 10).await?;

    // Eight copies of the same sequence-1 update race; the sequence check
    // admits exactly one.
    let signature = keyring.sign_update(&id, 1, &alice.id(), 1).await?;
    let update = UpdateMessage {
        channel_id: id,
        sequence_number: 1,
        from: alice.id(),
        amount: 1,
        signature,
    };

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let network = network.clone();
        let update = update.clone();
        tasks.push(tokio::spawn(async move { network.update_channel(&update).await }));
    }

    let mut accepted = 0;
    for task in tasks {
        match task.await? {
            Ok(()) => accepted += 1,
            Err(err) => {
                assert!(matches!(err, Error::ConcurrencyConflict(_)), "unexpected: {err}")
            }
        }
    }
    assert_eq!(accepted, 1);

    let state = network.channel_state(&id).await.unwrap();
    assert_eq!(state.balances(), (39, 11));
    assert_eq!(state.sequence_number(), 1);

    // The next correctly-numbered update applies cleanly after the race
    let signature = keyring.sign_update(&id, 2, &bob.id(), 4).await?;
    let follow_up = UpdateMessage {
        channel_id: id,
        sequence_number: 2,
        from: bob.id(),
        amount: 4,
        signature,
    };
    network.update_channel(&follow_up).await?;
    let state = network.channel_state(&id).await.unwrap();
    assert_eq!(state.balances(), (43, 7));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_close_racing_transfer_completes() -> Result<()> {
    init_tracing();
    let mut keyring = KeyringSigner::new();
    let alice = keyring.generate_party();
    let bob = keyring.generate_party();
    let charlie = keyring.generate_party();

    let network =
        Arc::new(ChannelNetwork::new(NetworkConfig::default(), Arc::new(InMemoryLedger::new()))?);
    let ab = network.open_channel(&alice, 40, &bob, 10).await?;
    let bc = network.open_channel(&bob, 30, &charlie, 50).await?;
    let keyring = Arc::new(keyring);

    // A close races a multi-hop transfer across the same channel; both must
    // come back, whichever order the locks land in.
    let transfer = {
        let network = network.clone();
        let keyring = keyring.clone();
        let (from, to) = (alice.id(), charlie.id());
        tokio::spawn(async move { network.transfer(&from, &to, 20, keyring.as_ref()).await })
    };
    let closer = {
        let network = network.clone();
        tokio::spawn(async move { network.close_channel(&ab).await })
    };

    let transfer = tokio::time::timeout(Duration::from_secs(5), transfer)
        .await
        .expect("transfer must not wedge")?;
    let settlement = tokio::time::timeout(Duration::from_secs(5), closer)
        .await
        .expect("close must not wedge")??;

    // Conservation holds on the closed channel whether or not the transfer
    // committed first, and the channel is gone either way.
    assert_eq!(settlement.total(), 50);
    assert!(network.channel_state(&ab).await.is_none());

    let bc_state = network.channel_state(&bc).await.unwrap();
    match transfer {
        Ok(receipt) => {
            assert_eq!(receipt.hops.len(), 2);
            assert_eq!(bc_state.balances(), (10, 70));
        }
        Err(err) => {
            // A loser that raced the close may also find the channel closed
            // mid-commit or already deregistered.
            assert!(
                is_lost_race(&err)
                    || matches!(err, Error::ChannelState(_) | Error::Validation(_)),
                "unexpected failure: {err}"
            );
            assert_eq!(bc_state.balances(), (30, 50));
        }
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_closers_settle_once() -> Result<()> {
    init_tracing();
    let mut keyring = KeyringSigner::new();
    let alice = keyring.generate_party();
    let bob = keyring.generate_party();

    let (reached, mut reached_rx) = mpsc::channel(1);
    let ledger = Arc::new(GatedLedger {
        inner: InMemoryLedger::new(),
        reached,
        release: Semaphore::new(0),
    });
    let network = Arc::new(ChannelNetwork::new(NetworkConfig::default(), ledger.clone())?);
    let id = network.open_channel(&alice, 40, &bob, 10).await?;

    // The first closer claims the settlement duty and parks inside the
    // ledger with no channel lock held.
    let first = {
        let network = network.clone();
        tokio::spawn(async move { network.close_channel(&id).await })
    };
    reached_rx.recv().await.expect("first closer reaches the ledger");

    // The second closer must fail without handing the ledger a second payout
    let second = tokio::time::timeout(Duration::from_secs(5), network.close_channel(&id))
        .await
        .expect("second closer must not park inside the ledger");
    assert!(matches!(
        second,
        Err(Error::ChannelState(ChannelStateError::SettlementInFlight { channel }))
            if channel == id
    ));

    ledger.release.add_permits(1);
    let settlement = first.await??;
    assert_eq!(settlement.total(), 50);

    // Exactly one settlement reached the ledger and the collateral paid
    // out exactly once.
    assert_eq!(ledger.inner.settlements().await.len(), 1);
    assert_eq!(ledger.inner.locked().await, 0);
    assert!(network.channel_state(&id).await.is_none());
    Ok(())
}

#[tokio::test]
async fn test_tampered_snapshot_freezes_on_audit() -> Result<()> {
    init_tracing();
    let mut keyring = KeyringSigner::new();
    let alice = keyring.generate_party();
    let bob = keyring.generate_party();
    let channel = Channel::open(&alice, 40, &bob, 10)?;

    // A snapshot whose balances no longer sum to the capacity
    let mut value = serde_json::to_value(&channel)?;
    value["balance_a"] = serde_json::json!(41);
    let mut tampered: Channel = serde_json::from_value(value)?;

    let audit = tampered.audit();
    assert!(matches!(audit, Err(ChannelStateError::ConservationViolation { .. })));
    assert!(tampered.is_frozen());

    // Frozen means inert: no updates, no close, no routing capacity
    let signature = keyring.sign_update(&channel.id(), 1, &alice.id(), 5).await?;
    let update = UpdateMessage {
        channel_id: channel.id(),
        sequence_number: 1,
        from: alice.id(),
        amount: 5,
        signature,
    };
    assert!(matches!(
        tampered.apply_update(&update),
        Err(Error::ChannelState(ChannelStateError::Frozen { .. }))
    ));
    assert!(matches!(tampered.close(), Err(ChannelStateError::Frozen { .. })));
    assert_eq!(tampered.capacity_towards(&alice.id()), 0);
    Ok(())
}
