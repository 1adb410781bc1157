//! Withdrawal pipeline against the in-memory ledger.

use alloy::primitives::{Address, U256};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::SecretString;
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use cadence::config::AppConfig;
use cadence::engine::{Engine, ScriptedRandom};
use cadence::ledger::{native_to_wei, AccountRegistry, EndpointSelector, LedgerError};
use cadence::types::{SubmissionStage, WithdrawalError, WithdrawalRequest};
use cadence::withdrawal::{WithdrawalPipeline, WithdrawalPolicy};

use crate::mock_ledger::{FailPoint, MockConnector, MockLedger};

const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
const DEV_ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

struct Harness {
    engine: Arc<Engine>,
    registry: Arc<AccountRegistry>,
    pipeline: Arc<WithdrawalPipeline>,
    /// Earnings booked before any withdrawal.
    seeded: f64,
}

fn destination() -> Address {
    Address::repeat_byte(0x42)
}

fn harness(connector: MockConnector, urls: &[&str], key: Option<&str>) -> Harness {
    let mut cfg = AppConfig::default();
    cfg.treasury.fee_recipient = Some(destination().to_string());

    let engine = Arc::new(Engine::from_config(&cfg));
    // One pulse at draw 0.5 books 100 × 0.0035 × 3450 = 1207.5.
    engine.trigger_pulse(&mut ScriptedRandom::constant(0.5));
    let seeded = engine.snapshot().total_earned;

    let selector = EndpointSelector::new(
        urls.iter().map(|u| u.to_string()).collect(),
        cfg.ledger.network_id,
        Duration::from_secs(1),
        Arc::new(connector),
    );
    let registry = Arc::new(AccountRegistry::new(
        selector,
        key.map(|k| SecretString::new(k.to_string())),
        Duration::from_secs(1),
    ));
    let pipeline = Arc::new(WithdrawalPipeline::new(
        Arc::clone(&engine),
        Arc::clone(&registry),
        WithdrawalPolicy::from_config(&cfg).unwrap(),
    ));
    Harness {
        engine,
        registry,
        pipeline,
        seeded,
    }
}

fn funded(balance: Decimal) -> (Harness, MockLedger) {
    let ledger = MockLedger::new(balance);
    let connector = MockConnector::default().with("https://primary", ledger.clone());
    (harness(connector, &["https://primary"], Some(DEV_KEY)), ledger)
}

fn request(amount: Decimal) -> WithdrawalRequest {
    WithdrawalRequest {
        destination: destination(),
        amount,
    }
}

fn earned(h: &Harness) -> f64 {
    h.engine.snapshot().total_earned
}

// ---------------------------------------------------------------------------
// Balance gates
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_insufficient_funds_reports_max_withdrawable() {
    let (h, ledger) = funded(dec!(0.02));

    let err = h.pipeline.withdraw(request(dec!(0.05))).await.unwrap_err();
    match &err {
        WithdrawalError::InsufficientFunds { requested, context } => {
            assert_eq!(*requested, dec!(0.05));
            assert_eq!(context.current_balance, dec!(0.02));
            assert_eq!(context.min_required, dec!(0.01));
            assert_eq!(context.gas_reserve, dec!(0.003));
            assert_eq!(context.max_withdrawable, dec!(0.017));
            assert_eq!(context.treasury_wallet, DEV_ADDRESS);
        }
        other => panic!("expected InsufficientFunds, got {other:?}"),
    }
    assert!(err.is_client_error());
    assert!(ledger.broadcasts().is_empty());
    assert_eq!(earned(&h), h.seeded);
}

#[tokio::test]
async fn test_gas_reserve_gate_comes_first() {
    let (h, ledger) = funded(dec!(0.005));

    for amount in [dec!(0.001), dec!(10)] {
        let err = h.pipeline.withdraw(request(amount)).await.unwrap_err();
        match err {
            WithdrawalError::InsufficientGasReserve(context) => {
                assert_eq!(context.current_balance, dec!(0.005));
                assert_eq!(context.min_required, dec!(0.01));
                assert_eq!(context.max_withdrawable, dec!(0.002));
            }
            other => panic!("expected InsufficientGasReserve, got {other:?}"),
        }
    }
    assert!(ledger.issued_nonces().is_empty());
    assert_eq!(earned(&h), h.seeded);
}

#[tokio::test]
async fn test_exact_boundary_succeeds() {
    // B = A + R exactly.
    let (h, ledger) = funded(dec!(0.053));
    let receipt = h.pipeline.withdraw(request(dec!(0.05))).await.unwrap();
    assert!(receipt.success);
    assert_eq!(ledger.broadcasts().len(), 1);
}

// ---------------------------------------------------------------------------
// Successful submission
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_successful_withdrawal_builds_transfer_and_reconciles() {
    let (h, ledger) = funded(dec!(1));

    let receipt = h.pipeline.withdraw(request(dec!(0.25))).await.unwrap();

    let sent = ledger.broadcasts();
    assert_eq!(sent.len(), 1);
    let tx = &sent[0];
    assert_eq!(tx.nonce, 5);
    assert_eq!(tx.to, Some(destination()));
    assert_eq!(tx.value, native_to_wei(dec!(0.25)).unwrap());
    assert_eq!(tx.gas_limit, 21_000);
    assert_eq!(tx.gas_price, Some(30_000_000_000));
    assert_eq!(tx.chain_id, Some(1));

    assert!(receipt.success);
    assert_eq!(receipt.transaction_id, tx.hash.to_string());
    assert_eq!(receipt.from, DEV_ADDRESS);
    assert_eq!(receipt.to, destination().to_checksum(None));
    assert_eq!(receipt.amount, dec!(0.25));
    assert_eq!(receipt.block_reference, 19_000_001);
    assert_eq!(receipt.explorer_url, format!("https://etherscan.io/tx/{}", tx.hash));

    // 0.25 × 3450 = 862.5 deducted.
    let snap = h.engine.snapshot();
    assert!((snap.total_earned - (h.seeded - 862.5)).abs() < 1e-9);
    assert!((snap.withdrawn_value - 862.5).abs() < 1e-9);
}

#[tokio::test]
async fn test_reconciliation_clamps_at_zero() {
    let (h, _ledger) = funded(dec!(5));
    // 1 × 3450 exceeds the seeded earnings.
    h.pipeline.withdraw(request(dec!(1))).await.unwrap();
    assert_eq!(earned(&h), 0.0);
}

#[tokio::test]
async fn test_fee_quote_failure_uses_fallback_rate() {
    let (h, ledger) = funded(dec!(1));
    ledger.fail(FailPoint::GasPrice);

    h.pipeline.withdraw(request(dec!(0.1))).await.unwrap();
    assert_eq!(ledger.broadcasts()[0].gas_price, Some(25_000_000_000));
}

#[tokio::test]
async fn test_json_body_defaults_to_fee_recipient() {
    let (h, ledger) = funded(dec!(1));
    let receipt = h.pipeline.withdraw_json(&json!({ "amountETH": "0.1" })).await.unwrap();
    assert_eq!(receipt.to, destination().to_checksum(None));
    assert_eq!(ledger.broadcasts()[0].to, Some(destination()));
}

#[tokio::test]
async fn test_sequential_withdrawals_advance_nonce() {
    let (h, ledger) = funded(dec!(1));
    h.pipeline.withdraw(request(dec!(0.1))).await.unwrap();
    h.pipeline.withdraw(request(dec!(0.1))).await.unwrap();

    let nonces: Vec<u64> = ledger.broadcasts().iter().map(|b| b.nonce).collect();
    assert_eq!(nonces, vec![5, 6]);
}

#[tokio::test]
async fn test_concurrent_withdrawals_never_reuse_nonce() {
    let (h, ledger) = funded(dec!(10));

    let mut handles = Vec::new();
    for _ in 0..6 {
        let pipeline = Arc::clone(&h.pipeline);
        handles.push(tokio::spawn(async move { pipeline.withdraw(request(dec!(0.1))).await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let mut nonces: Vec<u64> = ledger.broadcasts().iter().map(|b| b.nonce).collect();
    nonces.sort_unstable();
    assert_eq!(nonces, vec![5, 6, 7, 8, 9, 10]);
    assert_eq!(ledger.issued_nonces().len(), 6);
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_invalid_requests_touch_nothing() {
    let (h, ledger) = funded(dec!(1));

    for body in [
        json!({ "to": "0xnope", "amount": 0.1 }),
        json!({ "to": DEV_ADDRESS, "amount": -0.1 }),
        json!({ "to": DEV_ADDRESS, "amount": "ten" }),
        json!({ "to": DEV_ADDRESS }),
    ] {
        let err = h.pipeline.withdraw_json(&body).await.unwrap_err();
        assert!(matches!(err, WithdrawalError::InvalidRequest(_)), "{body}");
        assert!(err.balance_context().is_none());
    }

    assert!(h.registry.current().is_none());
    assert!(ledger.broadcasts().is_empty());
    assert_eq!(earned(&h), h.seeded);
}

#[tokio::test]
async fn test_missing_key_is_account_unavailable() {
    let connector = MockConnector::default().with("https://primary", MockLedger::new(dec!(1)));
    let h = harness(connector, &["https://primary"], None);

    let err = h.pipeline.withdraw(request(dec!(0.1))).await.unwrap_err();
    assert!(matches!(err, WithdrawalError::AccountUnavailable(LedgerError::NotConfigured)));
    assert_eq!(err.code(), "NOT_CONFIGURED");
    assert!(!err.is_client_error());
}

#[tokio::test]
async fn test_no_reachable_endpoint_is_account_unavailable() {
    let down = MockLedger::new(dec!(1));
    down.fail(FailPoint::Probe);
    let connector = MockConnector::default().with("https://a", down);
    let h = harness(connector, &["https://a", "https://b"], Some(DEV_KEY));

    let err = h.pipeline.withdraw(request(dec!(0.1))).await.unwrap_err();
    assert!(matches!(
        err,
        WithdrawalError::AccountUnavailable(LedgerError::NoReachableEndpoint { attempted: 2 })
    ));
    assert_eq!(earned(&h), h.seeded);
}

#[tokio::test]
async fn test_wrong_chain_endpoint_is_skipped() {
    let sepolia = MockLedger::new(dec!(1)).with_chain_id(11_155_111);
    let mainnet = MockLedger::new(dec!(1));
    let connector = MockConnector::default()
        .with("https://sepolia", sepolia.clone())
        .with("https://mainnet", mainnet.clone());
    let h = harness(connector, &["https://sepolia", "https://mainnet"], Some(DEV_KEY));

    h.pipeline.withdraw(request(dec!(0.1))).await.unwrap();
    assert!(sepolia.broadcasts().is_empty());
    assert_eq!(mainnet.broadcasts().len(), 1);
}

#[tokio::test]
async fn test_broadcast_failure_does_not_reconcile() {
    let (h, ledger) = funded(dec!(1));
    ledger.fail(FailPoint::Broadcast);

    let err = h.pipeline.withdraw(request(dec!(0.1))).await.unwrap_err();
    match &err {
        WithdrawalError::Submission { stage, tx_hash, context, .. } => {
            assert_eq!(*stage, SubmissionStage::Broadcast);
            assert!(tx_hash.is_some());
            assert_eq!(context.current_balance, dec!(1));
        }
        other => panic!("expected Submission, got {other:?}"),
    }
    assert_eq!(err.code(), "SUBMISSION_FAILURE");
    assert_eq!(earned(&h), h.seeded);

    // The caller may retry; the same nonce is still pending.
    ledger.clear_failures();
    h.pipeline.withdraw(request(dec!(0.1))).await.unwrap();
    assert_eq!(ledger.broadcasts()[0].nonce, 5);
}

#[tokio::test]
async fn test_confirmation_failure_carries_hash() {
    let (h, ledger) = funded(dec!(1));
    ledger.fail(FailPoint::Confirmation);

    let err = h.pipeline.withdraw(request(dec!(0.1))).await.unwrap_err();
    match err {
        WithdrawalError::Submission { stage, tx_hash, .. } => {
            assert_eq!(stage, SubmissionStage::Confirmation);
            assert_eq!(tx_hash, Some(ledger.broadcasts()[0].hash.to_string()));
        }
        other => panic!("expected Submission, got {other:?}"),
    }
    assert_eq!(earned(&h), h.seeded);
}

#[tokio::test]
async fn test_reverted_transfer_is_submission_failure() {
    let (h, ledger) = funded(dec!(1));
    ledger.fail(FailPoint::Revert);

    let err = h.pipeline.withdraw(request(dec!(0.1))).await.unwrap_err();
    assert!(matches!(
        err,
        WithdrawalError::Submission {
            stage: SubmissionStage::Confirmation,
            source: LedgerError::Reverted(_),
            ..
        }
    ));
    assert_eq!(earned(&h), h.seeded);
}

#[tokio::test]
async fn test_nonce_failure_is_sequence_stage() {
    let (h, ledger) = funded(dec!(1));
    ledger.fail(FailPoint::Nonce);

    let err = h.pipeline.withdraw(request(dec!(0.1))).await.unwrap_err();
    assert!(matches!(
        err,
        WithdrawalError::Submission {
            stage: SubmissionStage::Sequence,
            tx_hash: None,
            ..
        }
    ));
    // Connection-level failure drops the binding.
    assert!(h.registry.current().is_none());
}

#[tokio::test]
async fn test_balance_failure_rebinds_to_next_endpoint() {
    let primary = MockLedger::new(dec!(1));
    let backup = MockLedger::new(dec!(1));
    let connector = MockConnector::default()
        .with("https://primary", primary.clone())
        .with("https://backup", backup.clone());
    let h = harness(connector.clone(), &["https://primary", "https://backup"], Some(DEV_KEY));

    primary.fail(FailPoint::Balance);
    let err = h.pipeline.withdraw(request(dec!(0.1))).await.unwrap_err();
    assert!(matches!(err, WithdrawalError::AccountUnavailable(LedgerError::Rpc(_))));
    assert!(h.registry.current().is_none());

    connector.take_down("https://primary");
    let receipt = h.pipeline.withdraw(request(dec!(0.1))).await.unwrap();
    assert!(receipt.success);
    assert_eq!(h.registry.current().unwrap().endpoint(), "https://backup");
    assert!(primary.broadcasts().is_empty());
    assert_eq!(backup.broadcasts().len(), 1);
}

#[tokio::test]
async fn test_balance_is_reread_for_every_request() {
    let (h, ledger) = funded(dec!(1));
    h.pipeline.withdraw(request(dec!(0.1))).await.unwrap();

    ledger.set_balance(dec!(0.02));
    let err = h.pipeline.withdraw(request(dec!(0.1))).await.unwrap_err();
    assert_eq!(err.balance_context().unwrap().current_balance, dec!(0.02));
    assert_eq!(
        h.registry.live_balance().await,
        Some(Decimal::from_str("0.02").unwrap())
    );
    assert_eq!(ledger.broadcasts().len(), 1);
    assert_eq!(ledger.broadcasts()[0].value, U256::from(100_000_000_000_000_000u128));
}
