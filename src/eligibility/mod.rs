//! Eligibility Engine: aggregates balances across a user's verified
//! addresses, compares them against a channel's gate threshold, and drives
//! the membership state machine (pending → eligible → warned → kicked).
//!
//! All balance arithmetic is exact U256; thresholds are raw integer strings
//! in smallest-unit precision and are never coerced through floating point.

use alloy::primitives::{Address, U256};
use chrono::{DateTime, Duration, Utc};
use sea_orm::ActiveValue::Set;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, QueryFilter,
    QueryOrder, QuerySelect,
};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::accounts;
use crate::balance::{BalanceError, BalanceSource};
use crate::chain::ChainClients;
use crate::entities::{gate, membership};

/// Window after falling below threshold before a warned member is kicked.
pub const GRACE_PERIOD_HOURS: i64 = 24;
/// Fixed recheck interval; every reconciliation reschedules this far out.
pub const RECHECK_INTERVAL_MINUTES: i64 = 60;
/// Tick of the background recheck sweep.
pub const RECHECK_TICK_SECONDS: u64 = 60;
/// Per-sweep cap on memberships pulled from the due queue.
pub const RECHECK_BATCH_LIMIT: u64 = 100;

#[derive(Debug, Error)]
pub enum EligibilityError {
    #[error("invalid threshold '{0}': must be a non-negative base-10 integer")]
    InvalidThreshold(String),
    #[error("invalid token address '{0}'")]
    InvalidToken(String),
    #[error("aggregate balance overflowed 256 bits")]
    Overflow,
    #[error(transparent)]
    Balance(#[from] BalanceError),
    #[error("database error: {0}")]
    Db(#[from] sea_orm::DbErr),
    #[error("membership {0} not found")]
    MembershipNotFound(i64),
    #[error("invalid stored membership status '{0}'")]
    InvalidStatus(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipStatus {
    Pending,
    Eligible,
    Warned,
    Kicked,
}

impl MembershipStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Eligible => "eligible",
            Self::Warned => "warned",
            Self::Kicked => "kicked",
        }
    }

    pub fn parse(value: &str) -> Result<Self, EligibilityError> {
        match value {
            "pending" => Ok(Self::Pending),
            "eligible" => Ok(Self::Eligible),
            "warned" => Ok(Self::Warned),
            "kicked" => Ok(Self::Kicked),
            other => Err(EligibilityError::InvalidStatus(other.to_string())),
        }
    }
}

/// Parse a raw threshold or balance string. Non-numeric input is a hard
/// validation error, never silently coerced to zero.
pub fn parse_threshold(raw: &str) -> Result<U256, EligibilityError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(EligibilityError::InvalidThreshold(raw.to_string()));
    }
    trimmed
        .parse::<U256>()
        .map_err(|_| EligibilityError::InvalidThreshold(raw.to_string()))
}

pub fn meets_threshold(balance: U256, threshold: U256) -> bool {
    balance >= threshold
}

/// Canonical storage form for gate token addresses: `0x` plus lower-case
/// hex. Wallet addresses are stored EIP-55 checksummed for display; gate
/// tokens are config-style values and stay lower-cased.
pub fn normalize_token_address(raw: &str) -> Result<String, EligibilityError> {
    let parsed = raw
        .trim()
        .parse::<Address>()
        .map_err(|_| EligibilityError::InvalidToken(raw.to_string()))?;
    Ok(format!("{parsed:#x}"))
}

/// Render a raw smallest-unit amount using the token's decimals, trailing
/// zeros trimmed.
pub fn format_units(raw: U256, decimals: u8) -> String {
    if decimals == 0 {
        return raw.to_string();
    }
    let scale = match U256::from(10u64).checked_pow(U256::from(decimals)) {
        Some(scale) => scale,
        None => return raw.to_string(),
    };
    let whole = raw / scale;
    let frac = raw % scale;
    if frac.is_zero() {
        whole.to_string()
    } else {
        let frac_str = format!("{:0>width$}", frac.to_string(), width = decimals as usize);
        let trimmed = frac_str.trim_end_matches('0');
        format!("{whole}.{trimmed}")
    }
}

#[derive(Debug, Clone)]
pub struct AggregateBalance {
    pub total: U256,
    pub per_address: Vec<(Address, U256)>,
}

/// Read all addresses in parallel and sum exactly. An empty address set
/// returns zero without any network calls. Reads are joined at a single
/// point, so one failed read never aborts its siblings mid-flight; the
/// first failure is reported after the join.
pub async fn aggregate_balance(
    source: &dyn BalanceSource,
    chain_id: u64,
    token: Address,
    owners: &[Address],
) -> Result<AggregateBalance, EligibilityError> {
    if owners.is_empty() {
        return Ok(AggregateBalance {
            total: U256::ZERO,
            per_address: Vec::new(),
        });
    }

    let reads = owners
        .iter()
        .map(|owner| source.read_balance(chain_id, token, *owner));
    let results = futures::future::join_all(reads).await;

    let mut total = U256::ZERO;
    let mut per_address = Vec::with_capacity(owners.len());
    for (owner, result) in owners.iter().zip(results) {
        let balance = result?;
        total = total
            .checked_add(balance)
            .ok_or(EligibilityError::Overflow)?;
        per_address.push((*owner, balance));
    }

    Ok(AggregateBalance { total, per_address })
}

/// Everything the engine needs to evaluate one gate, resolved from the
/// stored gate row plus cached or freshly-read token metadata.
#[derive(Debug, Clone)]
pub struct GateView {
    pub chain_id: u64,
    pub token: Address,
    pub threshold: U256,
    pub decimals: u8,
    pub symbol: String,
    pub chain_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AddressBalance {
    pub address: String,
    pub balance: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EligibilityReport {
    pub eligible: bool,
    pub no_active_gates: bool,
    pub no_verified_wallets: bool,
    pub raw_balance: String,
    pub formatted_balance: String,
    pub raw_threshold: String,
    pub formatted_threshold: String,
    pub token_symbol: String,
    pub chain_name: String,
    pub per_address: Vec<AddressBalance>,
}

/// Evaluate the first active gate against a user's verified addresses.
///
/// Multi-gate AND/OR composition is deliberately undefined; only the first
/// gate is consulted even when several exist.
pub async fn evaluate(
    source: &dyn BalanceSource,
    gates: &[GateView],
    verified: &[Address],
) -> Result<EligibilityReport, EligibilityError> {
    let Some(gate) = gates.first() else {
        // No active gates: everyone is eligible, zero balance reads.
        return Ok(EligibilityReport {
            eligible: true,
            no_active_gates: true,
            no_verified_wallets: false,
            raw_balance: "0".to_string(),
            formatted_balance: "0".to_string(),
            raw_threshold: "0".to_string(),
            formatted_threshold: "0".to_string(),
            token_symbol: String::new(),
            chain_name: String::new(),
            per_address: Vec::new(),
        });
    };

    if verified.is_empty() {
        // No verified wallets: never eligible, zero balance reads.
        return Ok(EligibilityReport {
            eligible: false,
            no_active_gates: false,
            no_verified_wallets: true,
            raw_balance: "0".to_string(),
            formatted_balance: "0".to_string(),
            raw_threshold: gate.threshold.to_string(),
            formatted_threshold: format_units(gate.threshold, gate.decimals),
            token_symbol: gate.symbol.clone(),
            chain_name: gate.chain_name.clone(),
            per_address: Vec::new(),
        });
    }

    let aggregate = aggregate_balance(source, gate.chain_id, gate.token, verified).await?;
    let eligible = meets_threshold(aggregate.total, gate.threshold);

    Ok(EligibilityReport {
        eligible,
        no_active_gates: false,
        no_verified_wallets: false,
        raw_balance: aggregate.total.to_string(),
        formatted_balance: format_units(aggregate.total, gate.decimals),
        raw_threshold: gate.threshold.to_string(),
        formatted_threshold: format_units(gate.threshold, gate.decimals),
        token_symbol: gate.symbol.clone(),
        chain_name: gate.chain_name.clone(),
        per_address: aggregate
            .per_address
            .iter()
            .map(|(address, balance)| AddressBalance {
                address: address.to_checksum(None),
                balance: balance.to_string(),
            })
            .collect(),
    })
}

async fn gate_view(
    source: &dyn BalanceSource,
    chains: &ChainClients,
    model: &gate::Model,
) -> Result<GateView, EligibilityError> {
    let token = model
        .token_address
        .parse::<Address>()
        .map_err(|_| EligibilityError::InvalidToken(model.token_address.clone()))?;
    let threshold = parse_threshold(&model.threshold)?;
    let chain_id = model.chain_id as u64;

    // Prefer the metadata cached on the gate row; fall back to a
    // best-effort read when the gate was created without it.
    let (symbol, decimals) = match (&model.token_symbol, model.token_decimals) {
        (Some(symbol), Some(decimals)) => (symbol.clone(), decimals as u8),
        _ => {
            let metadata = source.read_token_metadata(chain_id, token).await;
            (metadata.symbol, metadata.decimals)
        }
    };

    let chain_name = chains
        .display_name(chain_id)
        .map(str::to_string)
        .unwrap_or_else(|| format!("chain-{chain_id}"));

    Ok(GateView {
        chain_id,
        token,
        threshold,
        decimals,
        symbol,
        chain_name,
    })
}

async fn load_active_gates(
    db: &DatabaseConnection,
    channel_id: &str,
) -> Result<Vec<gate::Model>, EligibilityError> {
    // Only the first active gate is ever consulted, so the query is
    // capped at one row; a channel loaded with any number of gates
    // evaluates in constant work.
    let gates = gate::Entity::find()
        .filter(gate::Column::ChannelId.eq(channel_id))
        .filter(gate::Column::Active.eq(true))
        .order_by_asc(gate::Column::Id)
        .limit(1)
        .all(db)
        .await?;
    Ok(gates)
}

/// Full evaluation for one (user, channel) pair. Short-circuit order:
/// gates first (skips the address load entirely), then wallets.
pub async fn evaluate_channel_eligibility(
    db: &DatabaseConnection,
    source: &dyn BalanceSource,
    chains: &ChainClients,
    user_id: &str,
    channel_id: &str,
) -> Result<EligibilityReport, EligibilityError> {
    let gates = load_active_gates(db, channel_id).await?;
    if gates.is_empty() {
        return evaluate(source, &[], &[]).await;
    }

    let verified = accounts::verified_addresses(db, user_id).await?;
    let first = gate_view(source, chains, &gates[0]).await?;
    evaluate(source, &[first], &verified).await
}

/// Outcome of applying the transition table to one membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusDecision {
    pub next: MembershipStatus,
    pub set_warned_at: bool,
    pub clear_warn_markers: bool,
    pub set_kicked_at: bool,
}

impl StatusDecision {
    fn unchanged(status: MembershipStatus) -> Self {
        Self {
            next: status,
            set_warned_at: false,
            clear_warn_markers: false,
            set_kicked_at: false,
        }
    }
}

/// The membership state machine. Pure so the transition table is testable
/// without a database or clock.
///
/// A kicked membership is never auto-revived; re-entry is an external
/// re-join event.
pub fn next_membership_state(
    current: MembershipStatus,
    eligible: bool,
    warned_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> StatusDecision {
    use MembershipStatus::*;

    if eligible {
        return match current {
            Pending | Eligible => StatusDecision {
                next: Eligible,
                set_warned_at: false,
                clear_warn_markers: false,
                set_kicked_at: false,
            },
            Warned => StatusDecision {
                next: Eligible,
                set_warned_at: false,
                clear_warn_markers: true,
                set_kicked_at: false,
            },
            Kicked => StatusDecision::unchanged(Kicked),
        };
    }

    match current {
        Eligible => StatusDecision {
            next: Warned,
            set_warned_at: true,
            clear_warn_markers: false,
            set_kicked_at: false,
        },
        Warned => match warned_at {
            Some(warned_at) if now - warned_at >= Duration::hours(GRACE_PERIOD_HOURS) => {
                StatusDecision {
                    next: Kicked,
                    set_warned_at: false,
                    clear_warn_markers: false,
                    set_kicked_at: true,
                }
            }
            Some(_) => StatusDecision::unchanged(Warned),
            // Missing marker on a warned row: repair it rather than kick
            // off an unbounded grace period.
            None => StatusDecision {
                next: Warned,
                set_warned_at: true,
                clear_warn_markers: false,
                set_kicked_at: false,
            },
        },
        Pending | Kicked => StatusDecision::unchanged(current),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileOutcome {
    pub membership_id: i64,
    pub previous_status: MembershipStatus,
    pub new_status: MembershipStatus,
    pub balance: String,
}

/// Evaluate and apply the state machine to one membership. Every
/// reconciliation, regardless of outcome, refreshes the balance snapshot
/// and reschedules the next check one interval out.
pub async fn reconcile_membership(
    db: &DatabaseConnection,
    source: &dyn BalanceSource,
    chains: &ChainClients,
    membership: membership::Model,
) -> Result<ReconcileOutcome, EligibilityError> {
    let current = MembershipStatus::parse(&membership.status)?;
    let report = evaluate_channel_eligibility(
        db,
        source,
        chains,
        &membership.user_id,
        &membership.channel_id,
    )
    .await?;

    let now = Utc::now();
    let warned_at = membership.warned_at.map(|ts| ts.with_timezone(&Utc));
    let decision = next_membership_state(current, report.eligible, warned_at, now);

    let membership_id = membership.id;
    let now_fixed = now.fixed_offset();
    let mut active = membership.into_active_model();
    active.status = Set(decision.next.as_str().to_string());
    active.last_known_balance = Set(report.raw_balance.clone());
    active.last_checked_at = Set(Some(now_fixed));
    active.next_check_at = Set((now + Duration::minutes(RECHECK_INTERVAL_MINUTES)).fixed_offset());
    active.updated_at = Set(now_fixed);
    if decision.set_warned_at {
        active.warned_at = Set(Some(now_fixed));
    }
    if decision.clear_warn_markers {
        active.warned_at = Set(None);
    }
    if decision.set_kicked_at {
        active.kicked_at = Set(Some(now_fixed));
    }
    active.update(db).await?;

    if decision.next != current {
        info!(
            membership_id,
            from = current.as_str(),
            to = decision.next.as_str(),
            balance = %report.raw_balance,
            "Membership status transition"
        );
    }

    Ok(ReconcileOutcome {
        membership_id,
        previous_status: current,
        new_status: decision.next,
        balance: report.raw_balance,
    })
}

/// A fresh membership row in pending state. `next_check_at` is seeded to
/// the Unix epoch, which sorts strictly before any live timestamp, so the
/// row satisfies the due-for-recheck predicate on the very next sweep.
pub fn new_membership(user_id: &str, channel_id: &str) -> membership::ActiveModel {
    let now = Utc::now().fixed_offset();
    membership::ActiveModel {
        user_id: Set(user_id.to_string()),
        channel_id: Set(channel_id.to_string()),
        status: Set(MembershipStatus::Pending.as_str().to_string()),
        last_known_balance: Set("0".to_string()),
        last_checked_at: Set(None),
        next_check_at: Set(DateTime::<Utc>::UNIX_EPOCH.fixed_offset()),
        warned_at: Set(None),
        kicked_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
}

/// Memberships whose next check is strictly in the past, oldest first.
/// Rows are seeded with an epoch `next_check_at` at creation, so new
/// memberships surface on the very next sweep.
pub async fn list_due_for_recheck(
    db: &DatabaseConnection,
    limit: u64,
) -> Result<Vec<membership::Model>, EligibilityError> {
    assert!(limit > 0, "Recheck limit must be positive");
    assert!(limit <= 1024, "Recheck limit exceeds defensive bound");
    let due = membership::Entity::find()
        .filter(membership::Column::NextCheckAt.lt(Utc::now().fixed_offset()))
        .order_by_asc(membership::Column::NextCheckAt)
        .limit(limit)
        .all(db)
        .await?;
    Ok(due)
}

#[derive(Debug, Serialize)]
pub struct BatchItem {
    pub membership_id: i64,
    pub result: Result<ReconcileOutcome, String>,
}

#[derive(Debug, Serialize)]
pub struct BatchOutcome {
    pub processed: usize,
    pub results: Vec<BatchItem>,
}

/// Sequential on purpose: bounds concurrent RPC load against third-party
/// endpoints. One membership's failure is reported per item and never
/// aborts its siblings.
pub async fn batch_reconcile(
    db: &DatabaseConnection,
    source: &dyn BalanceSource,
    chains: &ChainClients,
    memberships: Vec<membership::Model>,
) -> BatchOutcome {
    let mut results = Vec::with_capacity(memberships.len());
    for membership in memberships {
        let membership_id = membership.id;
        let result = reconcile_membership(db, source, chains, membership)
            .await
            .map_err(|err| {
                warn!(membership_id, "Membership recheck failed: {err}");
                err.to_string()
            });
        results.push(BatchItem {
            membership_id,
            result,
        });
    }
    BatchOutcome {
        processed: results.len(),
        results,
    }
}

/// Background sweep driving the recheck schedule.
pub async fn recheck_loop(
    db: std::sync::Arc<DatabaseConnection>,
    source: std::sync::Arc<dyn BalanceSource>,
    chains: std::sync::Arc<ChainClients>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("Starting membership recheck loop");
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                match changed {
                    Ok(_) => {
                        if *shutdown.borrow() {
                            info!("Recheck loop shutdown signal received");
                            break;
                        }
                    }
                    Err(_) => {
                        warn!("Shutdown channel closed unexpectedly. Exiting recheck loop");
                        break;
                    }
                }
            }
            _ = sleep(std::time::Duration::from_secs(RECHECK_TICK_SECONDS)) => {
                match list_due_for_recheck(&db, RECHECK_BATCH_LIMIT).await {
                    Ok(due) if due.is_empty() => {}
                    Ok(due) => {
                        let outcome = batch_reconcile(&db, source.as_ref(), &chains, due).await;
                        info!(processed = outcome.processed, "Recheck sweep complete");
                    }
                    Err(err) => warn!("Recheck sweep query failed: {err}"),
                }
            }
        }
    }
}

/// Authorized manual override. Stamps or clears the same markers the state
/// machine would for the target status, so automatic reconciliation
/// resumes from a consistent record.
pub async fn override_membership_status(
    db: &DatabaseConnection,
    membership_id: i64,
    target: MembershipStatus,
) -> Result<ReconcileOutcome, EligibilityError> {
    let membership = membership::Entity::find_by_id(membership_id)
        .one(db)
        .await?
        .ok_or(EligibilityError::MembershipNotFound(membership_id))?;
    let current = MembershipStatus::parse(&membership.status)?;

    let now_fixed = Utc::now().fixed_offset();
    let balance = membership.last_known_balance.clone();
    let already_warned = membership.warned_at.is_some();
    let already_kicked = membership.kicked_at.is_some();
    let mut active = membership.into_active_model();
    active.status = Set(target.as_str().to_string());
    active.updated_at = Set(now_fixed);
    match target {
        MembershipStatus::Warned => {
            if !already_warned {
                active.warned_at = Set(Some(now_fixed));
            }
        }
        MembershipStatus::Kicked => {
            if !already_kicked {
                active.kicked_at = Set(Some(now_fixed));
            }
        }
        MembershipStatus::Eligible | MembershipStatus::Pending => {
            active.warned_at = Set(None);
            active.kicked_at = Set(None);
        }
    }
    active.update(db).await?;

    info!(
        membership_id,
        from = current.as_str(),
        to = target.as_str(),
        "Manual membership override"
    );

    Ok(ReconcileOutcome {
        membership_id,
        previous_status: current,
        new_status: target,
        balance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::TokenMetadata;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        balances: HashMap<Address, U256>,
        reads: AtomicUsize,
    }

    impl CountingSource {
        fn new(balances: Vec<(Address, U256)>) -> Self {
            Self {
                balances: balances.into_iter().collect(),
                reads: AtomicUsize::new(0),
            }
        }

        fn read_count(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BalanceSource for CountingSource {
        async fn read_balance(
            &self,
            _chain_id: u64,
            _token: Address,
            owner: Address,
        ) -> Result<U256, BalanceError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(self.balances.get(&owner).copied().unwrap_or(U256::ZERO))
        }

        async fn read_token_metadata(&self, _chain_id: u64, _token: Address) -> TokenMetadata {
            TokenMetadata::unknown()
        }
    }

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn test_gate(threshold: U256) -> GateView {
        GateView {
            chain_id: 8453,
            token: addr(0xAA),
            threshold,
            decimals: 18,
            symbol: "GATE".to_string(),
            chain_name: "Base".to_string(),
        }
    }

    #[test]
    fn threshold_parsing_is_strict() {
        assert!(parse_threshold("0").is_ok());
        assert!(parse_threshold(" 42 ").is_ok());
        assert!(parse_threshold("90071992547409931234567890").is_ok());
        assert!(parse_threshold("").is_err());
        assert!(parse_threshold("-1").is_err());
        assert!(parse_threshold("1.5").is_err());
        assert!(parse_threshold("0x10").is_err());
        assert!(parse_threshold("abc").is_err());
    }

    #[test]
    fn threshold_comparison_is_exact_beyond_53_bits() {
        // 2^53 + 1 is indistinguishable from 2^53 in f64; U256 must not be.
        let base = U256::from(1u64 << 53);
        let above = base + U256::from(1u64);
        assert!(meets_threshold(above, above));
        assert!(!meets_threshold(base, above));

        let huge: U256 = "115792089237316195423570985008687907853269984665640564039457"
            .parse()
            .unwrap();
        assert!(meets_threshold(huge, huge));
        assert!(!meets_threshold(huge - U256::from(1u64), huge));
    }

    #[test]
    fn format_units_trims_trailing_zeros() {
        let one_token = U256::from(10u64).pow(U256::from(18u64));
        assert_eq!(format_units(U256::ZERO, 18), "0");
        assert_eq!(format_units(one_token, 18), "1");
        assert_eq!(format_units(one_token / U256::from(2u64), 18), "0.5");
        assert_eq!(format_units(U256::from(1_500u64), 2), "15");
        assert_eq!(format_units(U256::from(1_234u64), 3), "1.234");
        assert_eq!(format_units(U256::from(42u64), 0), "42");
    }

    #[tokio::test]
    async fn aggregate_is_exact_and_parallel_fanout_sums_all_addresses() {
        let big = U256::from(1u64 << 53);
        let source = CountingSource::new(vec![
            (addr(1), big),
            (addr(2), U256::from(1u64)),
            (addr(3), U256::from(7u64)),
        ]);
        let owners = [addr(1), addr(2), addr(3)];
        let aggregate = aggregate_balance(&source, 8453, addr(0xAA), &owners)
            .await
            .expect("aggregate");
        assert_eq!(aggregate.total, big + U256::from(8u64));
        assert_eq!(aggregate.per_address.len(), 3);
        assert_eq!(source.read_count(), 3);
    }

    #[tokio::test]
    async fn empty_address_set_reads_nothing() {
        let source = CountingSource::new(vec![]);
        let aggregate = aggregate_balance(&source, 8453, addr(0xAA), &[])
            .await
            .expect("aggregate");
        assert_eq!(aggregate.total, U256::ZERO);
        assert_eq!(source.read_count(), 0);
    }

    #[tokio::test]
    async fn no_active_gates_short_circuits_with_zero_reads() {
        let source = CountingSource::new(vec![(addr(1), U256::from(5u64))]);
        let report = evaluate(&source, &[], &[addr(1)]).await.expect("evaluate");
        assert!(report.eligible);
        assert!(report.no_active_gates);
        assert_eq!(source.read_count(), 0);
    }

    #[tokio::test]
    async fn no_verified_wallets_is_never_eligible() {
        let source = CountingSource::new(vec![]);
        let report = evaluate(&source, &[test_gate(U256::ZERO)], &[])
            .await
            .expect("evaluate");
        assert!(!report.eligible);
        assert!(report.no_verified_wallets);
        assert_eq!(source.read_count(), 0);
    }

    #[tokio::test]
    async fn eligibility_is_balance_gte_threshold() {
        let threshold: U256 = "9007199254740993000000000000".parse().unwrap();
        let gate = test_gate(threshold);

        let source = CountingSource::new(vec![
            (addr(1), threshold - U256::from(10u64)),
            (addr(2), U256::from(10u64)),
        ]);
        let report = evaluate(&source, std::slice::from_ref(&gate), &[addr(1), addr(2)])
            .await
            .expect("evaluate");
        assert!(report.eligible);
        assert_eq!(report.raw_threshold, threshold.to_string());
        assert_eq!(report.token_symbol, "GATE");
        assert_eq!(report.chain_name, "Base");

        let short = CountingSource::new(vec![(addr(1), threshold - U256::from(1u64))]);
        let report = evaluate(&short, &[gate], &[addr(1)]).await.expect("evaluate");
        assert!(!report.eligible);
    }

    #[test]
    fn grace_period_scenario() {
        use MembershipStatus::*;
        let t0 = Utc::now();

        // eligible member dips below threshold: warned, marker set
        let decision = next_membership_state(Eligible, false, None, t0);
        assert_eq!(decision.next, Warned);
        assert!(decision.set_warned_at);

        // still below at t0 + 23h: stays warned, marker untouched
        let decision = next_membership_state(Warned, false, Some(t0), t0 + Duration::hours(23));
        assert_eq!(decision.next, Warned);
        assert!(!decision.set_warned_at);
        assert!(!decision.set_kicked_at);

        // still below at t0 + 25h: kicked, kick marker set once
        let decision = next_membership_state(Warned, false, Some(t0), t0 + Duration::hours(25));
        assert_eq!(decision.next, Kicked);
        assert!(decision.set_kicked_at);
    }

    #[test]
    fn warned_member_recovers_before_grace_elapses() {
        use MembershipStatus::*;
        let t0 = Utc::now();
        let decision = next_membership_state(Warned, true, Some(t0), t0 + Duration::hours(2));
        assert_eq!(decision.next, Eligible);
        assert!(decision.clear_warn_markers);
    }

    #[test]
    fn reconcile_is_idempotent_within_grace() {
        use MembershipStatus::*;
        let t0 = Utc::now();

        let first = next_membership_state(Eligible, false, None, t0);
        assert_eq!(first.next, Warned);
        assert!(first.set_warned_at);

        // Immediate second pass with no balance change: same status, no
        // double-set of the warn marker.
        let second = next_membership_state(Warned, false, Some(t0), t0 + Duration::seconds(1));
        assert_eq!(second.next, Warned);
        assert!(!second.set_warned_at);
    }

    #[test]
    fn kicked_membership_is_not_auto_revived() {
        use MembershipStatus::*;
        let now = Utc::now();
        let decision = next_membership_state(Kicked, true, None, now);
        assert_eq!(decision.next, Kicked);
        let decision = next_membership_state(Kicked, false, None, now);
        assert_eq!(decision.next, Kicked);
    }

    #[test]
    fn pending_member_stays_pending_while_ineligible() {
        use MembershipStatus::*;
        let decision = next_membership_state(Pending, false, None, Utc::now());
        assert_eq!(decision.next, Pending);
        let decision = next_membership_state(Pending, true, None, Utc::now());
        assert_eq!(decision.next, Eligible);
    }

    #[test]
    fn new_membership_is_due_immediately() {
        let active = new_membership("user-1", "channel-1");
        let seeded = active.next_check_at.clone().unwrap();
        // The due query is `next_check_at < now`; an epoch seed satisfies
        // it from the moment the row lands.
        assert_eq!(seeded, DateTime::<Utc>::UNIX_EPOCH.fixed_offset());
        assert!(seeded < Utc::now().fixed_offset());
        assert_eq!(active.status.clone().unwrap(), "pending");
        assert_eq!(active.last_known_balance.clone().unwrap(), "0");
        assert_eq!(active.last_checked_at.clone().unwrap(), None);
        assert_eq!(active.warned_at.clone().unwrap(), None);
        assert_eq!(active.kicked_at.clone().unwrap(), None);
    }

    #[test]
    fn token_addresses_normalize_to_lower_case() {
        let mixed = "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48";
        let normalized = normalize_token_address(mixed).unwrap();
        assert_eq!(normalized, mixed.to_lowercase());
        assert_eq!(normalize_token_address(&normalized).unwrap(), normalized);
        assert!(normalize_token_address("not-an-address").is_err());
        assert!(normalize_token_address("0x1234").is_err());
    }

    #[tokio::test]
    async fn large_gate_fanout_consults_only_the_first_gate() {
        let source = CountingSource::new(vec![(addr(1), U256::from(100u64))]);
        let gates: Vec<GateView> = (0..300).map(|_| test_gate(U256::from(50u64))).collect();
        let report = evaluate(&source, &gates, &[addr(1)]).await.expect("evaluate");
        assert!(report.eligible);
        assert_eq!(source.read_count(), 1);
    }

    #[test]
    fn status_roundtrip() {
        for status in [
            MembershipStatus::Pending,
            MembershipStatus::Eligible,
            MembershipStatus::Warned,
            MembershipStatus::Kicked,
        ] {
            assert_eq!(MembershipStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(MembershipStatus::parse("banned").is_err());
    }
}
