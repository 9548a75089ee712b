//! In-Memory Store - Atomic Procedures over One Lock
//!
//! Every table lives in one [`StoreState`] behind a single
//! `tokio::sync::RwLock`, so each procedure runs as one indivisible
//! critical section: funds are checked and moved under the same write
//! guard. The whole state is serializable for snapshots.
//!
//! In local wallet mode the same store also serves as the
//! [`WalletProvider`], so batches and facade share one set of pockets.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::domain::audit::GameStats;
use crate::domain::credit::{CreditLine, CreditStatus, PaymentKind, PaymentRecord, SettlementOutcome, SettlementPlan};
use crate::domain::error::LedgerError;
use crate::domain::money::{Amount, Balance, EntityId, Pocket, UserId};
use crate::domain::prepaid::PrepaidInstrument;
use crate::domain::savings::SavingsAccount;
use crate::domain::transfer::{DeferredTransfer, TransferStatus};
use crate::ports::store::{
    BankOp, BankOutcome, BankParams, BillingRepository, CasinoOutcome, CasinoParams, ChipsExchangeOutcome,
    ChipsExchangeParams, ChipsOp, CreditPaymentOutcome, CreditPaymentParams, DuelOutcome, DuelParams,
    GameStatsSource, LedgerStore, ProcedureError, SavingsOp, SavingsOutcome, SavingsParams, TransferOutcome,
    TransferParams,
};
use crate::ports::wallet::{WalletError, WalletProvider};

/// Every pocket a user holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pockets {
    pub cash: Amount,
    pub bank: Amount,
    /// Secondary in-game currency used by the casino.
    pub chips: Amount,
}

impl Pockets {
    pub const fn new(cash: Amount, bank: Amount, chips: Amount) -> Self {
        Self { cash, bank, chips }
    }

    pub const fn balance(&self) -> Balance {
        Balance::new(self.cash, self.bank)
    }

    fn pocket_mut(&mut self, pocket: Pocket) -> &mut Amount {
        match pocket {
            Pocket::Cash => &mut self.cash,
            Pocket::Bank => &mut self.bank,
        }
    }
}

/// Serializable content of the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreState {
    #[serde(default)]
    pub accounts: HashMap<UserId, Pockets>,
    #[serde(default)]
    pub game_stats: HashMap<UserId, GameStats>,
    #[serde(default)]
    pub credit_lines: HashMap<EntityId, CreditLine>,
    #[serde(default)]
    pub payments: Vec<PaymentRecord>,
    #[serde(default)]
    pub instruments: HashMap<EntityId, PrepaidInstrument>,
    #[serde(default)]
    pub savings_accounts: HashMap<EntityId, SavingsAccount>,
    #[serde(default)]
    pub transfers: HashMap<EntityId, DeferredTransfer>,
}

impl StoreState {
    fn account_mut(&mut self, user: &str) -> Result<&mut Pockets, ProcedureError> {
        self.accounts
            .get_mut(user)
            .ok_or_else(|| ProcedureError::NotFound(format!("account {user}")))
    }
}

fn ensure_funds(user: &str, available: Amount, needed: Amount) -> Result<(), ProcedureError> {
    if available < needed {
        return Err(ProcedureError::InsufficientFunds {
            user: user.to_string(),
            needed,
            available,
        });
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a previously exported state.
    pub fn from_state(state: StoreState) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }

    /// Consistent copy of the whole state.
    pub async fn export(&self) -> StoreState {
        self.state.read().await.clone()
    }

    pub async fn set_pockets(&self, user: &str, pockets: Pockets) {
        self.state.write().await.accounts.insert(user.to_string(), pockets);
    }

    /// Set cash and bank, keeping chips.
    pub async fn set_wallet(&self, user: &str, balance: Balance) {
        let mut state = self.state.write().await;
        let account = state.accounts.entry(user.to_string()).or_default();
        account.cash = balance.cash;
        account.bank = balance.bank;
    }

    pub async fn pockets(&self, user: &str) -> Option<Pockets> {
        self.state.read().await.accounts.get(user).copied()
    }

    pub async fn set_game_stats(&self, user: &str, stats: GameStats) {
        self.state.write().await.game_stats.insert(user.to_string(), stats);
    }
}

#[async_trait]
impl LedgerStore for InMemoryStore {
    async fn casino_transaction(&self, params: &CasinoParams) -> Result<CasinoOutcome, ProcedureError> {
        let mut state = self.state.write().await;
        let account = state.account_mut(&params.user)?;
        ensure_funds(&params.user, account.chips, params.bet)?;

        let balance_before = account.chips;
        account.chips = account.chips - params.bet + params.payout;
        let new_balance = account.chips;

        state
            .game_stats
            .entry(params.user.clone())
            .or_default()
            .record(params.bet, params.payout);

        debug!(user_id = %params.user, game = %params.game, "Casino round applied");
        Ok(CasinoOutcome {
            balance_before,
            new_balance,
        })
    }

    async fn chips_exchange(&self, params: &ChipsExchangeParams) -> Result<ChipsExchangeOutcome, ProcedureError> {
        let mut state = self.state.write().await;
        let account = state.account_mut(&params.user)?;
        let before = *account;

        match params.op {
            ChipsOp::Buy => {
                ensure_funds(&params.user, account.cash, params.cash)?;
                account.cash -= params.cash;
                account.chips += params.chips;
            }
            ChipsOp::Sell => {
                ensure_funds(&params.user, account.chips, params.chips)?;
                account.chips -= params.chips;
                account.cash += params.cash;
            }
        }

        Ok(ChipsExchangeOutcome {
            chips_before: before.chips,
            chips_after: account.chips,
            cash_before: before.cash,
            cash_after: account.cash,
        })
    }

    async fn money_transfer(&self, params: &TransferParams) -> Result<TransferOutcome, ProcedureError> {
        let mut state = self.state.write().await;
        if !state.accounts.contains_key(&params.to) {
            return Err(ProcedureError::NotFound(format!("account {}", params.to)));
        }

        let sender = state.account_mut(&params.from)?.pocket_mut(params.pocket);
        ensure_funds(&params.from, *sender, params.amount)?;
        let sender_before = *sender;
        *sender -= params.amount;
        let sender_after = *sender;

        let receiver = state.account_mut(&params.to)?.pocket_mut(params.pocket);
        let receiver_before = *receiver;
        *receiver += params.amount;

        Ok(TransferOutcome {
            sender_before,
            sender_after,
            receiver_before,
            receiver_after: *receiver,
        })
    }

    async fn bank_operation(&self, params: &BankParams) -> Result<BankOutcome, ProcedureError> {
        let mut state = self.state.write().await;
        let account = state.account_mut(&params.user)?;
        let before = *account;

        match params.op {
            BankOp::Deposit => {
                ensure_funds(&params.user, account.cash, params.amount)?;
                account.cash -= params.amount;
                account.bank += params.amount;
            }
            BankOp::Withdraw => {
                ensure_funds(&params.user, account.bank, params.amount)?;
                account.bank -= params.amount;
                account.cash += params.amount;
            }
        }

        Ok(BankOutcome {
            cash_before: before.cash,
            bank_before: before.bank,
            cash_after: account.cash,
            bank_after: account.bank,
        })
    }

    async fn savings_transaction(&self, params: &SavingsParams) -> Result<SavingsOutcome, ProcedureError> {
        let mut state = self.state.write().await;
        let savings = state
            .savings_accounts
            .get(&params.account_id)
            .ok_or_else(|| ProcedureError::NotFound(format!("savings account {}", params.account_id)))?;
        if savings.holder_id != params.holder {
            return Err(ProcedureError::Conflict(format!(
                "savings account {} does not belong to {}",
                params.account_id, params.holder
            )));
        }
        if !savings.accepts_movements() {
            return Err(ProcedureError::Conflict(format!(
                "savings account {} is closed",
                params.account_id
            )));
        }
        let savings_before = savings.balance;
        if params.op == SavingsOp::Withdraw {
            ensure_funds(&params.holder, savings_before, params.amount)?;
        }

        let account = state.account_mut(&params.holder)?;
        let cash_before = account.cash;
        match params.op {
            SavingsOp::Deposit => {
                ensure_funds(&params.holder, account.cash, params.amount)?;
                account.cash -= params.amount;
            }
            SavingsOp::Withdraw => account.cash += params.amount,
        }
        let cash_after = account.cash;

        let savings = state
            .savings_accounts
            .get_mut(&params.account_id)
            .ok_or_else(|| ProcedureError::NotFound(format!("savings account {}", params.account_id)))?;
        match params.op {
            SavingsOp::Deposit => savings.balance += params.amount,
            SavingsOp::Withdraw => savings.balance -= params.amount,
        }

        Ok(SavingsOutcome {
            cash_before,
            cash_after,
            savings_before,
            savings_after: savings.balance,
        })
    }

    async fn pvp_duel(&self, params: &DuelParams) -> Result<DuelOutcome, ProcedureError> {
        let mut state = self.state.write().await;
        if !state.accounts.contains_key(&params.winner) {
            return Err(ProcedureError::NotFound(format!("account {}", params.winner)));
        }

        let loser = state.account_mut(&params.loser)?;
        ensure_funds(&params.loser, loser.cash, params.bet)?;
        let loser_before = loser.cash;
        loser.cash -= params.bet;
        let loser_after = loser.cash;

        let win_amount = params.bet - params.tax;
        let winner = state.account_mut(&params.winner)?;
        let winner_before = winner.cash;
        winner.cash += win_amount;
        let winner_after = winner.cash;

        state.accounts.entry(params.treasury.clone()).or_default().cash += params.tax;

        state
            .game_stats
            .entry(params.winner.clone())
            .or_default()
            .record(params.bet, params.bet + win_amount);
        state
            .game_stats
            .entry(params.loser.clone())
            .or_default()
            .record(params.bet, Decimal::ZERO);

        Ok(DuelOutcome {
            winner_before,
            winner_after,
            loser_before,
            loser_after,
            win_amount,
            tax: params.tax,
        })
    }

    async fn credit_payment(&self, params: &CreditPaymentParams) -> Result<CreditPaymentOutcome, ProcedureError> {
        let mut state = self.state.write().await;
        let line = state
            .credit_lines
            .get(&params.line_id)
            .ok_or_else(|| ProcedureError::NotFound(format!("credit line {}", params.line_id)))?;
        if line.holder_id != params.holder {
            return Err(ProcedureError::Conflict(format!(
                "credit line {} does not belong to {}",
                params.line_id, params.holder
            )));
        }
        if line.current_balance <= Decimal::ZERO {
            return Err(ProcedureError::Conflict(format!(
                "credit line {} has nothing outstanding",
                params.line_id
            )));
        }
        let line_balance_before = line.current_balance;
        let applied = params.amount.min(line_balance_before);

        let account = state.account_mut(&params.holder)?;
        ensure_funds(&params.holder, account.cash, applied)?;
        let cash_before = account.cash;
        account.cash -= applied;
        let cash_after = account.cash;

        let now = Utc::now();
        let line = state
            .credit_lines
            .get_mut(&params.line_id)
            .ok_or_else(|| ProcedureError::NotFound(format!("credit line {}", params.line_id)))?;
        line.current_balance -= applied;
        line.last_payment_at = Some(now);
        let line_balance_after = line.current_balance;

        state.payments.push(PaymentRecord {
            id: Uuid::new_v4().to_string(),
            line_id: params.line_id.clone(),
            holder_id: params.holder.clone(),
            amount: applied,
            kind: PaymentKind::Success,
            penalty: Decimal::ZERO,
            balance_after: line_balance_after,
            recorded_at: now,
        });

        Ok(CreditPaymentOutcome {
            applied,
            cash_before,
            cash_after,
            line_balance_before,
            line_balance_after,
        })
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}

#[async_trait]
impl GameStatsSource for InMemoryStore {
    async fn game_stats(&self, user: &str) -> anyhow::Result<GameStats> {
        Ok(self.state.read().await.game_stats.get(user).copied().unwrap_or_default())
    }
}

#[async_trait]
impl BillingRepository for InMemoryStore {
    async fn upsert_credit_line(&self, line: &CreditLine) -> anyhow::Result<()> {
        self.state.write().await.credit_lines.insert(line.id.clone(), line.clone());
        Ok(())
    }

    async fn credit_line(&self, id: &str) -> anyhow::Result<Option<CreditLine>> {
        Ok(self.state.read().await.credit_lines.get(id).cloned())
    }

    async fn billable_credit_lines(&self) -> anyhow::Result<Vec<CreditLine>> {
        let state = self.state.read().await;
        let mut lines: Vec<CreditLine> = state.credit_lines.values().filter(|l| l.is_billable()).cloned().collect();
        lines.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(lines)
    }

    async fn apply_settlement(
        &self,
        line_id: &str,
        plan: &SettlementPlan,
        next_payment_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<CreditLine, ProcedureError> {
        let mut state = self.state.write().await;
        let line = state
            .credit_lines
            .get_mut(line_id)
            .ok_or_else(|| ProcedureError::NotFound(format!("credit line {line_id}")))?;
        if line.status != CreditStatus::Active {
            return Err(ProcedureError::Conflict(format!("credit line {line_id} is {}", line.status)));
        }

        line.current_balance += plan.balance_delta();
        line.next_payment_at = next_payment_at;
        match plan.outcome {
            SettlementOutcome::Paid => {
                line.missed_payments = 0;
                line.last_payment_at = Some(now);
            }
            SettlementOutcome::Frozen => {
                line.status = CreditStatus::Frozen;
                line.missed_payments += 1;
            }
        }
        Ok(line.clone())
    }

    async fn unfreeze_credit_line(&self, line_id: &str) -> Result<CreditLine, ProcedureError> {
        let mut state = self.state.write().await;
        let line = state
            .credit_lines
            .get_mut(line_id)
            .ok_or_else(|| ProcedureError::NotFound(format!("credit line {line_id}")))?;
        line.unfreeze().map_err(|e| match e {
            LedgerError::Validation(why) => ProcedureError::Conflict(why),
            other => ProcedureError::Backend(other.into()),
        })?;
        Ok(line.clone())
    }

    async fn record_payment(&self, record: &PaymentRecord) -> anyhow::Result<()> {
        self.state.write().await.payments.push(record.clone());
        Ok(())
    }

    async fn payments_for_line(&self, line_id: &str) -> anyhow::Result<Vec<PaymentRecord>> {
        let state = self.state.read().await;
        Ok(state.payments.iter().filter(|p| p.line_id == line_id).cloned().collect())
    }

    async fn upsert_savings_account(&self, account: &SavingsAccount) -> anyhow::Result<()> {
        self.state
            .write()
            .await
            .savings_accounts
            .insert(account.id.clone(), account.clone());
        Ok(())
    }

    async fn savings_account(&self, id: &str) -> anyhow::Result<Option<SavingsAccount>> {
        Ok(self.state.read().await.savings_accounts.get(id).cloned())
    }

    async fn upsert_instrument(&self, instrument: &PrepaidInstrument) -> anyhow::Result<()> {
        self.state
            .write()
            .await
            .instruments
            .insert(instrument.id.clone(), instrument.clone());
        Ok(())
    }

    async fn instrument(&self, id: &str) -> anyhow::Result<Option<PrepaidInstrument>> {
        Ok(self.state.read().await.instruments.get(id).cloned())
    }

    async fn coverable_instruments(&self) -> anyhow::Result<Vec<PrepaidInstrument>> {
        let state = self.state.read().await;
        let mut instruments: Vec<PrepaidInstrument> =
            state.instruments.values().filter(|i| i.can_cover()).cloned().collect();
        instruments.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(instruments)
    }

    async fn debit_instrument(&self, id: &str, amount: Amount) -> Result<Amount, ProcedureError> {
        let mut state = self.state.write().await;
        let instrument = state
            .instruments
            .get_mut(id)
            .ok_or_else(|| ProcedureError::NotFound(format!("instrument {id}")))?;
        ensure_funds(&instrument.holder_id, instrument.balance, amount)?;
        instrument.balance -= amount;
        Ok(instrument.balance)
    }

    async fn credit_instrument(&self, id: &str, amount: Amount) -> Result<Amount, ProcedureError> {
        let mut state = self.state.write().await;
        let instrument = state
            .instruments
            .get_mut(id)
            .ok_or_else(|| ProcedureError::NotFound(format!("instrument {id}")))?;
        instrument.balance += amount;
        Ok(instrument.balance)
    }

    async fn insert_transfer(&self, transfer: &DeferredTransfer) -> anyhow::Result<()> {
        let mut state = self.state.write().await;
        anyhow::ensure!(
            !state.transfers.contains_key(&transfer.id),
            "transfer {} already exists",
            transfer.id
        );
        state.transfers.insert(transfer.id.clone(), transfer.clone());
        Ok(())
    }

    async fn transfer(&self, id: &str) -> anyhow::Result<Option<DeferredTransfer>> {
        Ok(self.state.read().await.transfers.get(id).cloned())
    }

    async fn due_transfers(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<DeferredTransfer>> {
        let state = self.state.read().await;
        let mut due: Vec<DeferredTransfer> = state.transfers.values().filter(|t| t.is_due(now)).cloned().collect();
        due.sort_by(|a, b| a.release_at.cmp(&b.release_at).then_with(|| a.id.cmp(&b.id)));
        Ok(due)
    }

    async fn complete_transfer(&self, id: &str, now: DateTime<Utc>) -> Result<bool, ProcedureError> {
        let mut state = self.state.write().await;
        let transfer = state
            .transfers
            .get_mut(id)
            .ok_or_else(|| ProcedureError::NotFound(format!("transfer {id}")))?;
        if transfer.status == TransferStatus::Completed {
            return Ok(false);
        }
        transfer.status = TransferStatus::Completed;
        transfer.completed_at = Some(now);
        Ok(true)
    }
}

/// Local wallet mode. Cash may go negative; the wallet does not police overdrafts.
#[async_trait]
impl WalletProvider for InMemoryStore {
    async fn get_balance(&self, _community: &str, user: &str) -> Result<Balance, WalletError> {
        self.state
            .read()
            .await
            .accounts
            .get(user)
            .map(Pockets::balance)
            .ok_or_else(|| WalletError::UnknownUser(user.to_string()))
    }

    async fn credit(
        &self,
        _community: &str,
        user: &str,
        amount: Amount,
        reason: &str,
        pocket: Pocket,
    ) -> Result<Balance, WalletError> {
        let mut state = self.state.write().await;
        let account = state
            .accounts
            .get_mut(user)
            .ok_or_else(|| WalletError::UnknownUser(user.to_string()))?;
        *account.pocket_mut(pocket) += amount;
        debug!(user_id = %user, amount = %amount, pocket = %pocket, reason, "Local wallet credit");
        Ok(account.balance())
    }

    async fn debit(
        &self,
        _community: &str,
        user: &str,
        amount: Amount,
        reason: &str,
        pocket: Pocket,
    ) -> Result<Balance, WalletError> {
        let mut state = self.state.write().await;
        let account = state
            .accounts
            .get_mut(user)
            .ok_or_else(|| WalletError::UnknownUser(user.to_string()))?;
        *account.pocket_mut(pocket) -= amount;
        debug!(user_id = %user, amount = %amount, pocket = %pocket, reason, "Local wallet debit");
        Ok(account.balance())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn transfer_params(from: &str, to: &str, amount: Amount) -> TransferParams {
        TransferParams {
            from: from.into(),
            to: to.into(),
            amount,
            pocket: Pocket::Cash,
            metadata: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn test_transfer_conserves_money() {
        let store = InMemoryStore::new();
        store.set_pockets("a", Pockets::new(dec!(100), dec!(0), dec!(0))).await;
        store.set_pockets("b", Pockets::new(dec!(5), dec!(0), dec!(0))).await;

        let out = store.money_transfer(&transfer_params("a", "b", dec!(40))).await.unwrap();
        assert_eq!(out.sender_after, dec!(60));
        assert_eq!(out.receiver_after, dec!(45));
        assert_eq!(out.sender_before + out.receiver_before, out.sender_after + out.receiver_after);
    }

    #[tokio::test]
    async fn test_failed_procedure_changes_nothing() {
        let store = InMemoryStore::new();
        store.set_pockets("a", Pockets::new(dec!(10), dec!(0), dec!(0))).await;
        store.set_pockets("b", Pockets::default()).await;
        let before = store.export().await;

        let err = store.money_transfer(&transfer_params("a", "b", dec!(11))).await.unwrap_err();
        assert!(matches!(err, ProcedureError::InsufficientFunds { .. }));
        assert!(matches!(
            store.money_transfer(&transfer_params("a", "nobody", dec!(1))).await,
            Err(ProcedureError::NotFound(_))
        ));
        assert_eq!(store.export().await, before);
    }

    #[tokio::test]
    async fn test_casino_updates_game_stats() {
        let store = InMemoryStore::new();
        store.set_pockets("p", Pockets::new(dec!(0), dec!(0), dec!(100))).await;
        let params = CasinoParams {
            user: "p".into(),
            bet: dec!(30),
            payout: dec!(0),
            game: "roulette".into(),
            metadata: serde_json::Value::Null,
        };
        let out = store.casino_transaction(&params).await.unwrap();
        assert_eq!(out.new_balance, dec!(70));

        let stats = store.game_stats("p").await.unwrap();
        assert_eq!(stats.games_played, 1);
        assert_eq!(stats.total_lost, dec!(30));
    }

    #[tokio::test]
    async fn test_complete_transfer_is_compare_and_set() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store
            .insert_transfer(&DeferredTransfer {
                id: "t".into(),
                sender_id: "a".into(),
                receiver_id: "b".into(),
                amount: dec!(1),
                kind: crate::domain::transfer::TransferKind::Cash,
                reason: String::new(),
                release_at: now,
                status: TransferStatus::Pending,
                completed_at: None,
            })
            .await
            .unwrap();

        assert!(store.complete_transfer("t", now).await.unwrap());
        assert!(!store.complete_transfer("t", now).await.unwrap());
        assert!(store.due_transfers(now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unfreeze_only_from_frozen() {
        let store = InMemoryStore::new();
        let mut line = CreditLine {
            id: "c1".into(),
            holder_id: "h".into(),
            credit_limit: dec!(1000),
            current_balance: dec!(400),
            interest_rate: dec!(0.05),
            status: CreditStatus::Active,
            next_payment_at: Utc::now(),
            missed_payments: 2,
            last_payment_at: None,
        };
        store.upsert_credit_line(&line).await.unwrap();
        assert!(matches!(
            store.unfreeze_credit_line("c1").await,
            Err(ProcedureError::Conflict(_))
        ));
        assert!(matches!(
            store.unfreeze_credit_line("missing").await,
            Err(ProcedureError::NotFound(_))
        ));

        line.status = CreditStatus::Frozen;
        store.upsert_credit_line(&line).await.unwrap();
        let unfrozen = store.unfreeze_credit_line("c1").await.unwrap();
        assert_eq!(unfrozen.status, CreditStatus::Active);
        assert_eq!(unfrozen.current_balance, dec!(400));
        assert_eq!(unfrozen.missed_payments, 2);
    }

    #[tokio::test]
    async fn test_local_wallet_rejects_unknown_user() {
        let store = InMemoryStore::new();
        let err = store.credit("g", "ghost", dec!(1), "test", Pocket::Cash).await.unwrap_err();
        assert!(matches!(err, WalletError::UnknownUser(_)));
    }
}
