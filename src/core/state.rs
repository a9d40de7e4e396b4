// src/core/state.rs
use crate::types::{
    AccountSnapshot, Order, OrderStatus, Position, Snapshot, StateView, UiEvent,
};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};
use tracing::debug;

#[derive(Debug, Default)]
struct AccountState {
    positions: BTreeMap<String, Position>,
    orders: BTreeMap<u64, Order>,
    account: AccountSnapshot,
    balance_asset: String,
    revision: u64,
}

impl AccountState {
    fn view(&self) -> StateView {
        StateView {
            revision: self.revision,
            positions: self.positions.values().cloned().collect(),
            orders: self.orders.values().cloned().collect(),
            account: self.account.clone(),
            balance_asset: self.balance_asset.clone(),
        }
    }

    fn symbols(&self) -> BTreeSet<String> {
        self.positions.keys().cloned().collect()
    }
}

/// Single owner of positions, orders and balances.
///
/// Every mutation runs under one lock. A mutation that changes anything bumps the
/// revision and queues a [`StateView`] for the renderer before the lock is released,
/// so views arrive in mutation order without the renderer ever holding the lock.
pub struct StateStore {
    state: Mutex<AccountState>,
    ui_sender: mpsc::UnboundedSender<UiEvent>,
    symbols: watch::Sender<BTreeSet<String>>,
}

impl StateStore {
    pub fn new(balance_asset: impl Into<String>, ui_sender: mpsc::UnboundedSender<UiEvent>) -> Self {
        let (symbols, _) = watch::channel(BTreeSet::new());
        Self {
            state: Mutex::new(AccountState {
                balance_asset: balance_asset.into(),
                ..Default::default()
            }),
            ui_sender,
            symbols,
        }
    }

    fn lock(&self) -> MutexGuard<'_, AccountState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bumps the revision and publishes. Must be called with the lock held.
    fn commit(&self, state: &mut AccountState) {
        state.revision += 1;
        let symbols = state.symbols();
        self.symbols.send_if_modified(|current| {
            if *current != symbols {
                *current = symbols;
                true
            } else {
                false
            }
        });
        if self.ui_sender.send(UiEvent::State(state.view())).is_err() {
            debug!("UI channel closed, state view dropped");
        }
    }

    pub fn view(&self) -> StateView {
        self.lock().view()
    }

    /// Symbols of the positions currently held; changes whenever the position set does.
    pub fn subscribe_symbols(&self) -> watch::Receiver<BTreeSet<String>> {
        self.symbols.subscribe()
    }

    /// Replaces all three collections wholesale.
    pub fn apply_snapshot(&self, snapshot: Snapshot) {
        let mut state = self.lock();
        state.positions = snapshot
            .positions
            .into_iter()
            .map(|p| (p.symbol.clone(), p))
            .collect();
        state.orders = snapshot.orders.into_iter().map(|o| (o.id, o)).collect();
        state.account = snapshot.account;
        self.commit(&mut state);
    }

    /// Applies a wallet balance for `asset`; only the configured balance asset is tracked.
    pub fn apply_account_balance(&self, asset: &str, amount: Decimal) -> bool {
        self.apply_account_update([(asset, amount)])
    }

    /// Applies every balance entry of one account event under a single lock and
    /// publishes one view for the whole event. The tracked asset's wallet balance is
    /// replaced wholesale, even when unchanged; other assets are ignored.
    pub fn apply_account_update<'a, I>(&self, balances: I) -> bool
    where
        I: IntoIterator<Item = (&'a str, Decimal)>,
    {
        let mut state = self.lock();
        let mut applied = false;
        for (asset, amount) in balances {
            if asset == state.balance_asset {
                state.account.wallet_balance = amount;
                applied = true;
            }
        }
        if applied {
            self.commit(&mut state);
        }
        applied
    }

    /// Removes exactly the order with `order_id`. Absent ids are a no-op.
    pub fn apply_order_removal(&self, order_id: u64) -> bool {
        let mut state = self.lock();
        if state.orders.remove(&order_id).is_none() {
            return false;
        }
        self.commit(&mut state);
        true
    }

    /// Terminal statuses remove the order, others are recorded in place.
    pub fn apply_order_status(&self, order_id: u64, status: OrderStatus) -> bool {
        if status.is_terminal() {
            return self.apply_order_removal(order_id);
        }
        let mut state = self.lock();
        match state.orders.get_mut(&order_id) {
            Some(order) if order.status != status => order.status = status,
            _ => return false,
        }
        self.commit(&mut state);
        true
    }

    /// Moves the mark of a held position. Ticks for symbols not held never create one.
    pub fn apply_mark_price(&self, symbol: &str, price: Decimal) -> bool {
        let mut state = self.lock();
        match state.positions.get_mut(symbol) {
            Some(position) => position.reprice(price),
            None => return false,
        }
        self.commit(&mut state);
        true
    }
}
