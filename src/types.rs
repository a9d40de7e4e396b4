// src/types.rs
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

/// Order lifecycle as reported by the exchange (`X` on order updates, `status` over REST).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Expired,
    ExpiredInMatch,
    Rejected,
    #[serde(other)]
    Unknown,
}

impl OrderStatus {
    /// No further transitions happen after a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Canceled
                | OrderStatus::Expired
                | OrderStatus::ExpiredInMatch
                | OrderStatus::Rejected
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Canceled => "CANCELED",
            OrderStatus::Expired => "EXPIRED",
            OrderStatus::ExpiredInMatch => "EXPIRED_IN_MATCH",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    /// Signed: negative for shorts.
    pub amount: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub leverage: Decimal,
    pub unrealized_pnl: Decimal,
}

impl Position {
    /// Margin committed to the position: `|amount| * entry_price / leverage`.
    ///
    /// Zero when leverage is non-positive or the product does not fit a `Decimal`.
    pub fn investment(&self) -> Decimal {
        if self.leverage <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        self.amount
            .abs()
            .checked_mul(self.entry_price)
            .and_then(|notional| notional.checked_div(self.leverage))
            .unwrap_or(Decimal::ZERO)
    }

    /// Return on equity in percent. Always derived from the other fields, reported as 0
    /// whenever the investment is not positive.
    pub fn roe(&self) -> Decimal {
        let investment = self.investment();
        if investment <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        self.unrealized_pnl
            .checked_div(investment)
            .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
            .unwrap_or(Decimal::ZERO)
    }

    /// Moves the mark and re-prices the unrealized PnL against the entry.
    pub fn reprice(&mut self, mark_price: Decimal) {
        self.mark_price = mark_price;
        if let Some(pnl) = mark_price
            .checked_sub(self.entry_price)
            .and_then(|diff| diff.checked_mul(self.amount))
        {
            self.unrealized_pnl = pnl;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: u64,
    pub symbol: String,
    pub order_type: String,
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
    pub stop_price: Option<Decimal>,
    pub status: OrderStatus,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub wallet_balance: Decimal,
    pub available_balance: Decimal,
    pub unrealized_pnl: Decimal,
}

/// Everything the REST side hands over at session start.
#[derive(Debug, Default, Clone)]
pub struct Snapshot {
    pub positions: Vec<Position>,
    pub orders: Vec<Order>,
    pub account: AccountSnapshot,
}

/// Immutable copy of the store handed to the renderer.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StateView {
    pub revision: u64,
    pub positions: Vec<Position>,
    pub orders: Vec<Order>,
    pub account: AccountSnapshot,
    /// Asset the balances above are denominated in.
    pub balance_asset: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    User,
    Market,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::User => f.write_str("user"),
            StreamKind::Market => f.write_str("market"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Closed,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StreamState::Disconnected => "disconnected",
            StreamState::Connecting => "connecting",
            StreamState::Connected => "connected",
            StreamState::Closed => "closed",
        };
        f.write_str(label)
    }
}

// --- TUI feed ---

#[derive(Debug, Clone)]
pub enum UiEvent {
    State(StateView),
    Stream(StreamKind, StreamState),
    Log(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn btc_position() -> Position {
        Position {
            symbol: "BTCUSDT".to_string(),
            amount: dec("0.01"),
            entry_price: dec("50000"),
            mark_price: dec("55000"),
            leverage: dec("10"),
            unrealized_pnl: dec("50"),
        }
    }

    #[test]
    fn test_roe_from_snapshot_values() {
        let pos = btc_position();
        assert_eq!(pos.investment(), dec("50"));
        assert_eq!(pos.roe(), dec("100"));
    }

    #[test]
    fn test_roe_short_position_uses_absolute_amount() {
        let pos = Position {
            amount: dec("-0.01"),
            unrealized_pnl: dec("-25"),
            ..btc_position()
        };
        assert_eq!(pos.investment(), dec("50"));
        assert_eq!(pos.roe(), dec("-50"));
    }

    #[test]
    fn test_roe_is_zero_without_investment() {
        let zero_amount = Position {
            amount: Decimal::ZERO,
            ..btc_position()
        };
        assert_eq!(zero_amount.roe(), Decimal::ZERO);

        let zero_entry = Position {
            entry_price: Decimal::ZERO,
            ..btc_position()
        };
        assert_eq!(zero_entry.roe(), Decimal::ZERO);

        let zero_leverage = Position {
            leverage: Decimal::ZERO,
            ..btc_position()
        };
        assert_eq!(zero_leverage.investment(), Decimal::ZERO);
        assert_eq!(zero_leverage.roe(), Decimal::ZERO);

        let negative_leverage = Position {
            leverage: dec("-5"),
            ..btc_position()
        };
        assert_eq!(negative_leverage.roe(), Decimal::ZERO);
    }

    #[test]
    fn test_roe_overflow_reports_zero() {
        let pos = Position {
            amount: Decimal::MAX,
            entry_price: Decimal::MAX,
            ..btc_position()
        };
        assert_eq!(pos.roe(), Decimal::ZERO);
    }

    #[test]
    fn test_reprice_long_and_short() {
        let mut long = btc_position();
        long.reprice(dec("51000"));
        assert_eq!(long.mark_price, dec("51000"));
        assert_eq!(long.unrealized_pnl, dec("10"));
        assert_eq!(long.roe(), dec("20"));

        let mut short = Position {
            amount: dec("-0.01"),
            ..btc_position()
        };
        short.reprice(dec("51000"));
        assert_eq!(short.unrealized_pnl, dec("-10"));
        assert_eq!(short.roe(), dec("-20"));
    }

    #[test]
    fn test_terminal_statuses() {
        for status in [
            OrderStatus::Filled,
            OrderStatus::Canceled,
            OrderStatus::Expired,
            OrderStatus::ExpiredInMatch,
            OrderStatus::Rejected,
        ] {
            assert!(status.is_terminal(), "{status} should be terminal");
        }
        for status in [
            OrderStatus::New,
            OrderStatus::PartiallyFilled,
            OrderStatus::Unknown,
        ] {
            assert!(!status.is_terminal(), "{status} should not be terminal");
        }
    }

    #[test]
    fn test_status_wire_names() {
        let status: OrderStatus = serde_json::from_str("\"PARTIALLY_FILLED\"").unwrap();
        assert_eq!(status, OrderStatus::PartiallyFilled);
        let status: OrderStatus = serde_json::from_str("\"EXPIRED_IN_MATCH\"").unwrap();
        assert_eq!(status, OrderStatus::ExpiredInMatch);
        let status: OrderStatus = serde_json::from_str("\"SOMETHING_NEW\"").unwrap();
        assert_eq!(status, OrderStatus::Unknown);
    }
}
