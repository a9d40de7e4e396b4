// src/tui/report.rs
use crate::types::StateView;
use std::fmt::Write;

const RULE_WIDTH: usize = 50;

/// Plain-text account report for one state view. No side effects, no memory between calls.
pub fn render(view: &StateView) -> String {
    let rule = "-".repeat(RULE_WIDTH);
    let mut out = String::new();

    let account = &view.account;
    let asset = &view.balance_asset;
    let _ = writeln!(out, "=== ACCOUNT ===");
    let _ = writeln!(out, "Wallet Balance:    {} {asset}", account.wallet_balance);
    let _ = writeln!(out, "Available Balance: {} {asset}", account.available_balance);
    let _ = writeln!(out, "Unrealized PNL:    {} {asset}", account.unrealized_pnl);
    let _ = writeln!(out, "{rule}");

    if view.positions.is_empty() {
        let _ = writeln!(out, "\n=== NO OPEN POSITIONS ===");
        let _ = writeln!(out, "{rule}");
    } else {
        let _ = writeln!(out, "\n=== OPEN POSITIONS ===");
        for pos in &view.positions {
            let _ = writeln!(out, "\nSymbol:      {}", pos.symbol);
            let _ = writeln!(out, "Amount:      {}", pos.amount);
            let _ = writeln!(out, "Leverage:    {}x", pos.leverage);
            let _ = writeln!(out, "Entry Price: {}", pos.entry_price);
            let _ = writeln!(out, "Mark Price:  {}", pos.mark_price);
            let _ = writeln!(out, "PNL:         {}", pos.unrealized_pnl.round_dp(4));
            let _ = writeln!(out, "ROE:         {:.2}%", pos.roe());
            let _ = writeln!(out, "{rule}");
        }
    }

    if view.orders.is_empty() {
        let _ = writeln!(out, "\n=== NO OPEN ORDERS ===");
        let _ = writeln!(out, "{rule}");
    } else {
        let _ = writeln!(out, "\n=== OPEN ORDERS ===");
        for order in &view.orders {
            let _ = writeln!(out, "\nOrder ID:   {}", order.id);
            let _ = writeln!(out, "Symbol:     {}", order.symbol);
            let _ = writeln!(out, "Type:       {}", order.order_type);
            let _ = writeln!(out, "Side:       {}", order.side.as_str());
            let _ = writeln!(out, "Price:      {}", order.price);
            let _ = writeln!(out, "Quantity:   {}", order.quantity);
            if let Some(stop) = order.stop_price {
                let _ = writeln!(out, "Stop Price: {}", stop);
            }
            let _ = writeln!(out, "Status:     {}", order.status);
            let _ = writeln!(out, "{rule}");
        }
    }

    out
}
