// src/connectors/messages.rs
use crate::error::DecodeError;
use crate::types::{AccountSnapshot, Order, OrderStatus, Position, Side};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// --- REST payloads (USDT-M futures) ---

/// Entry of `GET /fapi/v2/positionRisk`. Numbers arrive as strings.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionRisk {
    pub symbol: String,
    pub position_amt: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    #[serde(rename = "unRealizedProfit")]
    pub unrealized_profit: Decimal,
    pub leverage: Decimal,
}

impl From<PositionRisk> for Position {
    fn from(p: PositionRisk) -> Self {
        Position {
            symbol: p.symbol,
            amount: p.position_amt,
            entry_price: p.entry_price,
            mark_price: p.mark_price,
            leverage: p.leverage,
            unrealized_pnl: p.unrealized_profit,
        }
    }
}

/// Entry of `GET /fapi/v1/openOrders`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenOrder {
    pub order_id: u64,
    pub symbol: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub side: Side,
    pub price: Decimal,
    pub orig_qty: Decimal,
    #[serde(default)]
    pub stop_price: Option<Decimal>,
    pub status: OrderStatus,
}

impl From<OpenOrder> for Order {
    fn from(o: OpenOrder) -> Self {
        Order {
            id: o.order_id,
            symbol: o.symbol,
            order_type: o.order_type,
            side: o.side,
            price: o.price,
            quantity: o.orig_qty,
            // The exchange reports "0" for orders without a trigger.
            stop_price: o.stop_price.filter(|p| !p.is_zero()),
            status: o.status,
        }
    }
}

/// Subset of `GET /fapi/v2/account`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    pub total_wallet_balance: Decimal,
    pub available_balance: Decimal,
    pub total_unrealized_profit: Decimal,
}

impl From<AccountInfo> for AccountSnapshot {
    fn from(a: AccountInfo) -> Self {
        AccountSnapshot {
            wallet_balance: a.total_wallet_balance,
            available_balance: a.available_balance,
            unrealized_pnl: a.total_unrealized_profit,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenKeyResponse {
    pub listen_key: String,
}

// --- User data stream: wss://fstream.binance.com/ws/<listenKey> ---

/// Envelope of the user data stream, discriminated by `e`.
#[derive(Debug, Deserialize)]
#[serde(tag = "e")]
pub enum UserEvent {
    #[serde(rename = "ACCOUNT_UPDATE")]
    AccountUpdate {
        #[serde(rename = "a")]
        update: AccountUpdateData,
    },
    #[serde(rename = "ORDER_TRADE_UPDATE")]
    OrderTradeUpdate {
        #[serde(rename = "o")]
        order: OrderUpdateData,
    },
    #[serde(rename = "listenKeyExpired")]
    ListenKeyExpired,
    #[serde(other)]
    Unknown,
}

/// Only balances are taken from an account update; positions come from the snapshot.
#[derive(Debug, Deserialize)]
pub struct AccountUpdateData {
    #[serde(rename = "B", default)]
    pub balances: Vec<BalanceEntry>,
}

#[derive(Debug, Deserialize)]
pub struct BalanceEntry {
    #[serde(rename = "a")]
    pub asset: String,
    #[serde(rename = "wb")]
    pub wallet_balance: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct OrderUpdateData {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "i")]
    pub order_id: u64,
    #[serde(rename = "X")]
    pub status: OrderStatus,
}

pub fn decode_user_event(text: &str) -> Result<UserEvent, DecodeError> {
    Ok(serde_json::from_str(text)?)
}

// --- Market stream: wss://fstream.binance.com/stream?streams=<symbol>@markPrice@1s/... ---

/// Payload of a `<symbol>@markPrice` topic.
#[derive(Debug, Deserialize)]
pub struct MarkPriceUpdate {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "p")]
    pub mark_price: Decimal,
}

/// Frames seen on a combined stream: topic data or replies to our own requests.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum MarketFrame {
    Tick {
        stream: String,
        data: MarkPriceUpdate,
    },
    Reply {
        id: u64,
        #[serde(default)]
        result: Option<serde_json::Value>,
    },
}

pub fn decode_market_frame(text: &str) -> Result<MarketFrame, DecodeError> {
    Ok(serde_json::from_str(text)?)
}

/// Live (un)subscription request on an open combined stream.
#[derive(Debug, Serialize)]
pub struct SubscribeRequest {
    pub method: &'static str,
    pub params: Vec<String>,
    pub id: u64,
}

pub fn mark_price_topic(symbol: &str) -> String {
    format!("{}@markPrice@1s", symbol.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_account_update_decodes_balances() {
        let msg = r#"{
            "e": "ACCOUNT_UPDATE",
            "E": 1564745798939,
            "T": 1564745798938,
            "a": {
                "m": "ORDER",
                "B": [
                    {"a": "USDT", "wb": "987.65", "cw": "100.12345678", "bc": "50.12345678"},
                    {"a": "BUSD", "wb": "1.00", "cw": "1.00", "bc": "0"}
                ],
                "P": [
                    {"s": "BTCUSDT", "pa": "0.01", "ep": "50000", "cr": "200", "up": "12.5", "mt": "isolated", "iw": "0", "ps": "BOTH"}
                ]
            }
        }"#;

        match decode_user_event(msg).unwrap() {
            UserEvent::AccountUpdate { update } => {
                assert_eq!(update.balances.len(), 2);
                assert_eq!(update.balances[0].asset, "USDT");
                assert_eq!(update.balances[0].wallet_balance, dec("987.65"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_account_update_without_balances() {
        let msg = r#"{"e":"ACCOUNT_UPDATE","a":{"m":"FUNDING_FEE","P":[]}}"#;
        match decode_user_event(msg).unwrap() {
            UserEvent::AccountUpdate { update } => assert!(update.balances.is_empty()),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_order_trade_update_decodes_id_and_status() {
        let msg = r#"{
            "e": "ORDER_TRADE_UPDATE",
            "E": 1568879465651,
            "T": 1568879465650,
            "o": {"s": "BTCUSDT", "c": "TEST", "S": "SELL", "o": "TRAILING_STOP_MARKET",
                  "q": "0.001", "p": "0", "X": "FILLED", "i": 123, "x": "TRADE"}
        }"#;

        match decode_user_event(msg).unwrap() {
            UserEvent::OrderTradeUpdate { order } => {
                assert_eq!(order.order_id, 123);
                assert_eq!(order.status, OrderStatus::Filled);
                assert_eq!(order.symbol, "BTCUSDT");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_and_expiry_tags() {
        let msg = r#"{"e":"MARGIN_CALL","E":1,"cw":"3.16"}"#;
        assert!(matches!(decode_user_event(msg).unwrap(), UserEvent::Unknown));

        let msg = r#"{"e":"listenKeyExpired","E":1576653824250,"listenKey":"abc"}"#;
        assert!(matches!(
            decode_user_event(msg).unwrap(),
            UserEvent::ListenKeyExpired
        ));
    }

    #[test]
    fn test_malformed_user_messages_fail_closed() {
        // Not JSON.
        assert!(decode_user_event("not json").is_err());
        // No discriminator.
        assert!(decode_user_event(r#"{"a":{"B":[]}}"#).is_err());
        // Order id of the wrong type.
        assert!(decode_user_event(r#"{"e":"ORDER_TRADE_UPDATE","o":{"s":"X","i":"abc","X":"FILLED"}}"#).is_err());
        // Unparseable balance is rejected, never zeroed.
        assert!(decode_user_event(r#"{"e":"ACCOUNT_UPDATE","a":{"B":[{"a":"USDT","wb":"n/a"}]}}"#).is_err());
    }

    #[test]
    fn test_market_tick_decodes() {
        let msg = r#"{
            "stream": "btcusdt@markPrice@1s",
            "data": {"e": "markPriceUpdate", "E": 1562305380000, "s": "BTCUSDT",
                     "p": "11794.15000000", "i": "11784.62659091", "P": "11784.25641265",
                     "r": "0.00038167", "T": 1562306400000}
        }"#;

        match decode_market_frame(msg).unwrap() {
            MarketFrame::Tick { stream, data } => {
                assert_eq!(stream, "btcusdt@markPrice@1s");
                assert_eq!(data.symbol, "BTCUSDT");
                assert_eq!(data.mark_price, dec("11794.15"));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_market_reply_and_garbage() {
        let reply = decode_market_frame(r#"{"result":null,"id":7}"#).unwrap();
        assert!(matches!(reply, MarketFrame::Reply { id: 7, result: None }));

        assert!(decode_market_frame(r#"{"stream":"x","data":{"s":"BTCUSDT","p":"oops"}}"#).is_err());
        assert!(decode_market_frame("[]").is_err());
    }

    #[test]
    fn test_rest_payloads_convert() {
        let positions: Vec<PositionRisk> = serde_json::from_str(
            r#"[{"entryPrice":"50000.0","marginType":"isolated","leverage":"10",
                 "markPrice":"50500.0","positionAmt":"0.010","symbol":"BTCUSDT",
                 "unRealizedProfit":"5.0","positionSide":"BOTH"}]"#,
        )
        .unwrap();
        let pos: Position = positions.into_iter().next().unwrap().into();
        assert_eq!(pos.leverage, dec("10"));
        assert_eq!(pos.amount, dec("0.01"));

        let orders: Vec<OpenOrder> = serde_json::from_str(
            r#"[{"orderId":123,"symbol":"BTCUSDT","type":"LIMIT","side":"BUY","price":"49000",
                 "origQty":"0.01","stopPrice":"0","status":"NEW","timeInForce":"GTC"},
                {"orderId":124,"symbol":"BTCUSDT","type":"STOP_MARKET","side":"SELL","price":"0",
                 "origQty":"0.01","stopPrice":"45000","status":"NEW"}]"#,
        )
        .unwrap();
        let orders: Vec<Order> = orders.into_iter().map(Order::from).collect();
        assert_eq!(orders[0].stop_price, None);
        assert_eq!(orders[0].side, Side::Buy);
        assert_eq!(orders[1].stop_price, Some(dec("45000")));
        assert_eq!(orders[1].order_type, "STOP_MARKET");

        let account: AccountInfo = serde_json::from_str(
            r#"{"totalWalletBalance":"1000.5","availableBalance":"900","totalUnrealizedProfit":"-3.2",
                "assets":[]}"#,
        )
        .unwrap();
        let account: AccountSnapshot = account.into();
        assert_eq!(account.unrealized_pnl, dec("-3.2"));
    }

    #[test]
    fn test_topic_is_lowercase() {
        assert_eq!(mark_price_topic("BTCUSDT"), "btcusdt@markPrice@1s");
    }
}
