//! Market channel wire messages
//!
//! The market feed delivers JSON frames that are either a single event
//! object or an array of event objects. Three event types matter here:
//! "book" (full snapshot), "price_change" (level deltas) and
//! "last_trade_price" (trade print). Anything else is skipped.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::domain::orderbook::PriceLevel;

// =============================================================================
// Outbound
// =============================================================================

/// Subscription request for the market channel. The server treats each
/// frame as the complete desired set, so removals are effected by sending
/// the new full set.
#[derive(Debug, Clone, Serialize)]
pub struct SubscribeFrame {
    #[serde(rename = "type")]
    pub channel: &'static str,
    pub assets_ids: Vec<String>,
}

impl SubscribeFrame {
    pub fn market(assets_ids: Vec<String>) -> Self {
        Self {
            channel: "Market",
            assets_ids,
        }
    }
}

// =============================================================================
// Inbound
// =============================================================================

/// Full snapshot of one asset's book.
#[derive(Debug, Clone, Deserialize)]
pub struct BookEvent {
    pub asset_id: String,
    #[serde(default)]
    pub market: String,
    #[serde(alias = "buys")]
    pub bids: Vec<PriceLevel>,
    #[serde(alias = "sells")]
    pub asks: Vec<PriceLevel>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub hash: Option<String>,
}

/// One level delta within a price_change event.
#[derive(Debug, Clone, Deserialize)]
pub struct LevelChange {
    pub price: Decimal,
    pub size: Decimal,
    pub side: String,
}

/// Level deltas for one asset. The feed usually sends one flat
/// `{price, size, side}` delta per frame; some server versions batch
/// several under a `changes` array. Both shapes normalize here.
#[derive(Debug, Clone)]
pub struct PriceChangeEvent {
    pub asset_id: String,
    pub market: String,
    pub changes: Vec<LevelChange>,
    pub timestamp: Option<String>,
}

#[derive(Deserialize)]
struct FlatPriceChange {
    asset_id: String,
    #[serde(default)]
    market: String,
    price: Decimal,
    size: Decimal,
    side: String,
    #[serde(default)]
    timestamp: Option<String>,
}

#[derive(Deserialize)]
struct BatchedPriceChange {
    asset_id: String,
    #[serde(default)]
    market: String,
    changes: Vec<LevelChange>,
    #[serde(default)]
    timestamp: Option<String>,
}

impl<'de> serde::Deserialize<'de> for PriceChangeEvent {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        if value.get("changes").is_some() {
            let batched: BatchedPriceChange =
                serde_json::from_value(value).map_err(serde::de::Error::custom)?;
            Ok(PriceChangeEvent {
                asset_id: batched.asset_id,
                market: batched.market,
                changes: batched.changes,
                timestamp: batched.timestamp,
            })
        } else {
            let flat: FlatPriceChange =
                serde_json::from_value(value).map_err(serde::de::Error::custom)?;
            Ok(PriceChangeEvent {
                asset_id: flat.asset_id,
                market: flat.market,
                changes: vec![LevelChange {
                    price: flat.price,
                    size: flat.size,
                    side: flat.side,
                }],
                timestamp: flat.timestamp,
            })
        }
    }
}

/// Trade print. Consumed for logging only; it does not touch the replica.
#[derive(Debug, Clone, Deserialize)]
pub struct LastTradePriceEvent {
    pub asset_id: String,
    pub price: Decimal,
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default)]
    pub size: Option<Decimal>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Parsed market channel event.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    Book(BookEvent),
    PriceChange(PriceChangeEvent),
    LastTradePrice(LastTradePriceEvent),
}

impl FeedEvent {
    pub fn asset_id(&self) -> &str {
        match self {
            FeedEvent::Book(e) => &e.asset_id,
            FeedEvent::PriceChange(e) => &e.asset_id,
            FeedEvent::LastTradePrice(e) => &e.asset_id,
        }
    }
}

/// Parse one text frame into zero or more events. Unknown event types
/// and malformed entries are logged and skipped so one bad message never
/// tears down the connection.
pub fn parse_frame(text: &str) -> Vec<FeedEvent> {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            debug!("[Feed] Unparseable frame ({}): {}", e, truncate(text));
            return Vec::new();
        }
    };

    match value {
        Value::Array(items) => items.into_iter().filter_map(parse_event).collect(),
        obj @ Value::Object(_) => parse_event(obj).into_iter().collect(),
        _ => Vec::new(),
    }
}

fn parse_event(value: Value) -> Option<FeedEvent> {
    let event_type = value.get("event_type")?.as_str()?.to_string();
    let parsed = match event_type.as_str() {
        "book" => serde_json::from_value(value).map(FeedEvent::Book),
        "price_change" => serde_json::from_value(value).map(FeedEvent::PriceChange),
        "last_trade_price" => serde_json::from_value(value).map(FeedEvent::LastTradePrice),
        other => {
            debug!("[Feed] Skipping event_type '{}'", other);
            return None;
        }
    };
    match parsed {
        Ok(event) => Some(event),
        Err(e) => {
            debug!("[Feed] Malformed '{}' event: {}", event_type, e);
            None
        }
    }
}

fn truncate(text: &str) -> &str {
    let end = text
        .char_indices()
        .nth(200)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_subscribe_frame_shape() {
        let frame = SubscribeFrame::market(vec!["a1".to_string(), "a2".to_string()]);
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "Market", "assets_ids": ["a1", "a2"]})
        );
    }

    #[test]
    fn test_parse_book_event() {
        let text = r#"{
            "event_type": "book",
            "asset_id": "asset-1",
            "market": "0xabc",
            "bids": [{"price": "0.48", "size": "100"}],
            "asks": [{"price": "0.52", "size": "50"}],
            "timestamp": "123456789",
            "hash": "deadbeef"
        }"#;
        let events = parse_frame(text);
        assert_eq!(events.len(), 1);
        match &events[0] {
            FeedEvent::Book(book) => {
                assert_eq!(book.asset_id, "asset-1");
                assert_eq!(book.bids[0].price, d("0.48"));
                assert_eq!(book.asks[0].size, d("50"));
            }
            other => panic!("expected book, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_flat_price_change() {
        let text = r#"{
            "event_type": "price_change",
            "asset_id": "asset-1",
            "price": "0.48",
            "size": "0",
            "side": "BUY"
        }"#;
        let events = parse_frame(text);
        assert_eq!(events.len(), 1);
        match &events[0] {
            FeedEvent::PriceChange(pc) => {
                assert_eq!(pc.changes.len(), 1);
                assert_eq!(pc.changes[0].price, d("0.48"));
                assert_eq!(pc.changes[0].size, Decimal::ZERO);
                assert_eq!(pc.changes[0].side, "BUY");
            }
            other => panic!("expected price_change, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_batched_price_change() {
        let text = r#"{
            "event_type": "price_change",
            "asset_id": "asset-1",
            "market": "0xabc",
            "changes": [
                {"price": "0.48", "size": "0", "side": "BUY"},
                {"price": "0.52", "size": "75", "side": "SELL"}
            ]
        }"#;
        let events = parse_frame(text);
        assert_eq!(events.len(), 1);
        match &events[0] {
            FeedEvent::PriceChange(pc) => {
                assert_eq!(pc.changes.len(), 2);
                assert_eq!(pc.changes[0].size, Decimal::ZERO);
                assert_eq!(pc.changes[1].side, "SELL");
            }
            other => panic!("expected price_change, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_array_frame() {
        let text = r#"[
            {"event_type": "book", "asset_id": "a1", "bids": [], "asks": []},
            {"event_type": "last_trade_price", "asset_id": "a1", "price": "0.50"}
        ]"#;
        let events = parse_frame(text);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], FeedEvent::Book(_)));
        assert!(matches!(events[1], FeedEvent::LastTradePrice(_)));
    }

    #[test]
    fn test_unknown_event_type_skipped() {
        let text = r#"{"event_type": "tick_size_change", "asset_id": "a1"}"#;
        assert!(parse_frame(text).is_empty());
    }

    #[test]
    fn test_garbage_frame_yields_nothing() {
        assert!(parse_frame("PONG").is_empty());
        assert!(parse_frame("{not json").is_empty());
    }
}
