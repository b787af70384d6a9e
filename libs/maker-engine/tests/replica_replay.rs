//! Replay semantics of the order book replica.

use std::collections::BTreeMap;

use maker_engine::domain::orderbook::{OrderBookReplica, PriceLevel, Side};
use maker_engine::feed::{parse_frame, FeedEvent};
use rust_decimal::Decimal;

fn d(s: &str) -> Decimal {
    s.parse().unwrap()
}

fn level(price: &str, size: &str) -> PriceLevel {
    PriceLevel::new(d(price), d(size))
}

enum Event {
    Snapshot(Vec<PriceLevel>, Vec<PriceLevel>),
    Delta(Side, Decimal, Decimal),
}

fn apply_to_replica(events: &[Event]) -> OrderBookReplica {
    let mut replica = OrderBookReplica::new("a1".to_string());
    for event in events {
        match event {
            Event::Snapshot(bids, asks) => replica.apply_snapshot(bids, asks),
            Event::Delta(side, price, size) => {
                replica.apply_delta(*side, *price, *size).unwrap();
            }
        }
    }
    replica
}

/// Fold the same events onto plain maps with "size 0 deletes" semantics.
fn apply_to_maps(events: &[Event]) -> (BTreeMap<Decimal, Decimal>, BTreeMap<Decimal, Decimal>) {
    let mut bids = BTreeMap::new();
    let mut asks = BTreeMap::new();
    for event in events {
        match event {
            Event::Snapshot(snapshot_bids, snapshot_asks) => {
                bids.clear();
                asks.clear();
                for l in snapshot_bids {
                    if l.size > Decimal::ZERO {
                        bids.insert(l.price, l.size);
                    }
                }
                for l in snapshot_asks {
                    if l.size > Decimal::ZERO {
                        asks.insert(l.price, l.size);
                    }
                }
            }
            Event::Delta(side, price, size) => {
                let map = match side {
                    Side::Bid => &mut bids,
                    Side::Ask => &mut asks,
                };
                if size.is_zero() {
                    map.remove(price);
                } else {
                    map.insert(*price, *size);
                }
            }
        }
    }
    (bids, asks)
}

fn replica_maps(
    replica: &OrderBookReplica,
) -> (BTreeMap<Decimal, Decimal>, BTreeMap<Decimal, Decimal>) {
    let bids = replica.bids().levels().map(|l| (l.price, l.size)).collect();
    let asks = replica.asks().levels().map(|l| (l.price, l.size)).collect();
    (bids, asks)
}

#[test]
fn replaying_events_matches_plain_map_fold() {
    let events = vec![
        Event::Snapshot(
            vec![level("0.48", "100"), level("0.47", "200"), level("0.45", "50")],
            vec![level("0.52", "100"), level("0.55", "300")],
        ),
        Event::Delta(Side::Bid, d("0.48"), d("150")),
        Event::Delta(Side::Ask, d("0.52"), d("0")),
        Event::Delta(Side::Bid, d("0.46"), d("75")),
        Event::Snapshot(vec![level("0.50", "10")], vec![level("0.51", "20")]),
        Event::Delta(Side::Bid, d("0.50"), d("0")),
        Event::Delta(Side::Bid, d("0.49"), d("40")),
    ];

    let replica = apply_to_replica(&events);
    assert_eq!(replica_maps(&replica), apply_to_maps(&events));
}

#[test]
fn best_bid_never_above_best_ask_through_valid_sequence() {
    let events = vec![
        Event::Snapshot(
            vec![level("0.48", "100"), level("0.47", "200")],
            vec![level("0.52", "100")],
        ),
        Event::Delta(Side::Bid, d("0.49"), d("50")),
        Event::Delta(Side::Ask, d("0.51"), d("80")),
        Event::Delta(Side::Bid, d("0.49"), d("0")),
        Event::Delta(Side::Ask, d("0.50"), d("10")),
    ];

    let mut replica = OrderBookReplica::new("a1".to_string());
    for event in &events {
        match event {
            Event::Snapshot(bids, asks) => replica.apply_snapshot(bids, asks),
            Event::Delta(side, price, size) => {
                replica.apply_delta(*side, *price, *size).unwrap();
            }
        }
        if let (Some(bid), Some(ask)) = (replica.best_bid(), replica.best_ask()) {
            assert!(bid.price <= ask.price, "crossed at {:?}", (bid, ask));
        }
    }
}

#[test]
fn delete_at_touch_scenario_from_wire_frames() {
    let book = r#"{
        "event_type": "book",
        "asset_id": "a1",
        "bids": [{"price": "0.48", "size": "100"}, {"price": "0.47", "size": "200"}],
        "asks": [{"price": "0.52", "size": "100"}]
    }"#;
    let delta = r#"{
        "event_type": "price_change",
        "asset_id": "a1",
        "side": "BUY",
        "price": "0.48",
        "size": "0"
    }"#;

    let mut replica = OrderBookReplica::new("a1".to_string());
    for frame in [book, delta] {
        for event in parse_frame(frame) {
            match event {
                FeedEvent::Book(b) => replica.apply_snapshot(&b.bids, &b.asks),
                FeedEvent::PriceChange(pc) => {
                    for change in &pc.changes {
                        let side = Side::from_wire(&change.side).unwrap();
                        replica.apply_delta(side, change.price, change.size).unwrap();
                    }
                }
                FeedEvent::LastTradePrice(_) => {}
            }
        }
    }

    let (bids, asks) = replica_maps(&replica);
    assert_eq!(bids, BTreeMap::from([(d("0.47"), d("200"))]));
    assert_eq!(asks, BTreeMap::from([(d("0.52"), d("100"))]));
}
