#![allow(dead_code)]

use std::collections::HashMap;

use lobtraj::engine::types::RawRecord;
use lobtraj::engine::{ActionLog, LogOptions};

pub const SELL: u64 = 1;
pub const BUY: u64 = 2;

#[derive(Debug, Clone, Copy)]
struct Live {
    reference: u64,
    side: u64,
    price: u64,
    remaining: u64,
}

/// Turn arbitrary `(op, a, b)` triples into a consistent order-event stream:
/// every reduction targets a live order and never exceeds its remainder.
pub fn interpret(ops: &[(u8, u16, u16)]) -> Vec<RawRecord> {
    let mut live: Vec<Live> = Vec::new();
    let mut records = Vec::with_capacity(ops.len());
    let mut next_reference = 1u64;
    let mut ts = 1_000u64;

    for &(op, a, b) in ops {
        let (a, b) = (a as u64, b as u64);
        ts += a % 3;

        if live.is_empty() || op % 5 == 0 {
            let side = if b % 2 == 0 { BUY } else { SELL };
            let price = if side == BUY { 1_000 - a % 10 } else { 1_001 + a % 10 };
            let shares = 1 + b % 200;
            records.push([0, ts, next_reference, shares, price, side, 0, 7, 0]);
            live.push(Live {
                reference: next_reference,
                side,
                price,
                remaining: shares,
            });
            next_reference += 1;
            continue;
        }

        let slot = (a as usize) % live.len();
        let order = live[slot];
        match op % 5 {
            1 | 2 => {
                let kind = if op % 5 == 1 { 4 } else { 2 };
                let shares = 1 + b % order.remaining;
                records.push([kind, ts, order.reference, shares, 0, order.side, order.remaining, 0, 0]);
                if shares == order.remaining {
                    live.remove(slot);
                } else {
                    live[slot].remaining -= shares;
                }
            }
            3 => {
                records.push([1, ts, order.reference, order.remaining, order.price, order.side, order.remaining, 0, 0]);
                live.remove(slot);
            }
            _ => {
                let shares = 1 + b % 200;
                let price = if order.side == BUY { 1_000 - b % 10 } else { 1_001 + b % 10 };
                records.push([3, ts, next_reference, shares, price, order.side, order.remaining, order.reference, 0]);
                live[slot] = Live {
                    reference: next_reference,
                    side: order.side,
                    price,
                    remaining: shares,
                };
                next_reference += 1;
            }
        }
    }
    link(records)
}

/// Chain each order-bearing record to the next one touching the same order;
/// a replace continues the chain of the order it retires.
pub fn link(mut records: Vec<RawRecord>) -> Vec<RawRecord> {
    let mut last: HashMap<u64, usize> = HashMap::new();
    for index in 0..records.len() {
        let kind = records[index][0];
        let reference = records[index][2];
        let previous = match kind {
            0 => None,
            3 => last.remove(&records[index][7]),
            6 | 7 => continue,
            _ => last.get(&reference).copied(),
        };
        if let Some(previous) = previous {
            records[previous][8] = index as u64;
        }
        if kind == 1 {
            last.remove(&reference);
        } else {
            last.insert(reference, index);
        }
    }
    records
}

pub fn log(records: Vec<RawRecord>) -> ActionLog {
    ActionLog::from_records(records, LogOptions::default()).expect("valid log")
}
