//! Read-only stock statements derived from ledger entries.
//!
//! Every function here takes a slice of entries and filters it to one item;
//! callers usually pass the output of `MovementLedger::movements`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use stockledger_core::ItemId;

use crate::movement::{MovementEntry, sort_chronologically};
use crate::period::YearMonth;

fn item_entries(entries: &[MovementEntry], item_id: ItemId) -> Vec<MovementEntry> {
    let mut own: Vec<MovementEntry> = entries
        .iter()
        .filter(|e| e.item_id() == item_id)
        .cloned()
        .collect();
    sort_chronologically(&mut own);
    own
}

/// Balance carried into `month`: the after-quantity of the last entry before it.
pub fn opening_balance(entries: &[MovementEntry], item_id: ItemId, month: YearMonth) -> i64 {
    let start = month.start();
    item_entries(entries, item_id)
        .iter()
        .rev()
        .find(|e| e.occurred_at() < start)
        .map(|e| e.after())
        .unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthlyStatement {
    pub item_id: ItemId,
    pub month: YearMonth,
    pub opening: i64,
    pub inbound: i64,
    pub outbound: i64,
    pub net: i64,
    pub closing: i64,
    pub movements: Vec<MovementEntry>,
}

pub fn monthly_statement(
    entries: &[MovementEntry],
    item_id: ItemId,
    month: YearMonth,
) -> MonthlyStatement {
    let opening = opening_balance(entries, item_id, month);
    let movements: Vec<MovementEntry> = item_entries(entries, item_id)
        .into_iter()
        .filter(|e| month.contains(e.occurred_at()))
        .collect();

    let (inbound, outbound) = split_flows(&movements);
    let net = inbound - outbound;

    MonthlyStatement {
        item_id,
        month,
        opening,
        inbound,
        outbound,
        net,
        closing: opening + net,
        movements,
    }
}

fn split_flows(entries: &[MovementEntry]) -> (i64, i64) {
    entries.iter().fold((0, 0), |(inb, out), e| {
        if e.delta() > 0 {
            (inb + e.delta(), out)
        } else {
            (inb, out - e.delta())
        }
    })
}

/// One row of the per-month audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthAudit {
    pub month: YearMonth,
    pub opening: i64,
    pub closing: i64,
    pub transactions: usize,
    pub net_change: i64,
}

/// Opening/closing per month with activity, oldest first.
///
/// Opening is the first entry's `before` and closing the last entry's `after`,
/// so a gap between one row's closing and the next row's opening is visible here.
pub fn monthly_audit(entries: &[MovementEntry], item_id: ItemId) -> Vec<MonthAudit> {
    let mut by_month: BTreeMap<YearMonth, Vec<MovementEntry>> = BTreeMap::new();
    for entry in item_entries(entries, item_id) {
        by_month
            .entry(YearMonth::from_datetime(entry.occurred_at()))
            .or_default()
            .push(entry);
    }

    by_month
        .into_iter()
        .filter_map(|(month, rows)| {
            let first = rows.first()?;
            let last = rows.last()?;
            Some(MonthAudit {
                month,
                opening: first.before(),
                closing: last.after(),
                transactions: rows.len(),
                net_change: rows.iter().map(MovementEntry::delta).sum(),
            })
        })
        .collect()
}

/// All-time movement totals for an item compared with its live balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CumulativePosition {
    pub item_id: ItemId,
    pub total_inbound: i64,
    pub total_outbound: i64,
    pub net: i64,
    pub current_balance: i64,
    pub movement_count: usize,
    pub first_movement_at: Option<DateTime<Utc>>,
    pub last_movement_at: Option<DateTime<Utc>>,
    /// `net == current_balance`.
    pub matches: bool,
}

impl CumulativePosition {
    pub fn difference(&self) -> i64 {
        self.current_balance - self.net
    }
}

pub fn cumulative_position(
    item_id: ItemId,
    entries: &[MovementEntry],
    current_balance: i64,
) -> CumulativePosition {
    let own = item_entries(entries, item_id);
    let (total_inbound, total_outbound) = split_flows(&own);
    let net = total_inbound - total_outbound;

    CumulativePosition {
        item_id,
        total_inbound,
        total_outbound,
        net,
        current_balance,
        movement_count: own.len(),
        first_movement_at: own.first().map(MovementEntry::occurred_at),
        last_movement_at: own.last().map(MovementEntry::occurred_at),
        matches: net == current_balance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::movement::{MovementKind, MovementParts};
    use chrono::TimeZone;
    use stockledger_core::{ActorId, LotId};

    fn entry(seq: u64, item: ItemId, before: i64, delta: i64, at: DateTime<Utc>) -> MovementEntry {
        MovementEntry::from_parts(MovementParts {
            sequence: seq,
            item_id: item,
            delta,
            kind: if delta > 0 { MovementKind::Purchase } else { MovementKind::Sale },
            reference: LotId::new(format!("B-{seq}")).unwrap(),
            before,
            after: before + delta,
            occurred_at: at,
            actor: ActorId::new(),
            note: None,
            reverses: None,
        })
        .unwrap()
    }

    fn at(m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, m, d, 10, 0, 0).unwrap()
    }

    fn sample(item: ItemId) -> Vec<MovementEntry> {
        vec![
            entry(1, item, 0, 100, at(1, 5)),
            entry(2, item, 100, -30, at(1, 20)),
            entry(3, item, 70, 50, at(3, 2)),
            entry(4, item, 120, -20, at(3, 9)),
        ]
    }

    #[test]
    fn opening_balance_carries_previous_closing() {
        let item = ItemId::new();
        let entries = sample(item);

        assert_eq!(opening_balance(&entries, item, YearMonth::new(2024, 1).unwrap()), 0);
        assert_eq!(opening_balance(&entries, item, YearMonth::new(2024, 2).unwrap()), 70);
        assert_eq!(opening_balance(&entries, item, YearMonth::new(2024, 4).unwrap()), 100);
    }

    #[test]
    fn monthly_statement_totals() {
        let item = ItemId::new();
        let statement = monthly_statement(&sample(item), item, YearMonth::new(2024, 3).unwrap());

        assert_eq!(statement.opening, 70);
        assert_eq!(statement.inbound, 50);
        assert_eq!(statement.outbound, 20);
        assert_eq!(statement.net, 30);
        assert_eq!(statement.closing, 100);
        assert_eq!(statement.movements.len(), 2);
    }

    #[test]
    fn quiet_month_has_no_movements() {
        let item = ItemId::new();
        let statement = monthly_statement(&sample(item), item, YearMonth::new(2024, 2).unwrap());
        assert_eq!(statement.opening, 70);
        assert_eq!(statement.closing, 70);
        assert!(statement.movements.is_empty());
    }

    #[test]
    fn audit_lists_only_active_months() {
        let item = ItemId::new();
        let mut entries = sample(item);
        entries.push(entry(5, ItemId::new(), 0, 9, at(2, 1)));

        let audit = monthly_audit(&entries, item);

        assert_eq!(audit.len(), 2);
        assert_eq!(audit[0].month.to_string(), "2024-01");
        assert_eq!((audit[0].opening, audit[0].closing), (0, 70));
        assert_eq!(audit[1].transactions, 2);
        assert_eq!(audit[1].net_change, 30);
    }

    #[test]
    fn cumulative_position_flags_mismatch() {
        let item = ItemId::new();
        let entries = sample(item);

        let ok = cumulative_position(item, &entries, 100);
        assert!(ok.matches);
        assert_eq!((ok.total_inbound, ok.total_outbound), (150, 50));

        let off = cumulative_position(item, &entries, 90);
        assert!(!off.matches);
        assert_eq!(off.difference(), -10);
    }
}
