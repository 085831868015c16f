//! Continuity verifier.
//!
//! Read-only audit over ledger entries. Two independent checks run:
//!
//! * **Month boundaries**: for every pair of adjacent months with activity the
//!   closing `after` of the earlier month must equal the opening `before` of
//!   the later one.
//! * **First-day zeroing**: an outbound entry on the 1st of a month that leaves
//!   the balance at exactly zero is reported as a suspected reset, even when the
//!   chain itself is continuous.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use stockledger_core::{ItemId, LotId};

use crate::movement::{MovementEntry, MovementKind, sort_chronologically};
use crate::period::{YearMonth, is_first_day_of_month};
use crate::statement::CumulativePosition;

/// What to check. Unset bounds are open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ContinuityScope {
    pub item_id: Option<ItemId>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl ContinuityScope {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_item(item_id: ItemId) -> Self {
        Self {
            item_id: Some(item_id),
            ..Self::default()
        }
    }

    pub fn between(mut self, since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self.until = Some(until);
        self
    }

    fn includes(&self, entry: &MovementEntry) -> bool {
        self.item_id.is_none_or(|id| id == entry.item_id())
            && self.since.is_none_or(|s| entry.occurred_at() >= s)
            && self.until.is_none_or(|u| entry.occurred_at() <= u)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscontinuityKind {
    /// The later month opened at exactly zero.
    Reset,
    Gap,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Discontinuity {
    pub item_id: ItemId,
    pub closing_month: YearMonth,
    pub opening_month: YearMonth,
    pub closing_balance: i64,
    pub opening_balance: i64,
    /// `opening_balance - closing_balance`.
    pub difference: i64,
    pub kind: DiscontinuityKind,
    pub closing_sequence: u64,
    pub opening_sequence: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuspectedReset {
    pub item_id: ItemId,
    pub sequence: u64,
    pub occurred_at: DateTime<Utc>,
    pub kind: MovementKind,
    pub reference: LotId,
    pub before: i64,
    pub delta: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Fail,
}

impl CheckStatus {
    fn from_clean(clean: bool) -> Self {
        if clean { CheckStatus::Pass } else { CheckStatus::Fail }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContinuityReport {
    pub generated_at: DateTime<Utc>,
    pub scope: ContinuityScope,
    pub items_checked: usize,
    pub month_boundaries_checked: usize,
    pub boundary_status: CheckStatus,
    pub discontinuities: Vec<Discontinuity>,
    pub reset_status: CheckStatus,
    pub suspected_resets: Vec<SuspectedReset>,
    /// Filled by callers that also know live balances.
    pub cumulative_mismatches: Vec<CumulativePosition>,
}

impl ContinuityReport {
    /// Number of month-boundary violations.
    pub fn violation_count(&self) -> usize {
        self.discontinuities.len()
    }

    pub fn status(&self) -> CheckStatus {
        CheckStatus::from_clean(
            self.boundary_status == CheckStatus::Pass
                && self.reset_status == CheckStatus::Pass
                && self.cumulative_mismatches.is_empty(),
        )
    }

    pub fn passed(&self) -> bool {
        self.status() == CheckStatus::Pass
    }

    /// Attach replayability results; only mismatching positions are kept.
    pub fn with_cumulative_positions(
        mut self,
        positions: impl IntoIterator<Item = CumulativePosition>,
    ) -> Self {
        self.cumulative_mismatches
            .extend(positions.into_iter().filter(|p| !p.matches));
        self
    }
}

/// Run both checks over `entries` restricted to `scope`.
pub fn check_continuity(
    entries: &[MovementEntry],
    scope: ContinuityScope,
    generated_at: DateTime<Utc>,
) -> ContinuityReport {
    let mut selected: Vec<MovementEntry> =
        entries.iter().filter(|e| scope.includes(e)).cloned().collect();
    sort_chronologically(&mut selected);

    let items: BTreeSet<ItemId> = selected.iter().map(MovementEntry::item_id).collect();

    let mut discontinuities = Vec::new();
    let mut boundaries = 0usize;
    for item in &items {
        let mut months: BTreeMap<YearMonth, (&MovementEntry, &MovementEntry)> = BTreeMap::new();
        for entry in selected.iter().filter(|e| e.item_id() == *item) {
            months
                .entry(YearMonth::from_datetime(entry.occurred_at()))
                .and_modify(|(_, last)| *last = entry)
                .or_insert((entry, entry));
        }

        let active: Vec<_> = months.into_iter().collect();
        for pair in active.windows(2) {
            let (closing_month, (_, closing)) = pair[0];
            let (opening_month, (opening, _)) = pair[1];
            boundaries += 1;
            if closing.after() == opening.before() {
                continue;
            }
            let kind = if opening.before() == 0 {
                DiscontinuityKind::Reset
            } else {
                DiscontinuityKind::Gap
            };
            tracing::warn!(
                item_id = %item,
                closing_month = %closing_month,
                opening_month = %opening_month,
                closing = closing.after(),
                opening = opening.before(),
                ?kind,
                "stock discontinuity at month boundary"
            );
            discontinuities.push(Discontinuity {
                item_id: *item,
                closing_month,
                opening_month,
                closing_balance: closing.after(),
                opening_balance: opening.before(),
                difference: opening.before() - closing.after(),
                kind,
                closing_sequence: closing.sequence(),
                opening_sequence: opening.sequence(),
            });
        }
    }

    let suspected_resets: Vec<SuspectedReset> = selected
        .iter()
        .filter(|e| is_first_day_of_month(e.occurred_at()) && e.delta() < 0 && e.after() == 0)
        .map(|e| SuspectedReset {
            item_id: e.item_id(),
            sequence: e.sequence(),
            occurred_at: e.occurred_at(),
            kind: e.kind(),
            reference: e.reference().clone(),
            before: e.before(),
            delta: e.delta(),
        })
        .collect();
    for reset in &suspected_resets {
        tracing::warn!(
            item_id = %reset.item_id,
            sequence = reset.sequence,
            "stock zeroed on first day of month"
        );
    }

    ContinuityReport {
        generated_at,
        scope,
        items_checked: items.len(),
        month_boundaries_checked: boundaries,
        boundary_status: CheckStatus::from_clean(discontinuities.is_empty()),
        discontinuities,
        reset_status: CheckStatus::from_clean(suspected_resets.is_empty()),
        suspected_resets,
        cumulative_mismatches: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::movement::MovementParts;
    use crate::statement::cumulative_position;
    use chrono::TimeZone;
    use stockledger_core::ActorId;

    struct Chain {
        item: ItemId,
        balance: i64,
        seq: u64,
        entries: Vec<MovementEntry>,
    }

    impl Chain {
        fn new() -> Self {
            Self {
                item: ItemId::new(),
                balance: 0,
                seq: 0,
                entries: Vec::new(),
            }
        }

        fn push(&mut self, month: u32, day: u32, delta: i64) -> &mut Self {
            let before = self.balance;
            self.push_with_before(month, day, before, delta)
        }

        fn push_with_before(&mut self, month: u32, day: u32, before: i64, delta: i64) -> &mut Self {
            self.seq += 1;
            let entry = MovementEntry::from_parts(MovementParts {
                sequence: self.seq,
                item_id: self.item,
                delta,
                kind: if delta > 0 { MovementKind::Purchase } else { MovementKind::Sale },
                reference: LotId::new(format!("B-{}", self.seq)).unwrap(),
                before,
                after: before + delta,
                occurred_at: Utc.with_ymd_and_hms(2024, month, day, 9, 0, 0).unwrap(),
                actor: ActorId::new(),
                note: None,
                reverses: None,
            })
            .unwrap();
            self.balance = entry.after();
            self.entries.push(entry);
            self
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 12, 31, 0, 0, 0).unwrap()
    }

    #[test]
    fn continuous_ledger_passes() {
        let mut chain = Chain::new();
        chain.push(1, 3, 100).push(1, 20, -40).push(2, 5, -10).push(4, 9, 25);

        let report = check_continuity(&chain.entries, ContinuityScope::all(), now());

        assert_eq!(report.violation_count(), 0);
        assert_eq!(report.month_boundaries_checked, 2);
        assert!(report.passed());
    }

    #[test]
    fn injected_gap_is_reported_once() {
        let mut chain = Chain::new();
        chain.push(1, 3, 100).push(1, 20, -40);
        // February opens at 75 although January closed at 60.
        chain.push_with_before(2, 5, 75, -5).push(3, 2, 10);

        let report = check_continuity(&chain.entries, ContinuityScope::for_item(chain.item), now());

        assert_eq!(report.violation_count(), 1);
        let d = &report.discontinuities[0];
        assert_eq!(d.kind, DiscontinuityKind::Gap);
        assert_eq!((d.closing_balance, d.opening_balance, d.difference), (60, 75, 15));
        assert_eq!(d.opening_month.to_string(), "2024-02");
        assert_eq!(report.boundary_status, CheckStatus::Fail);
        assert!(!report.passed());
    }

    #[test]
    fn opening_at_zero_is_classified_as_reset() {
        let mut chain = Chain::new();
        chain.push(5, 10, 30);
        chain.push_with_before(6, 12, 0, 8);

        let report = check_continuity(&chain.entries, ContinuityScope::all(), now());

        assert_eq!(report.discontinuities[0].kind, DiscontinuityKind::Reset);
    }

    #[test]
    fn first_day_zeroing_is_flagged_even_when_continuous() {
        let mut chain = Chain::new();
        chain.push(1, 10, 20).push(2, 1, -20).push(2, 14, 5);

        let report = check_continuity(&chain.entries, ContinuityScope::all(), now());

        assert_eq!(report.violation_count(), 0);
        assert_eq!(report.boundary_status, CheckStatus::Pass);
        assert_eq!(report.suspected_resets.len(), 1);
        assert_eq!(report.suspected_resets[0].sequence, 2);
        assert_eq!(report.reset_status, CheckStatus::Fail);
    }

    #[test]
    fn scope_limits_items_and_range() {
        let mut a = Chain::new();
        a.push(1, 3, 10);
        a.push_with_before(2, 3, 99, 1);
        let mut b = Chain::new();
        b.push(1, 3, 10).push(2, 3, 1);
        let all: Vec<_> = a.entries.iter().chain(b.entries.iter()).cloned().collect();

        let only_b = check_continuity(&all, ContinuityScope::for_item(b.item), now());
        assert!(only_b.passed());
        assert_eq!(only_b.items_checked, 1);

        let january = ContinuityScope::all().between(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 31, 23, 59, 59).unwrap(),
        );
        assert!(check_continuity(&all, january, now()).passed());
        assert_eq!(check_continuity(&all, ContinuityScope::all(), now()).violation_count(), 1);
    }

    #[test]
    fn cumulative_mismatch_fails_the_report() {
        let mut chain = Chain::new();
        chain.push(1, 3, 10);
        let report = check_continuity(&chain.entries, ContinuityScope::all(), now())
            .with_cumulative_positions([
                cumulative_position(chain.item, &chain.entries, 10),
                cumulative_position(chain.item, &chain.entries, 7),
            ]);

        assert_eq!(report.cumulative_mismatches.len(), 1);
        assert!(!report.passed());
    }
}
