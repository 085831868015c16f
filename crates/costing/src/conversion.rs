//! Conversion ("blow") planning and produced-cost propagation.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use stockledger_core::{ActorId, DomainError, DomainResult, ensure_positive_quantity};
use stockledger_inventory::{MovementKind, MovementRequest};

use crate::history::ItemHistory;
use crate::records::ConversionEvent;

/// 0.95: share of input that comes out as product.
pub const DEFAULT_EFFICIENCY: Decimal = Decimal::from_parts(95, 0, 0, false, 2);

/// Input/output/waste split of a conversion. Always conserves quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversionPlan {
    input: i64,
    output: i64,
    waste: i64,
}

impl ConversionPlan {
    /// Caller-supplied split; `input` must equal `output + waste`.
    pub fn explicit(input: i64, output: i64, waste: i64) -> DomainResult<Self> {
        ensure_positive_quantity(input, "conversion input")?;
        ensure_positive_quantity(output, "conversion output")?;
        if waste < 0 {
            return Err(DomainError::invalid_quantity(format!(
                "conversion waste cannot be negative: {waste}"
            )));
        }
        if output.checked_add(waste) != Some(input) {
            return Err(DomainError::validation(format!(
                "conversion input ({input}) must equal output ({output}) + waste ({waste})"
            )));
        }
        Ok(Self { input, output, waste })
    }

    /// Derive output as `floor(input * rate)`; the rest is waste.
    pub fn with_efficiency(input: i64, rate: Decimal) -> DomainResult<Self> {
        ensure_positive_quantity(input, "conversion input")?;
        if rate <= Decimal::ZERO || rate > Decimal::ONE {
            return Err(DomainError::validation(format!(
                "conversion efficiency must be within (0, 1], got {rate}"
            )));
        }
        let output = (Decimal::from(input) * rate)
            .floor()
            .to_i64()
            .ok_or_else(|| DomainError::invariant("conversion output out of range"))?;
        if output == 0 {
            return Err(DomainError::invalid_quantity(format!(
                "input of {input} at {rate} efficiency produces nothing"
            )));
        }
        Self::explicit(input, output, input - output)
    }

    pub fn with_default_efficiency(input: i64) -> DomainResult<Self> {
        Self::with_efficiency(input, DEFAULT_EFFICIENCY)
    }

    pub fn input(&self) -> i64 {
        self.input
    }

    pub fn output(&self) -> i64 {
        self.output
    }

    pub fn waste(&self) -> i64 {
        self.waste
    }
}

/// Computes produced unit costs and the ledger effects of conversions.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConversionCostPropagator;

impl ConversionCostPropagator {
    /// Latest raw-item purchase price at or before `at`, plus the conversion cost.
    ///
    /// `None` when the raw item has no purchase by then; sales of the produced
    /// item then fall back to FIFO.
    pub fn produced_unit_cost(
        &self,
        raw_history: &ItemHistory,
        at: DateTime<Utc>,
        cost_per_unit: Decimal,
    ) -> Option<Decimal> {
        raw_history
            .latest_purchase_at_or_before(at)
            .map(|p| p.unit_price() + cost_per_unit)
    }

    /// Movements for a conversion: consume input from the raw item, add output
    /// to the produced item.
    pub fn movements(&self, conversion: &ConversionEvent, actor: ActorId) -> Vec<MovementRequest> {
        let note = format!(
            "{} in, {} out, {} waste",
            conversion.input_quantity(),
            conversion.output_quantity(),
            conversion.waste_quantity()
        );
        vec![
            MovementRequest::new(
                conversion.from_item(),
                -conversion.input_quantity(),
                MovementKind::Production,
                conversion.id().clone(),
                actor,
            )
            .with_note(note.clone()),
            MovementRequest::new(
                conversion.to_item(),
                conversion.output_quantity(),
                MovementKind::Production,
                conversion.id().clone(),
                actor,
            )
            .with_note(note),
        ]
    }
}
