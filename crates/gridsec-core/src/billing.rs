//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Per-tick bill accrual and best-effort forwarding to the meter display."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use gridsec_metrics::EngineMetrics;
use gridsec_msg::{BillReport, SystemState};
use tracing::debug;

use crate::ingest::OutboundLink;

/// Accrues `load / 1000 * price_rate * tick_fraction` every tick.
#[derive(Debug, Clone, Copy)]
pub struct BillingAccumulator {
    tick_fraction: f64,
}

impl BillingAccumulator {
    pub fn new(tick_fraction: f64) -> Self {
        Self {
            tick_fraction: tick_fraction.max(0.0),
        }
    }

    /// Cost of one tick at the current load and price. Negative inputs cost nothing.
    pub fn tick_cost(&self, state: &SystemState) -> f64 {
        let load = state.load_mw.max(0.0);
        let price = state.price_rate.max(0.0);
        load / 1000.0 * price * self.tick_fraction
    }

    /// Add one tick's cost to the bill and return the new total.
    pub fn accrue(&self, state: &mut SystemState) -> f64 {
        let cost = self.tick_cost(state);
        state.accrue_bill(cost);
        state.calculated_bill
    }

    /// Forward the bill to the meter display. Failures are counted and dropped;
    /// the local bill stays authoritative.
    pub async fn forward(&self, link: &dyn OutboundLink, bill: f64, metrics: &EngineMetrics) {
        if let Err(err) = link.publish_bill(BillReport::rounded(bill)).await {
            metrics.record_outbound_failure("bill");
            debug!(error = %err, bill, "bill forward dropped");
        }
    }
}

/// A bill echo never lowers the local bill.
pub fn reconcile_bill_echo(state: &mut SystemState, reported: f64) {
    if reported.is_finite() && reported > state.calculated_bill {
        state.calculated_bill = reported;
    }
}
