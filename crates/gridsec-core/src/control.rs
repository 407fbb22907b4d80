//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Operator command routing with local fallback and audit."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use gridsec_msg::{Area, AuditEntry, BreakerCommand, BreakerStatus};
use serde::Serialize;
use serde_json::json;
use strum::{Display, EnumString};
use tracing::{info, warn};

use crate::engine::EngineContext;

/// Recognised operator actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    #[strum(serialize = "toggle_area1", serialize = "toggle-area-1")]
    ToggleArea1,
    #[strum(serialize = "toggle_area2", serialize = "toggle-area-2")]
    ToggleArea2,
    #[strum(serialize = "simulate_attack", serialize = "simulate-attack")]
    SimulateAttack,
    #[strum(serialize = "reset_price", serialize = "reset")]
    ResetPrice,
}

impl ControlAction {
    /// Name written to the audit log.
    pub fn audit_name(self) -> &'static str {
        match self {
            ControlAction::ToggleArea1 => "TOGGLE_AREA1",
            ControlAction::ToggleArea2 => "TOGGLE_AREA2",
            ControlAction::SimulateAttack => "SIMULATE_ATTACK",
            ControlAction::ResetPrice => "RESET_PRICE",
        }
    }

    fn area(self) -> Option<Area> {
        match self {
            ControlAction::ToggleArea1 => Some(Area::Area1),
            ControlAction::ToggleArea2 => Some(Area::Area2),
            _ => None,
        }
    }
}

/// Rejected operator commands.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ControlError {
    #[error("unknown control action `{0}`")]
    UnknownAction(String),
}

/// How a command took effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    /// Sent to the hardware; local state waits for the echo.
    Published,
    /// Applied directly to local state.
    Local,
}

/// Result of an accepted command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlOutcome {
    pub action: ControlAction,
    pub delivery: Delivery,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area: Option<Area>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_state: Option<BreakerStatus>,
    pub message: String,
}

/// Turns operator actions into outward commands or local transitions.
///
/// A breaker toggle is published when the hardware link is up and left to the
/// `grid/control` echo; otherwise, or when publishing fails, it is applied
/// locally and broadcast. Every accepted action writes one audit entry.
#[derive(Clone)]
pub struct ControlCommandRouter {
    context: Arc<EngineContext>,
}

impl ControlCommandRouter {
    pub(crate) fn new(context: Arc<EngineContext>) -> Self {
        Self { context }
    }

    /// Parse and apply `action` on behalf of `actor`.
    pub async fn apply(&self, action: &str, actor: &str) -> Result<ControlOutcome, ControlError> {
        let parsed = ControlAction::from_str(action.trim())
            .map_err(|_| ControlError::UnknownAction(action.to_owned()))?;
        let outcome = match parsed.area() {
            Some(area) => self.toggle(parsed, area).await,
            None => self.adjust(parsed),
        };

        let mut details = json!({ "delivery": outcome.delivery });
        if let Some(new_state) = outcome.new_state {
            details["new_state"] = json!(new_state);
        }
        self.context.sampler.record_audit(&AuditEntry::new(
            Utc::now(),
            parsed.audit_name(),
            actor,
            details,
        ));
        info!(action = %parsed, actor, delivery = ?outcome.delivery, "control action applied");
        Ok(outcome)
    }

    async fn toggle(&self, action: ControlAction, area: Area) -> ControlOutcome {
        let (current, connected) = self
            .context
            .store
            .inspect(|state| (state.breaker(area), state.mqtt_connected));
        let target = current.toggled();

        if connected {
            if let Some(link) = &self.context.outbound {
                match link.publish_control(BreakerCommand { area, status: target }).await {
                    Ok(()) => {
                        return ControlOutcome {
                            action,
                            delivery: Delivery::Published,
                            area: Some(area),
                            new_state: Some(target),
                            message: format!("{} command sent", area),
                        }
                    }
                    Err(err) => {
                        self.context.metrics.record_outbound_failure("control");
                        warn!(area = %area, error = %err, "control publish failed; applying locally");
                    }
                }
            }
        }

        let (applied, _) = self.context.store.mutate(|state| {
            let next = state.breaker(area).toggled();
            state.set_breaker(area, next);
            next
        });
        ControlOutcome {
            action,
            delivery: Delivery::Local,
            area: Some(area),
            new_state: Some(applied),
            message: format!("{} updated locally", area),
        }
    }

    fn adjust(&self, action: ControlAction) -> ControlOutcome {
        let scoring = &self.context.scoring;
        let message = match action {
            ControlAction::SimulateAttack => {
                self.context.store.mutate(|state| scoring.simulate_attack(state));
                "Attack simulated"
            }
            _ => {
                self.context.store.mutate(|state| scoring.reset(state));
                "Price reset"
            }
        };
        ControlOutcome {
            action,
            delivery: Delivery::Local,
            area: None,
            new_state: None,
            message: message.to_owned(),
        }
    }
}

impl std::fmt::Debug for ControlCommandRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlCommandRouter").finish_non_exhaustive()
    }
}
