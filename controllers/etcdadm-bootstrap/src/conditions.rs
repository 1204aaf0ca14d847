//! Condition management.
//!
//! Every change to `EtcdadmConfigStatus` goes through `reconcile_conditions`,
//! which folds the outcome of one reconciliation pass into the previous status.

use chrono::{DateTime, Utc};
use crds::{
    Condition, ConditionStatus, DATA_SECRET_AVAILABLE_CONDITION, DATA_SECRET_PUBLISHED_REASON, EtcdadmConfigStatus,
    PERSIST_FAILED_REASON, READY_CONDITION, WAITING_FOR_DATA_REASON,
};

/// What a reconciliation pass found out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The data secret holds data for the current spec
    Published { secret_name: String },
    /// The current spec cannot be rendered (invalid or missing reference)
    RenderFailed { reason: &'static str, message: String },
    /// Rendering succeeded but the data secret could not be written
    PersistFailed { message: String },
    /// A secret with the data secret's name exists and is not controlled by
    /// the config, so whatever it holds is not this config's data
    OwnershipConflict { message: String },
}

/// Outcome of a pass against one generation of the spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub generation: Option<i64>,
    pub outcome: Outcome,
}

/// Compute the next status from the current one and a pass observation.
///
/// `lastTransitionTime` is stamped with `now` only on conditions whose status
/// value changes, so reconciling the same observation twice is a no-op.
pub fn reconcile_conditions(
    status: Option<&EtcdadmConfigStatus>,
    observation: &Observation,
    now: DateTime<Utc>,
) -> EtcdadmConfigStatus {
    let mut next = status.cloned().unwrap_or_default();
    let previously_available = next.is_condition_true(DATA_SECRET_AVAILABLE_CONDITION);

    let blocking_error = match &observation.outcome {
        Outcome::Published { secret_name } => {
            if next.data_secret_name.as_deref().is_none_or(str::is_empty) {
                next.data_secret_name = Some(secret_name.clone());
            }
            set_condition(
                &mut next.conditions,
                DATA_SECRET_AVAILABLE_CONDITION,
                ConditionStatus::True,
                DATA_SECRET_PUBLISHED_REASON,
                None,
                now,
            );
            None
        }
        Outcome::RenderFailed { reason, message } => {
            set_condition(
                &mut next.conditions,
                DATA_SECRET_AVAILABLE_CONDITION,
                ConditionStatus::False,
                reason,
                Some(message.clone()),
                now,
            );
            Some((*reason, message.clone()))
        }
        Outcome::PersistFailed { message } => {
            // Data published for an earlier spec is still there to consume
            if !previously_available {
                set_condition(
                    &mut next.conditions,
                    DATA_SECRET_AVAILABLE_CONDITION,
                    ConditionStatus::False,
                    PERSIST_FAILED_REASON,
                    Some(message.clone()),
                    now,
                );
            }
            None
        }
        Outcome::OwnershipConflict { message } => {
            set_condition(
                &mut next.conditions,
                DATA_SECRET_AVAILABLE_CONDITION,
                ConditionStatus::False,
                PERSIST_FAILED_REASON,
                Some(message.clone()),
                now,
            );
            Some((PERSIST_FAILED_REASON, message.clone()))
        }
    };

    let ready = next.is_condition_true(DATA_SECRET_AVAILABLE_CONDITION)
        && next.data_secret_name.as_deref().is_some_and(|name| !name.is_empty())
        && blocking_error.is_none();
    let (reason, message) = match blocking_error {
        _ if ready => (DATA_SECRET_PUBLISHED_REASON, None),
        Some((reason, message)) => (reason, Some(message)),
        None => (WAITING_FOR_DATA_REASON, None),
    };
    set_condition(&mut next.conditions, READY_CONDITION, ready.into(), reason, message, now);

    sort_conditions(&mut next.conditions);
    next.ready = ready;
    next.observed_generation = observation.generation;
    next
}

fn set_condition(
    conditions: &mut Vec<Condition>,
    type_: &str,
    status: ConditionStatus,
    reason: &str,
    message: Option<String>,
    now: DateTime<Utc>,
) {
    match conditions.iter_mut().find(|c| c.type_ == type_) {
        Some(existing) => {
            if existing.status != status {
                existing.status = status;
                existing.last_transition_time = Some(now);
            }
            existing.reason = Some(reason.to_string());
            existing.message = message;
        }
        None => conditions.push(Condition {
            type_: type_.to_string(),
            status,
            last_transition_time: Some(now),
            reason: Some(reason.to_string()),
            message,
        }),
    }
}

/// `Ready` first, the rest by type.
fn sort_conditions(conditions: &mut [Condition]) {
    conditions.sort_by(|a, b| {
        (a.type_ != READY_CONDITION)
            .cmp(&(b.type_ != READY_CONDITION))
            .then_with(|| a.type_.cmp(&b.type_))
    });
}
