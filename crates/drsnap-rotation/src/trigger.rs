//! Trigger dispatch.
//!
//! Turns an invocation payload into [`Trigger`]s, runs each against the
//! [`Rotator`] concurrently and aggregates the outcomes. A payload carrying a
//! `Records` array is a batch; anything else is a single event.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::catalog::InstanceScope;
use crate::copier::AgeCheck;
use crate::error::{Result, RotationError};
use crate::orchestrator::{RotationReport, Rotator};

/// Instance event id suffix announcing a finished automated backup.
pub const BACKUP_FINISHED_EVENT_SUFFIX: &str = "#RDS-EVENT-0002";

/// Events that are not understood. Never fatal for the batch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EventError {
    /// The event matches none of the known shapes.
    #[error("Encountered an unexpected event: {event}")]
    UnexpectedEventShape {
        /// The event, serialized.
        event: String,
    },

    /// A known envelope with an unreadable inner message.
    #[error("Malformed event payload: {reason}")]
    MalformedEventPayload {
        /// What was wrong with it.
        reason: String,
    },
}

/// What an event asks the engine to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Scheduled tick: every instance, age check on.
    Scheduled,
    /// Initial bulk sync: every instance, age check off.
    InitialSync,
    /// An instance finished an automated backup: that instance, age check on.
    InstanceBackupFinished {
        /// Instance that finished the backup.
        instance_id: String,
    },
    /// Any other instance event; nothing to do.
    IgnoredInstanceEvent {
        /// Event id as received.
        event_id: String,
    },
    /// Operator-initiated run.
    Manual {
        /// Instances to rotate.
        scope: InstanceScope,
        /// Whether staleness notifications are raised.
        age_check: AgeCheck,
    },
}

impl Trigger {
    /// Instances to rotate, or None if the trigger asks for nothing.
    pub fn scope(&self) -> Option<InstanceScope> {
        match self {
            Trigger::Scheduled | Trigger::InitialSync => Some(InstanceScope::All),
            Trigger::InstanceBackupFinished { instance_id } => {
                Some(InstanceScope::One(instance_id.clone()))
            }
            Trigger::IgnoredInstanceEvent { .. } => None,
            Trigger::Manual { scope, .. } => Some(scope.clone()),
        }
    }

    /// Initial sync disables the staleness check; manual runs choose.
    pub fn age_check(&self) -> AgeCheck {
        match self {
            Trigger::InitialSync => AgeCheck::Disabled,
            Trigger::Manual { age_check, .. } => *age_check,
            _ => AgeCheck::Enabled,
        }
    }
}

#[derive(Debug, Deserialize)]
struct InstanceEventMessage {
    #[serde(rename = "Event ID")]
    event_id: String,
    #[serde(rename = "Source ID")]
    source_id: String,
}

/// Split a payload into its events.
pub fn events(payload: &Value) -> Vec<&Value> {
    match payload.get("Records").and_then(Value::as_array) {
        Some(records) => records.iter().collect(),
        None => vec![payload],
    }
}

/// Classify a single event.
pub fn classify(event: &Value) -> std::result::Result<Trigger, EventError> {
    if str_field(event, "command") == Some("initial_sync") {
        return Ok(Trigger::InitialSync);
    }
    if str_field(event, "source") == Some("aws.events") {
        return Ok(Trigger::Scheduled);
    }
    if str_field(event, "EventSource") == Some("aws:sns") {
        return classify_instance_event(event);
    }
    Err(EventError::UnexpectedEventShape {
        event: event.to_string(),
    })
}

fn str_field<'a>(event: &'a Value, name: &str) -> Option<&'a str> {
    event.get(name).and_then(Value::as_str)
}

fn classify_instance_event(event: &Value) -> std::result::Result<Trigger, EventError> {
    let raw = event
        .pointer("/Sns/Message")
        .and_then(Value::as_str)
        .ok_or_else(|| EventError::MalformedEventPayload {
            reason: "notification has no Sns.Message string".to_string(),
        })?;
    let message: InstanceEventMessage =
        serde_json::from_str(raw).map_err(|e| EventError::MalformedEventPayload {
            reason: format!("cannot parse instance event message: {}", e),
        })?;

    if message.event_id.ends_with(BACKUP_FINISHED_EVENT_SUFFIX) {
        Ok(Trigger::InstanceBackupFinished {
            instance_id: message.source_id,
        })
    } else {
        Ok(Trigger::IgnoredInstanceEvent {
            event_id: message.event_id,
        })
    }
}

/// Result of one event.
#[derive(Debug, Clone)]
pub enum EventOutcome {
    /// The rotation ran; the report may still contain failed instances.
    Rotated(RotationReport),
    /// The trigger asked for nothing.
    Ignored,
    /// The event was not understood. Logged and alerted, not a failure.
    Rejected(EventError),
    /// The rotation could not start.
    Failed(RotationError),
}

/// Per-event entry of an [`InvocationReport`].
#[derive(Debug, Clone)]
pub struct EventReport {
    /// Classified trigger; None if the event was rejected.
    pub trigger: Option<Trigger>,
    /// What happened.
    pub outcome: EventOutcome,
}

impl EventReport {
    /// The error this event contributes to the invocation, if any.
    pub fn error(&self) -> Option<RotationError> {
        match &self.outcome {
            EventOutcome::Failed(e) => Some(e.clone()),
            EventOutcome::Rotated(report) => report.clone().into_result().err(),
            EventOutcome::Ignored | EventOutcome::Rejected(_) => None,
        }
    }
}

/// Outcome of a whole invocation.
#[derive(Debug, Clone)]
pub struct InvocationReport {
    /// Trigger time shared by every event.
    pub triggered_at: DateTime<Utc>,
    /// Per-event results, in batch order.
    pub events: Vec<EventReport>,
}

impl InvocationReport {
    /// True if no event contributed an error.
    pub fn is_success(&self) -> bool {
        self.events.iter().all(|e| e.error().is_none())
    }

    /// Format as a one-line human-readable summary.
    pub fn summary(&self) -> String {
        let failed = self.events.iter().filter(|e| e.error().is_some()).count();
        let copied: usize = self
            .events
            .iter()
            .filter_map(|e| match &e.outcome {
                EventOutcome::Rotated(r) => Some(r.copied()),
                _ => None,
            })
            .sum();
        let deleted: usize = self
            .events
            .iter()
            .filter_map(|e| match &e.outcome {
                EventOutcome::Rotated(r) => Some(r.deleted()),
                _ => None,
            })
            .sum();
        format!(
            "{} event(s): {} rotated, {} ignored, {} rejected, {} failed; {} copied, {} deleted",
            self.events.len(),
            self.count_where(|o| matches!(o, EventOutcome::Rotated(_))),
            self.count_where(|o| matches!(o, EventOutcome::Ignored)),
            self.count_where(|o| matches!(o, EventOutcome::Rejected(_))),
            failed,
            copied,
            deleted
        )
    }

    fn count_where(&self, f: impl Fn(&EventOutcome) -> bool) -> usize {
        self.events.iter().filter(|e| f(&e.outcome)).count()
    }

    /// Ok if every event succeeded, otherwise [`RotationError::EventsFailed`]
    /// carrying the first failure in batch order.
    pub fn into_result(self) -> Result<Self> {
        let errors: Vec<RotationError> = self.events.iter().filter_map(EventReport::error).collect();
        let failed = errors.len();
        match errors.into_iter().next() {
            None => Ok(self),
            Some(first) => Err(RotationError::EventsFailed {
                failed,
                total: self.events.len(),
                first: Box::new(first),
            }),
        }
    }
}

/// Entry point for trigger payloads.
pub struct TriggerHandler {
    rotator: Rotator,
}

impl TriggerHandler {
    /// Handler dispatching to `rotator`.
    pub fn new(rotator: Rotator) -> Self {
        Self { rotator }
    }

    /// The rotator events are dispatched to.
    pub fn rotator(&self) -> &Rotator {
        &self.rotator
    }

    /// Handle a payload triggered now.
    pub async fn handle(&self, payload: &Value) -> Result<InvocationReport> {
        self.handle_at(payload, Utc::now()).await
    }

    /// Handle a payload triggered at `now`.
    pub async fn handle_at(&self, payload: &Value, now: DateTime<Utc>) -> Result<InvocationReport> {
        let classified = events(payload).into_iter().map(classify).collect();
        self.finish(self.dispatch(classified, now).await).await
    }

    /// Run a single already-classified trigger.
    pub async fn run(&self, trigger: Trigger, now: DateTime<Utc>) -> Result<InvocationReport> {
        self.finish(self.dispatch(vec![Ok(trigger)], now).await).await
    }

    /// Run every event concurrently and collect the outcomes without
    /// turning failures into an error.
    pub async fn dispatch(
        &self,
        events: Vec<std::result::Result<Trigger, EventError>>,
        now: DateTime<Utc>,
    ) -> InvocationReport {
        let runs = events.into_iter().map(|event| self.run_event(event, now));
        InvocationReport {
            triggered_at: now,
            events: join_all(runs).await,
        }
    }

    async fn run_event(
        &self,
        event: std::result::Result<Trigger, EventError>,
        now: DateTime<Utc>,
    ) -> EventReport {
        let trigger = match event {
            Ok(trigger) => trigger,
            Err(e) => {
                self.rotator.alerter().alert(None, &e.to_string()).await;
                return EventReport {
                    trigger: None,
                    outcome: EventOutcome::Rejected(e),
                };
            }
        };

        let Some(scope) = trigger.scope() else {
            info!(?trigger, "ignoring instance event");
            return EventReport {
                trigger: Some(trigger),
                outcome: EventOutcome::Ignored,
            };
        };

        let rotation = match self.rotator.context(now, trigger.age_check()) {
            Ok(ctx) => self.rotator.rotate(&scope, &ctx).await,
            Err(e) => Err(e),
        };
        let outcome = match rotation {
            Ok(report) => EventOutcome::Rotated(report),
            Err(e) => EventOutcome::Failed(e),
        };
        EventReport {
            trigger: Some(trigger),
            outcome,
        }
    }

    async fn finish(&self, report: InvocationReport) -> Result<InvocationReport> {
        info!("{}", report.summary());
        match report.into_result() {
            Ok(report) => Ok(report),
            Err(e) => {
                warn!(error = %e, "invocation failed");
                self.rotator
                    .alerter()
                    .alert(None, &format!("Fatal error: {}", e))
                    .await;
                Err(e)
            }
        }
    }
}
