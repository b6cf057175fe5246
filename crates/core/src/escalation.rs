//! Time-threshold escalation of unresolved approvals.
//!
//! Elapsed pending time classifies an approval into a severity rung
//! (Reminder, Manager, HR). At most one notification is sent per unresolved
//! (request, approver, level) triple; the record is only persisted after a
//! successful dispatch, so a failed send is naturally re-attempted by the
//! next sweep.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::escalation::{
    EscalationId, EscalationLevel, EscalationRecord, EscalationResolution, PendingApproval,
};
use crate::domain::practitioner::{Practitioner, UserId};
use crate::domain::request::RequestId;
use crate::errors::StoreError;
use crate::ports::{
    Directory, EscalationNotice, EscalationStore, NotificationDispatcher, RequestStore,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EscalationConfig {
    pub reminder_hours: i64,
    pub manager_hours: i64,
    pub hr_hours: i64,
    pub hr_contacts: Vec<UserId>,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self { reminder_hours: 24, manager_hours: 48, hr_hours: 72, hr_contacts: Vec::new() }
    }
}

impl EscalationConfig {
    /// Severity by elapsed whole hours since `pending_since`.
    pub fn classify(&self, pending_since: DateTime<Utc>, now: DateTime<Utc>) -> EscalationLevel {
        let elapsed_hours = (now - pending_since).num_hours();
        if elapsed_hours >= self.hr_hours {
            EscalationLevel::Hr
        } else if elapsed_hours >= self.manager_hours {
            EscalationLevel::Manager
        } else if elapsed_hours >= self.reminder_hours {
            EscalationLevel::Reminder
        } else {
            EscalationLevel::None
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EscalationOutcome {
    /// Elapsed time has not reached the first threshold.
    BelowThreshold,
    /// An unresolved record already exists for this triple.
    AlreadyNotified { level: EscalationLevel },
    Escalated { level: EscalationLevel },
    /// No resolvable recipient at this level; skipped, not an error.
    RecipientUnavailable { level: EscalationLevel, reason: String },
    /// Dispatcher reported failure; nothing persisted.
    DispatchFailed { level: EscalationLevel, error: String },
}

/// Aggregate outcome of one sweep across all pending approvals.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub processed: usize,
    pub escalated: usize,
    pub already_notified: usize,
    pub below_threshold: usize,
    pub skipped_no_recipient: usize,
    pub dispatch_failures: usize,
    pub store_errors: usize,
}

impl SweepStats {
    fn record(&mut self, outcome: &EscalationOutcome) {
        self.processed += 1;
        match outcome {
            EscalationOutcome::BelowThreshold => self.below_threshold += 1,
            EscalationOutcome::AlreadyNotified { .. } => self.already_notified += 1,
            EscalationOutcome::Escalated { .. } => self.escalated += 1,
            EscalationOutcome::RecipientUnavailable { .. } => {
                self.skipped_no_recipient += 1;
            }
            EscalationOutcome::DispatchFailed { .. } => self.dispatch_failures += 1,
        }
    }
}

/// Counts over stored records in a date range, computed by scanning.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EscalationReport {
    pub total: usize,
    pub reminders: usize,
    pub managers: usize,
    pub hr: usize,
    pub resolved: usize,
    pub unresolved: usize,
    pub mean_resolution_hours: Option<f64>,
}

pub struct EscalationEngine {
    config: EscalationConfig,
    requests: Arc<dyn RequestStore>,
    directory: Arc<dyn Directory>,
    store: Arc<dyn EscalationStore>,
    dispatcher: Arc<dyn NotificationDispatcher>,
}

impl EscalationEngine {
    pub fn new(
        config: EscalationConfig,
        requests: Arc<dyn RequestStore>,
        directory: Arc<dyn Directory>,
        store: Arc<dyn EscalationStore>,
        dispatcher: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        Self { config, requests, directory, store, dispatcher }
    }

    pub fn config(&self) -> &EscalationConfig {
        &self.config
    }

    pub async fn process_escalation(
        &self,
        pending: &PendingApproval,
    ) -> Result<EscalationOutcome, StoreError> {
        let now = Utc::now();
        let level = self.config.classify(pending.pending_since, now);
        if level == EscalationLevel::None {
            return Ok(EscalationOutcome::BelowThreshold);
        }

        let request_id = &pending.request.id;
        let approver_id = &pending.approver.id;
        if self.store.find_unresolved(request_id, approver_id, level).await?.is_some() {
            return Ok(EscalationOutcome::AlreadyNotified { level });
        }

        let recipient = match self.resolve_recipient(pending, level).await? {
            Ok(recipient) => recipient,
            Err(reason) => {
                tracing::warn!(
                    request_id = %request_id,
                    approver_id = %approver_id,
                    level = ?level,
                    reason = %reason,
                    "skipping escalation, recipient unavailable"
                );
                return Ok(EscalationOutcome::RecipientUnavailable { level, reason });
            }
        };

        let outcome = self
            .dispatcher
            .send(EscalationNotice {
                request: pending.request.clone(),
                recipient,
                approver: pending.approver.clone(),
                level,
                pending_since: pending.pending_since,
            })
            .await;
        if !outcome.success {
            let error = outcome.error.unwrap_or_else(|| "dispatch failed".to_string());
            tracing::warn!(
                request_id = %request_id,
                approver_id = %approver_id,
                level = ?level,
                error = %error,
                "escalation notification dispatch failed"
            );
            return Ok(EscalationOutcome::DispatchFailed { level, error });
        }

        self.store
            .insert(EscalationRecord {
                id: EscalationId(Uuid::new_v4().to_string()),
                request_id: request_id.clone(),
                approver_id: approver_id.clone(),
                level,
                created_at: now,
                notified_at: now,
                resolved_at: None,
                resolution: None,
            })
            .await?;
        tracing::info!(
            request_id = %request_id,
            approver_id = %approver_id,
            level = ?level,
            "escalation notification sent"
        );
        Ok(EscalationOutcome::Escalated { level })
    }

    /// Sweeps every pending approval sequentially. A per-item store failure
    /// is counted and logged; the sweep continues.
    pub async fn process_all(&self) -> Result<SweepStats, StoreError> {
        let pending = self.requests.pending_approvals().await?;
        let mut stats = SweepStats::default();
        for item in &pending {
            match self.process_escalation(item).await {
                Ok(outcome) => stats.record(&outcome),
                Err(error) => {
                    stats.processed += 1;
                    stats.store_errors += 1;
                    tracing::error!(
                        request_id = %item.request.id,
                        approver_id = %item.approver.id,
                        error = %error,
                        "escalation processing failed"
                    );
                }
            }
        }
        Ok(stats)
    }

    /// Resolves the latest unresolved record for the pair. No-op when there
    /// is nothing unresolved, so resolution is idempotent.
    pub async fn mark_resolved(
        &self,
        request_id: &RequestId,
        approver_id: &UserId,
        resolution: EscalationResolution,
    ) -> Result<bool, StoreError> {
        match self.store.latest_unresolved(request_id, approver_id).await? {
            Some(record) => {
                self.store.mark_resolved(&record.id, resolution, Utc::now()).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Resolves every unresolved record for the request.
    pub async fn mark_all_resolved(
        &self,
        request_id: &RequestId,
        resolution: EscalationResolution,
    ) -> Result<usize, StoreError> {
        let unresolved = self.store.unresolved_for_request(request_id).await?;
        let now = Utc::now();
        for record in &unresolved {
            self.store.mark_resolved(&record.id, resolution, now).await?;
        }
        Ok(unresolved.len())
    }

    pub async fn report(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<EscalationReport, StoreError> {
        let records = self.store.records_between(from, to).await?;
        let mut report = EscalationReport { total: records.len(), ..Default::default() };
        let mut latency_hours = Vec::new();
        for record in &records {
            match record.level {
                EscalationLevel::Reminder => report.reminders += 1,
                EscalationLevel::Manager => report.managers += 1,
                EscalationLevel::Hr => report.hr += 1,
                EscalationLevel::None => {}
            }
            match record.resolved_at {
                Some(resolved_at) => {
                    report.resolved += 1;
                    let hours =
                        (resolved_at - record.created_at).num_minutes() as f64 / 60.0;
                    latency_hours.push(hours);
                }
                None => report.unresolved += 1,
            }
        }
        if !latency_hours.is_empty() {
            report.mean_resolution_hours =
                Some(latency_hours.iter().sum::<f64>() / latency_hours.len() as f64);
        }
        Ok(report)
    }

    async fn resolve_recipient(
        &self,
        pending: &PendingApproval,
        level: EscalationLevel,
    ) -> Result<Result<Practitioner, String>, StoreError> {
        match level {
            EscalationLevel::None => Ok(Err("below threshold".to_string())),
            EscalationLevel::Reminder => Ok(Ok(pending.approver.clone())),
            EscalationLevel::Manager => {
                match self.directory.manager_of(&pending.approver.id).await? {
                    Some(manager) => Ok(Ok(manager)),
                    None => Ok(Err(format!(
                        "no manager found for `{}`",
                        pending.approver.id
                    ))),
                }
            }
            EscalationLevel::Hr => {
                let Some(contact) = self.config.hr_contacts.first() else {
                    return Ok(Err("no HR contacts configured".to_string()));
                };
                match self.directory.find_user(contact).await? {
                    Some(user) => Ok(Ok(user)),
                    None => Ok(Err(format!("HR contact `{contact}` not found"))),
                }
            }
        }
    }
}
