//! Incidents: failures that need a human.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::audit::{AuditEventId, AuditTrail, NewAuditEvent};
use crate::domain::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentKind {
    AuthFailure,
    ChainIntegrity,
    PolicyViolation,
}

impl std::fmt::Display for IncidentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IncidentKind::AuthFailure => f.write_str("auth_failure"),
            IncidentKind::ChainIntegrity => f.write_str("chain_integrity"),
            IncidentKind::PolicyViolation => f.write_str("policy_violation"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub kind: IncidentKind,
    pub destination: Option<String>,
    pub description: String,
    pub raised_at: DateTime<Utc>,
    /// `None` when the audit trail itself could not record it
    pub audit_event: Option<AuditEventId>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Incident {
    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }
}

/// Process-wide incident log. Every incident is also written to the audit
/// trail when the trail still accepts appends.
pub struct IncidentLog {
    audit: Arc<AuditTrail>,
    incidents: Mutex<Vec<Incident>>,
}

impl IncidentLog {
    pub fn new(audit: Arc<AuditTrail>) -> Self {
        Self {
            audit,
            incidents: Mutex::new(Vec::new()),
        }
    }

    /// Record an incident. Audit failures are logged, never raised: an
    /// incident about a broken store must still be kept.
    pub async fn raise(
        &self,
        kind: IncidentKind,
        destination: Option<&str>,
        description: impl Into<String>,
        session_id: &str,
    ) -> Incident {
        let description = description.into();
        error!(
            event = "incident.raised",
            kind = %kind,
            destination = destination.unwrap_or("-"),
            description = %description,
        );

        let mut event = NewAuditEvent::new("incident", "incident_raised", session_id)
            .decision(kind)
            .reason(description.clone())
            .tag("incident");
        if let Some(dest) = destination {
            event = event.tag(dest);
        }
        let audit_event = match self.audit.append(event).await {
            Ok(id) => Some(id),
            Err(e) => {
                error!(error = %e, "incident could not be audited");
                None
            }
        };

        let incident = Incident {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            destination: destination.map(str::to_string),
            description,
            raised_at: self.audit.clock().now(),
            audit_event,
            resolved_at: None,
        };
        self.incidents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(incident.clone());
        incident
    }

    pub fn list(&self) -> Vec<Incident> {
        self.incidents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of unresolved incidents of `kind`.
    pub fn open_for(&self, kind: IncidentKind) -> usize {
        self.incidents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|i| i.kind == kind && i.is_open())
            .count()
    }

    /// Mark every open incident of `kind` for `destination` resolved and
    /// audit each one. Returns how many were resolved.
    pub async fn resolve(
        &self,
        kind: IncidentKind,
        destination: Option<&str>,
        actor: &str,
    ) -> Result<usize> {
        let now = self.audit.clock().now();
        let resolved: Vec<Incident> = {
            let mut incidents = self
                .incidents
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            incidents
                .iter_mut()
                .filter(|i| i.kind == kind && i.is_open() && i.destination.as_deref() == destination)
                .map(|i| {
                    i.resolved_at = Some(now);
                    i.clone()
                })
                .collect()
        };

        for incident in &resolved {
            info!(
                event = "incident.resolved",
                kind = %kind,
                incident = %incident.id,
                actor,
            );
            let mut event = NewAuditEvent::new(actor, "incident_resolved", destination.unwrap_or("service"))
                .decision(kind)
                .reason(format!("resolved incident {}", incident.id))
                .tag("incident");
            if let Some(dest) = destination {
                event = event.tag(dest);
            }
            self.audit.append(event).await?;
        }
        Ok(resolved.len())
    }
}
