//! Periodic scans over login and audit history that raise alerts.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;
use serde_json::json;

use super::alerts::AlertService;
use super::error::ServiceError;
use crate::clock::Clock;
use crate::models::{AlertSeverity, AuditAction, NewSecurityAlert};
use crate::store::{AuditStore, LoginStore};

const FAILED_LOGIN_WINDOW_HOURS: i64 = 24;
const ANOMALY_WINDOW_HOURS: i64 = 1;

const BRUTE_FORCE_THRESHOLD: usize = 20;
const SUSPICIOUS_THRESHOLD: usize = 10;
const ROLE_CHANGE_THRESHOLD: usize = 5;
const USER_DELETE_THRESHOLD: usize = 3;
const DISTINCT_IP_THRESHOLD: usize = 5;

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringReport {
    pub alerts_raised: usize,
    pub errors: Vec<String>,
}

#[derive(Clone)]
pub struct SecurityMonitor {
    logins: Arc<dyn LoginStore>,
    audits: Arc<dyn AuditStore>,
    alerts: AlertService,
    clock: Arc<dyn Clock>,
}

impl SecurityMonitor {
    pub fn new(
        logins: Arc<dyn LoginStore>,
        audits: Arc<dyn AuditStore>,
        alerts: AlertService,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            logins,
            audits,
            alerts,
            clock,
        }
    }

    /// Run both scans concurrently. A failing scan is reported, not raised.
    #[tracing::instrument(skip_all)]
    pub async fn run_monitoring(&self) -> MonitoringReport {
        let (failed, anomalies) =
            tokio::join!(self.scan_failed_logins(), self.scan_anomalies());

        let mut report = MonitoringReport::default();
        for (scan, outcome) in [("failed_logins", failed), ("anomalies", anomalies)] {
            match outcome {
                Ok(raised) => report.alerts_raised += raised,
                Err(e) => {
                    tracing::error!(error = %e, scan, "Security scan failed");
                    report.errors.push(format!("{}: {}", scan, e));
                }
            }
        }
        tracing::info!(
            alerts_raised = report.alerts_raised,
            errors = report.errors.len(),
            "Security monitoring completed"
        );
        report
    }

    async fn scan_failed_logins(&self) -> Result<usize, ServiceError> {
        let now = self.clock.now();
        let attempts = self
            .logins
            .failed_attempts_since(now - Duration::hours(FAILED_LOGIN_WINDOW_HOURS))
            .await?;

        let mut by_ip: BTreeMap<String, usize> = BTreeMap::new();
        for attempt in attempts.iter().filter(|a| !a.success) {
            if let Some(ip) = &attempt.ip_address {
                *by_ip.entry(ip.clone()).or_default() += 1;
            }
        }

        let mut alerts = Vec::new();
        for (ip, count) in by_ip {
            let alert = if count >= BRUTE_FORCE_THRESHOLD {
                NewSecurityAlert::new(
                    "brute_force_attack",
                    AlertSeverity::Critical,
                    "Possible brute force attack",
                    format!("{} failed login attempts from IP {} in the last 24 hours", count, ip),
                )
            } else if count >= SUSPICIOUS_THRESHOLD {
                NewSecurityAlert::new(
                    "suspicious_activity",
                    AlertSeverity::High,
                    "Suspicious login activity",
                    format!("{} failed login attempts from IP {} in the last 24 hours", count, ip),
                )
            } else {
                continue;
            };
            alerts.push(
                alert
                    .with_metadata(json!({ "ip_address": ip, "attempt_count": count }))
                    .with_ip(ip),
            );
        }

        let locked = self.logins.locked_accounts(now).await?;
        if !locked.is_empty() {
            let emails: Vec<&str> = locked.iter().map(|t| t.email.as_str()).collect();
            alerts.push(
                NewSecurityAlert::new(
                    "locked_accounts",
                    AlertSeverity::Medium,
                    "Locked accounts",
                    format!("{} account(s) currently locked out", locked.len()),
                )
                .with_metadata(json!({ "count": locked.len(), "emails": emails })),
            );
        }

        self.raise_all(alerts).await
    }

    async fn scan_anomalies(&self) -> Result<usize, ServiceError> {
        let since = self.clock.now() - Duration::hours(ANOMALY_WINDOW_HOURS);
        let (role_changes, deletions, logins) = tokio::try_join!(
            self.audits.audit_events_since(AuditAction::RoleChange.as_str(), since),
            self.audits.audit_events_since(AuditAction::UserDelete.as_str(), since),
            self.audits.audit_events_since(AuditAction::Login.as_str(), since),
        )?;

        let mut alerts = Vec::new();
        if role_changes.len() >= ROLE_CHANGE_THRESHOLD {
            alerts.push(
                NewSecurityAlert::new(
                    "mass_role_change",
                    AlertSeverity::High,
                    "Unusual number of role changes",
                    format!("{} role changes in the last hour", role_changes.len()),
                )
                .with_metadata(json!({ "count": role_changes.len() })),
            );
        }
        if deletions.len() >= USER_DELETE_THRESHOLD {
            alerts.push(
                NewSecurityAlert::new(
                    "mass_user_deletion",
                    AlertSeverity::Critical,
                    "Unusual number of account deletions",
                    format!("{} accounts deleted in the last hour", deletions.len()),
                )
                .with_metadata(json!({ "count": deletions.len() })),
            );
        }

        let mut ips_by_user: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for entry in &logins {
            if let (Some(user), Some(ip)) = (entry.user_id.as_deref(), entry.ip_address.as_deref()) {
                ips_by_user.entry(user).or_default().insert(ip);
            }
        }
        for (user, ips) in ips_by_user {
            if ips.len() >= DISTINCT_IP_THRESHOLD {
                alerts.push(
                    NewSecurityAlert::new(
                        "unusual_ip_activity",
                        AlertSeverity::High,
                        "Unusual IP activity",
                        format!("User logged in from {} different IPs in the last hour", ips.len()),
                    )
                    .with_metadata(json!({ "ip_count": ips.len(), "ips": ips }))
                    .with_user(user),
                );
            }
        }

        self.raise_all(alerts).await
    }

    async fn raise_all(&self, alerts: Vec<NewSecurityAlert>) -> Result<usize, ServiceError> {
        let mut raised = 0;
        for alert in alerts {
            self.alerts.create_alert(alert).await?;
            raised += 1;
        }
        Ok(raised)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::{AuditLogEntry, ResourceType};
    use crate::services::alerts::AlertNotificationConfig;
    use crate::services::email::MockEmailService;
    use crate::services::login_security::{LockoutPolicy, LoginSecurityTracker};
    use crate::services::audit::{AuditLogger, ClientInfo};
    use crate::store::MemoryStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        monitor: SecurityMonitor,
        alerts: AlertService,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::default());
        let alerts = AlertService::new(
            store.clone(),
            Arc::new(MockEmailService::new()),
            clock.clone(),
            AlertNotificationConfig::default(),
        );
        let monitor = SecurityMonitor::new(store.clone(), store.clone(), alerts.clone(), clock.clone());
        Fixture {
            store,
            clock,
            monitor,
            alerts,
        }
    }

    async fn fail_logins(f: &Fixture, ip: &str, n: usize) {
        let tracker = LoginSecurityTracker::new(
            f.store.clone(),
            AuditLogger::new(f.store.clone(), f.clock.clone()),
            f.clock.clone(),
            LockoutPolicy::default(),
        );
        let client = ClientInfo {
            ip_address: Some(ip.to_string()),
            user_agent: None,
        };
        for i in 0..n {
            let email = format!("user{}@example.com", i);
            tracker.log_login_attempt(&email, None, false, &client, None).await;
        }
    }

    async fn audit(f: &Fixture, action: AuditAction, user: &str, ip: &str) {
        let mut entry = AuditLogEntry::new(action, ResourceType::User, f.clock.now());
        entry.user_id = Some(user.to_string());
        entry.ip_address = Some(ip.to_string());
        f.store.insert_audit(&entry).await.unwrap();
    }

    #[tokio::test]
    async fn failed_login_thresholds_by_ip() {
        let f = fixture();
        fail_logins(&f, "10.0.0.1", 20).await;
        fail_logins(&f, "10.0.0.2", 12).await;
        fail_logins(&f, "10.0.0.3", 9).await;

        let report = f.monitor.run_monitoring().await;
        assert_eq!(report.alerts_raised, 2);

        let alerts = f.alerts.list_alerts(false, 10).await.unwrap();
        let critical = alerts.iter().find(|a| a.severity == AlertSeverity::Critical).unwrap();
        assert_eq!(critical.ip_address.as_deref(), Some("10.0.0.1"));
        let high = alerts.iter().find(|a| a.severity == AlertSeverity::High).unwrap();
        assert_eq!(high.ip_address.as_deref(), Some("10.0.0.2"));
    }

    #[tokio::test]
    async fn old_failures_are_ignored() {
        let f = fixture();
        fail_logins(&f, "10.0.0.1", 25).await;
        f.clock.advance(Duration::hours(25));
        assert_eq!(f.monitor.run_monitoring().await.alerts_raised, 0);
    }

    #[tokio::test]
    async fn locked_accounts_raise_a_medium_alert() {
        let f = fixture();
        let now = f.clock.now();
        for _ in 0..5 {
            f.store
                .increment_failed_login("a@b.com", now, 5, Duration::minutes(15))
                .await
                .unwrap();
        }
        f.monitor.run_monitoring().await;
        let alerts = f.alerts.list_alerts(false, 10).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::Medium);
    }

    #[tokio::test]
    async fn audit_anomalies() {
        let f = fixture();
        for _ in 0..5 {
            audit(&f, AuditAction::RoleChange, "admin", "1.1.1.1").await;
        }
        for _ in 0..3 {
            audit(&f, AuditAction::UserDelete, "admin", "1.1.1.1").await;
        }
        for i in 0..5 {
            audit(&f, AuditAction::Login, "roamer", &format!("2.2.2.{}", i)).await;
        }
        for _ in 0..4 {
            audit(&f, AuditAction::Login, "homebody", "3.3.3.3").await;
        }

        let report = f.monitor.run_monitoring().await;
        assert_eq!(report.alerts_raised, 3);
        let alerts = f.alerts.list_alerts(false, 10).await.unwrap();
        let types: BTreeSet<&str> = alerts.iter().map(|a| a.alert_type.as_str()).collect();
        assert!(types.contains("mass_role_change"));
        assert!(types.contains("mass_user_deletion"));
        assert!(types.contains("unusual_ip_activity"));
        let roamer = alerts.iter().find(|a| a.alert_type == "unusual_ip_activity").unwrap();
        assert_eq!(roamer.user_id.as_deref(), Some("roamer"));
    }

    #[tokio::test]
    async fn store_outage_is_reported_not_raised() {
        let f = fixture();
        f.store.set_available(false);
        let report = f.monitor.run_monitoring().await;
        assert_eq!(report.alerts_raised, 0);
        assert_eq!(report.errors.len(), 2);
    }
}
