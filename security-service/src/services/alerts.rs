//! Alert persistence and administrator notification.

use std::sync::Arc;

use uuid::Uuid;

use super::email::EmailProvider;
use super::error::ServiceError;
use crate::clock::Clock;
use crate::models::{NewSecurityAlert, SecurityAlert};
use crate::store::AlertStore;

#[derive(Debug, Clone, Default)]
pub struct AlertNotificationConfig {
    /// Recipient for high and critical alerts; notifications are skipped when unset.
    pub admin_email: Option<String>,
    pub app_base_url: String,
}

#[derive(Clone)]
pub struct AlertService {
    store: Arc<dyn AlertStore>,
    email: Arc<dyn EmailProvider>,
    clock: Arc<dyn Clock>,
    config: AlertNotificationConfig,
}

impl AlertService {
    pub fn new(
        store: Arc<dyn AlertStore>,
        email: Arc<dyn EmailProvider>,
        clock: Arc<dyn Clock>,
        config: AlertNotificationConfig,
    ) -> Self {
        Self {
            store,
            email,
            clock,
            config,
        }
    }

    /// Persist the alert, then page the administrator in the background for
    /// high and critical severities.
    pub async fn create_alert(&self, alert: NewSecurityAlert) -> Result<SecurityAlert, ServiceError> {
        let alert = SecurityAlert::from_new(alert, self.clock.now());
        self.store.insert_alert(&alert).await?;

        metrics::counter!("security_alerts_total", "severity" => alert.severity.as_str())
            .increment(1);
        tracing::warn!(
            alert_id = %alert.id,
            alert_type = %alert.alert_type,
            severity = %alert.severity,
            "Security alert raised"
        );

        if alert.severity.notifies() {
            self.dispatch_notification(&alert);
        }
        Ok(alert)
    }

    pub async fn list_alerts(
        &self,
        unacknowledged_only: bool,
        limit: u32,
    ) -> Result<Vec<SecurityAlert>, ServiceError> {
        Ok(self.store.list_alerts(unacknowledged_only, limit).await?)
    }

    pub async fn acknowledge(&self, id: Uuid) -> Result<(), ServiceError> {
        if self.store.acknowledge_alert(id).await? {
            Ok(())
        } else {
            Err(ServiceError::AlertNotFound)
        }
    }

    fn dispatch_notification(&self, alert: &SecurityAlert) {
        let Some(to) = self.config.admin_email.clone() else {
            tracing::debug!(alert_id = %alert.id, "No admin email configured, skipping notification");
            return;
        };
        let subject = format!(
            "[{}] Security Alert: {}",
            alert.severity.as_str().to_uppercase(),
            alert.title
        );
        let html = render_alert_email(alert, &self.config.app_base_url);
        let email = self.email.clone();
        let alert_id = alert.id;

        tokio::spawn(async move {
            if let Err(e) = email.send_email(&to, &subject, &html).await {
                tracing::error!(error = %e, alert_id = %alert_id, "Failed to send alert email");
            }
        });
    }
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn render_alert_email(alert: &SecurityAlert, base_url: &str) -> String {
    let metadata = serde_json::to_string_pretty(&alert.metadata).unwrap_or_default();
    let dashboard = format!("{}/admin/security", base_url.trim_end_matches('/'));
    format!(
        r###"<html>
    <body style="font-family: Arial, sans-serif;">
        <h2>Security Alert</h2>
        <p><strong>Severity:</strong> {severity}</p>
        <p><strong>Type:</strong> {alert_type}</p>
        <p><strong>Title:</strong> {title}</p>
        <p><strong>Message:</strong> {message}</p>
        <p><strong>Metadata:</strong></p>
        <pre>{metadata}</pre>
        <p><strong>Time:</strong> {time}</p>
        <p><a href="{dashboard}">View Security Dashboard</a></p>
    </body>
</html>
"###,
        severity = alert.severity.as_str().to_uppercase(),
        alert_type = escape_html(&alert.alert_type),
        title = escape_html(&alert.title),
        message = escape_html(&alert.message),
        metadata = escape_html(&metadata),
        time = alert.created_at.to_rfc3339(),
        dashboard = escape_html(&dashboard),
    )
}
