//! Alert Sink: fan-out delivery with a bounded-time retention log
//!
//! Every alert is:
//! - logged at a level matching its severity
//! - appended to the in-memory log (purged after the retention window)
//! - broadcast to in-process subscribers
//! - delivered concurrently to every configured channel
//!
//! Channel failures are logged and never escalated to the caller.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::collaborators::{build_notifier, HttpClient, Notifier};
use crate::config::defaults::ALERT_CHANNEL_CAPACITY;
use crate::config::AlertsConfig;
use crate::types::{AlertKind, SecurityAlert, Severity};

pub struct AlertSink {
    notifiers: Vec<Arc<dyn Notifier>>,
    log: RwLock<VecDeque<SecurityAlert>>,
    events: broadcast::Sender<SecurityAlert>,
    retention: chrono::Duration,
}

impl AlertSink {
    pub fn new(notifiers: Vec<Arc<dyn Notifier>>, retention: chrono::Duration) -> Self {
        let (events, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);
        Self {
            notifiers,
            log: RwLock::new(VecDeque::new()),
            events,
            retention,
        }
    }

    /// Build the sink with one notifier per configured channel
    pub fn from_config(config: &AlertsConfig, http: Arc<dyn HttpClient>) -> Self {
        let notifiers = config
            .channels
            .iter()
            .map(|c| build_notifier(c, http.clone()))
            .collect();
        Self::new(notifiers, config.retention())
    }

    pub fn channel_count(&self) -> usize {
        self.notifiers.len()
    }

    /// Create, record and deliver an alert
    pub async fn emit(
        &self,
        kind: AlertKind,
        message: impl Into<String>,
        severity: Severity,
    ) -> SecurityAlert {
        let alert = SecurityAlert::new(kind, message, severity);
        self.record(alert.clone()).await;
        alert
    }

    /// Record and deliver an already-built alert
    pub async fn record(&self, alert: SecurityAlert) {
        match alert.severity {
            Severity::Critical => error!(kind = %alert.kind, id = %alert.id, "🚨 {}", alert.message),
            Severity::Warning => warn!(kind = %alert.kind, id = %alert.id, "{}", alert.message),
            Severity::Info => info!(kind = %alert.kind, id = %alert.id, "{}", alert.message),
        }

        self.log.write().await.push_back(alert.clone());
        // No subscribers is fine
        let _ = self.events.send(alert.clone());

        let deliveries = self.notifiers.iter().map(|n| {
            let alert = &alert;
            async move { (n.channel_name().to_string(), n.send(alert).await) }
        });
        for (channel, result) in join_all(deliveries).await {
            match result {
                Ok(()) => debug!(channel = %channel, id = %alert.id, "Alert delivered"),
                Err(e) => warn!(channel = %channel, id = %alert.id, error = %e, "Alert delivery failed"),
            }
        }
    }

    /// Drop alerts older than the retention window; returns how many were removed
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut log = self.log.write().await;
        let before = log.len();
        log.retain(|a| !a.is_expired(now, self.retention));
        let removed = before - log.len();
        if removed > 0 {
            debug!(removed, remaining = log.len(), "Purged expired alerts");
        }
        removed
    }

    /// Retained alerts, oldest first
    pub async fn active_alerts(&self) -> Vec<SecurityAlert> {
        self.log.read().await.iter().cloned().collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SecurityAlert> {
        self.events.subscribe()
    }

    /// Periodic retention sweep until cancelled
    pub async fn run_retention(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        info!(interval_secs = interval.as_secs(), "[AlertSink] Retention sweep started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[AlertSink] Retention sweep stopped");
                    return;
                }
                _ = tokio::time::sleep(interval) => {
                    self.purge_expired(Utc::now()).await;
                }
            }
        }
    }
}
