//! Decides whether and where a classified reading, a flow condition, or a
//! daily heartbeat turns into a notification.
//!
//! Every emission goes through the `Notifier` trait. Send failures are
//! logged and swallowed: a batch job never fails over a notification, and
//! nothing here retries.

use std::path::PathBuf;

use chrono::NaiveDate;

use crate::alert::continuity::FlowCondition;
use crate::alert::heartbeat::{HeartbeatLog, HeartbeatState};
use crate::alert::thresholds::{self, ThresholdAlert, Tier};
use crate::logging::{self, DataSource};
use crate::model::Reading;
use crate::notify::Notifier;
use crate::ranges::RangeTable;

/// How CAUTION-tier readings are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CautionDelivery {
    /// Queued and sent as one message by `flush_cautions`.
    #[default]
    Summary,
    /// One message per caution, like an alert but lower priority.
    Separate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    Sent,
    AlreadySent,
    /// The send failed. The day is still marked, so the job does not spam
    /// retries on every run.
    Failed,
}

/// Where notifications go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channels {
    /// Threshold alerts, sustained-flow alerts and summaries.
    pub alerts: String,
    /// Heartbeats and diagnostics.
    pub heartbeat: String,
}

pub struct AlertEngine<'a> {
    notifier: &'a dyn Notifier,
    channels: Channels,
    ranges: &'a RangeTable,
    heartbeat_dir: PathBuf,
    caution_delivery: CautionDelivery,
    pending_cautions: Vec<ThresholdAlert>,
}

impl<'a> AlertEngine<'a> {
    pub fn new(
        notifier: &'a dyn Notifier,
        channels: Channels,
        ranges: &'a RangeTable,
        heartbeat_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            notifier,
            channels,
            ranges,
            heartbeat_dir: heartbeat_dir.into(),
            caution_delivery: CautionDelivery::default(),
            pending_cautions: Vec::new(),
        }
    }

    pub fn with_caution_delivery(mut self, delivery: CautionDelivery) -> Self {
        self.caution_delivery = delivery;
        self
    }

    pub fn channels(&self) -> &Channels {
        &self.channels
    }

    // -----------------------------------------------------------------------
    // Heartbeat
    // -----------------------------------------------------------------------

    /// Sends `text` to the heartbeat channel at most once per `today` for
    /// `category`.
    ///
    /// A marker file that cannot be read is treated as "not sent"; one that
    /// cannot be written is logged. Neither aborts the job.
    pub fn heartbeat(&self, category: &str, today: NaiveDate, text: &str) -> HeartbeatOutcome {
        let log = HeartbeatLog::new(&self.heartbeat_dir, category);
        match log.state(today) {
            Ok(HeartbeatState::SentToday) => return HeartbeatOutcome::AlreadySent,
            Ok(HeartbeatState::NotSentToday) => {}
            Err(e) => logging::warn(
                DataSource::System,
                None,
                &format!("cannot read heartbeat marker {}: {}", log.path().display(), e),
            ),
        }

        let outcome = if self.dispatch(&self.channels.heartbeat, text) {
            HeartbeatOutcome::Sent
        } else {
            HeartbeatOutcome::Failed
        };

        if let Err(e) = log.record(today) {
            logging::warn(
                DataSource::System,
                None,
                &format!("cannot write heartbeat marker {}: {}", log.path().display(), e),
            );
        }
        outcome
    }

    // -----------------------------------------------------------------------
    // Threshold alerts
    // -----------------------------------------------------------------------

    /// Classifies a newly logged reading and notifies as its tier requires.
    pub fn on_reading(&mut self, reading: &Reading) -> Tier {
        let tier = thresholds::classify(self.ranges, &reading.source_key, reading.value);
        let Some(alert) = thresholds::check_reading(self.ranges, reading) else {
            return tier;
        };

        match (alert.tier, self.caution_delivery) {
            (Tier::Caution, CautionDelivery::Summary) => {
                logging::debug(
                    DataSource::System,
                    Some(&alert.metric),
                    "caution queued for summary",
                );
                self.pending_cautions.push(alert);
            }
            _ => {
                self.dispatch(&self.channels.alerts, &alert.message());
            }
        }
        tier
    }

    /// Cautions queued since the last flush, as one message.
    pub fn take_caution_summary(&mut self) -> Option<String> {
        if self.pending_cautions.is_empty() {
            return None;
        }
        let lines: Vec<String> = self
            .pending_cautions
            .drain(..)
            .map(|alert| format!("• {}", alert.message()))
            .collect();
        Some(format!("⚠️ *Outside target range*\n{}", lines.join("\n")))
    }

    /// Sends the queued cautions, if any. Returns true if a message went out.
    pub fn flush_cautions(&mut self) -> bool {
        match self.take_caution_summary() {
            Some(text) => self.dispatch(&self.channels.alerts, &text),
            None => false,
        }
    }

    // -----------------------------------------------------------------------
    // Continuity alerts
    // -----------------------------------------------------------------------

    /// Notifies on sustained flow (alert channel) or a discrepancy
    /// (heartbeat channel). `Quiet` sends nothing.
    pub fn on_flow_condition(&self, condition: &FlowCondition, window_hours: i64) -> bool {
        match condition {
            FlowCondition::SustainedFlow { total_ccf, .. } => {
                let text = format!(
                    "🚰 *Water flow alert: {} hours continuous*\nTotal use: `{:.4} CCF`",
                    window_hours, total_ccf
                );
                self.dispatch(&self.channels.alerts, &text)
            }
            FlowCondition::Discrepancy { coarse_total_ccf } => {
                let text = format!(
                    "🔍 Flow data discrepancy: hourly total `{:.4} CCF` over the last {} hours \
                     but no per-minute samples",
                    coarse_total_ccf, window_hours
                );
                self.dispatch(&self.channels.heartbeat, &text)
            }
            FlowCondition::Quiet { .. } => false,
        }
    }

    /// Sends arbitrary text to the alert channel (summaries, reports).
    pub fn post(&self, text: &str) -> bool {
        self.dispatch(&self.channels.alerts, text)
    }

    fn dispatch(&self, channel: &str, text: &str) -> bool {
        match self.notifier.send(channel, text) {
            Ok(()) => true,
            Err(e) => {
                logging::error(
                    DataSource::Slack,
                    None,
                    &format!("notification to {} failed: {}", channel, e),
                );
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Band, NotifyError, RangeSpec, ReadingTime};
    use std::cell::RefCell;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recording {
        sent: RefCell<Vec<(String, String)>>,
        fail: bool,
    }

    impl Notifier for Recording {
        fn send(&self, channel_id: &str, text: &str) -> Result<(), NotifyError> {
            self.sent
                .borrow_mut()
                .push((channel_id.to_string(), text.to_string()));
            if self.fail {
                Err(NotifyError::Rejected("channel_not_found".into()))
            } else {
                Ok(())
            }
        }
    }

    fn channels() -> Channels {
        Channels {
            alerts: "C_ALERT".into(),
            heartbeat: "C_HEART".into(),
        }
    }

    fn ranges() -> RangeTable {
        RangeTable::from_specs([(
            "ph",
            RangeSpec::new(Band::new(7.2, 7.8), Some(Band::new(6.8, 8.2))),
        )])
        .unwrap()
    }

    fn ph(value: f64) -> Reading {
        Reading::new(
            "ph",
            ReadingTime::Day(NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()),
            Some(value),
        )
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
    }

    // --- Heartbeat ----------------------------------------------------------

    #[test]
    fn test_heartbeat_fires_once_per_day_across_runs() {
        let dir = TempDir::new().unwrap();
        let notifier = Recording::default();
        let table = ranges();

        for run in 0..3 {
            // A fresh engine per run, like separate job invocations.
            let engine = AlertEngine::new(&notifier, channels(), &table, dir.path());
            let outcome = engine.heartbeat("water_usage", today(), "updater ran");
            let expected = if run == 0 {
                HeartbeatOutcome::Sent
            } else {
                HeartbeatOutcome::AlreadySent
            };
            assert_eq!(outcome, expected, "run {}", run);
        }

        let sent = notifier.sent.borrow();
        assert_eq!(sent.len(), 1, "heartbeat should be sent exactly once");
        assert_eq!(sent[0].0, "C_HEART");
    }

    #[test]
    fn test_heartbeat_fires_again_next_day() {
        let dir = TempDir::new().unwrap();
        let notifier = Recording::default();
        let table = ranges();
        let engine = AlertEngine::new(&notifier, channels(), &table, dir.path());
        engine.heartbeat("water_usage", today(), "ran");
        let tomorrow = today().succ_opt().unwrap();
        assert_eq!(
            engine.heartbeat("water_usage", tomorrow, "ran"),
            HeartbeatOutcome::Sent
        );
    }

    #[test]
    fn test_failed_heartbeat_is_swallowed_and_marked() {
        let dir = TempDir::new().unwrap();
        let notifier = Recording { fail: true, ..Default::default() };
        let table = ranges();
        let engine = AlertEngine::new(&notifier, channels(), &table, dir.path());
        assert_eq!(engine.heartbeat("cf", today(), "ran"), HeartbeatOutcome::Failed);
        assert_eq!(engine.heartbeat("cf", today(), "ran"), HeartbeatOutcome::AlreadySent);
    }

    // --- Threshold alerts ---------------------------------------------------

    #[test]
    fn test_alert_tier_notifies_alert_channel() {
        let dir = TempDir::new().unwrap();
        let notifier = Recording::default();
        let table = ranges();
        let mut engine = AlertEngine::new(&notifier, channels(), &table, dir.path());

        assert_eq!(engine.on_reading(&ph(8.5)), Tier::Alert);
        let sent = notifier.sent.borrow();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "C_ALERT");
        assert!(sent[0].1.contains("8.5"), "alert should name the value: {}", sent[0].1);
    }

    #[test]
    fn test_ok_and_unknown_never_notify() {
        let dir = TempDir::new().unwrap();
        let notifier = Recording::default();
        let table = ranges();
        let mut engine = AlertEngine::new(&notifier, channels(), &table, dir.path());

        assert_eq!(engine.on_reading(&ph(7.5)), Tier::Ok);
        let missing = Reading::new("ph", ph(7.5).timestamp, None);
        assert_eq!(engine.on_reading(&missing), Tier::Unknown);
        assert!(!engine.flush_cautions());
        assert!(notifier.sent.borrow().is_empty());
    }

    #[test]
    fn test_cautions_are_merged_into_one_summary() {
        let dir = TempDir::new().unwrap();
        let notifier = Recording::default();
        let table = ranges();
        let mut engine = AlertEngine::new(&notifier, channels(), &table, dir.path());

        assert_eq!(engine.on_reading(&ph(8.0)), Tier::Caution);
        assert_eq!(engine.on_reading(&ph(7.0)), Tier::Caution);
        assert!(notifier.sent.borrow().is_empty(), "cautions wait for the summary");

        assert!(engine.flush_cautions());
        let sent = notifier.sent.borrow();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.matches('•').count(), 2);
    }

    #[test]
    fn test_separate_caution_delivery_sends_immediately() {
        let dir = TempDir::new().unwrap();
        let notifier = Recording::default();
        let table = ranges();
        let mut engine = AlertEngine::new(&notifier, channels(), &table, dir.path())
            .with_caution_delivery(CautionDelivery::Separate);

        engine.on_reading(&ph(8.0));
        assert_eq!(notifier.sent.borrow().len(), 1);
        assert!(engine.take_caution_summary().is_none());
    }

    #[test]
    fn test_send_failure_does_not_panic_or_propagate() {
        let dir = TempDir::new().unwrap();
        let notifier = Recording { fail: true, ..Default::default() };
        let table = ranges();
        let mut engine = AlertEngine::new(&notifier, channels(), &table, dir.path());
        assert_eq!(engine.on_reading(&ph(9.0)), Tier::Alert);
    }

    // --- Continuity ---------------------------------------------------------

    #[test]
    fn test_sustained_flow_goes_to_alert_channel_with_total() {
        let dir = TempDir::new().unwrap();
        let notifier = Recording::default();
        let table = ranges();
        let engine = AlertEngine::new(&notifier, channels(), &table, dir.path());

        let sent = engine.on_flow_condition(
            &FlowCondition::SustainedFlow { total_ccf: 0.4321, samples: 240 },
            4,
        );
        assert!(sent);
        let log = notifier.sent.borrow();
        assert_eq!(log[0].0, "C_ALERT");
        assert!(log[0].1.contains("4 hours continuous"));
        assert!(log[0].1.contains("0.4321 CCF"));
    }

    #[test]
    fn test_discrepancy_goes_to_heartbeat_channel() {
        let dir = TempDir::new().unwrap();
        let notifier = Recording::default();
        let table = ranges();
        let engine = AlertEngine::new(&notifier, channels(), &table, dir.path());

        engine.on_flow_condition(&FlowCondition::Discrepancy { coarse_total_ccf: 0.3 }, 4);
        engine.on_flow_condition(&FlowCondition::Quiet { samples: 10, idle_samples: 2 }, 4);
        let log = notifier.sent.borrow();
        assert_eq!(log.len(), 1, "quiet windows send nothing");
        assert_eq!(log[0].0, "C_HEART");
        assert!(log[0].1.contains("discrepancy"));
    }
}
