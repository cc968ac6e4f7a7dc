//! Alert dispatch to the reflex system.
//!
//! Surfaced events are mapped to one of two reflex actions:
//! - `call_security` for falls, violence and fire/smoke
//! - `notify_admin` for abandoned objects and intrusions
//!
//! Loitering has no action and is only logged. Camera units never talk HTTP
//! themselves: they hand records to an `AlertSender`, and a single `AlertWorker`
//! thread drains the bounded queue. A full queue drops the alert with a warning, so a
//! slow reflex endpoint cannot stall frame processing.

use anyhow::{Context, Result};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::{EventDetails, EventKind, EventRecord};

const ADMIN_DEPARTMENT: &str = "Security";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReflexAction {
    CallSecurity { location: String },
    NotifyAdmin { department: String, message: String },
}

impl ReflexAction {
    /// Action for a surfaced event, or `None` for kinds that are only logged.
    pub fn for_event(record: &EventRecord) -> Option<Self> {
        let camera = record.camera_id.as_str();
        match record.event_type {
            EventKind::FallDetected => Some(Self::call_security(camera, "Possible Fall Detected")),
            EventKind::ViolenceDetected => {
                let reason = match &record.details {
                    EventDetails::Violence { reason, .. } => reason.as_str(),
                    _ => "Aggressive Behavior",
                };
                Some(Self::call_security(camera, reason))
            }
            EventKind::FireSmokeDetected => Some(Self::call_security(camera, "Fire/Smoke Detected")),
            EventKind::AbandonedObject => {
                let duration = match &record.details {
                    EventDetails::AbandonedObject { duration, .. } => duration.to_string(),
                    _ => "?".to_string(),
                };
                Some(ReflexAction::NotifyAdmin {
                    department: ADMIN_DEPARTMENT.to_string(),
                    message: format!(
                        "High Priority: Unattended object at {} for >{}s.",
                        camera, duration
                    ),
                })
            }
            EventKind::IntrusionDetected => Some(ReflexAction::NotifyAdmin {
                department: ADMIN_DEPARTMENT.to_string(),
                message: format!("Alert: Intrusion detected in restricted zone at {}.", camera),
            }),
            EventKind::LoiteringDetected => None,
        }
    }

    fn call_security(camera: &str, reason: &str) -> Self {
        ReflexAction::CallSecurity {
            location: format!("{} (CRITICAL: {})", camera, reason),
        }
    }

    /// Path below the reflex base URL.
    pub fn endpoint(&self) -> &'static str {
        match self {
            ReflexAction::CallSecurity { .. } => "/actions/call_security",
            ReflexAction::NotifyAdmin { .. } => "/actions/notify_admin",
        }
    }

    pub fn payload(&self) -> serde_json::Value {
        match self {
            ReflexAction::CallSecurity { location } => json!({ "location": location }),
            ReflexAction::NotifyAdmin {
                department,
                message,
            } => json!({ "department": department, "message": message }),
        }
    }
}

pub trait AlertDispatcher: Send {
    /// Deliver one surfaced event. Unmapped kinds succeed without doing anything.
    fn dispatch(&mut self, record: &EventRecord) -> Result<()>;
}

/// Posts reflex actions as JSON to `<base_url><endpoint>`.
pub struct HttpReflexDispatcher {
    agent: ureq::Agent,
    base_url: String,
}

impl HttpReflexDispatcher {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl AlertDispatcher for HttpReflexDispatcher {
    fn dispatch(&mut self, record: &EventRecord) -> Result<()> {
        let Some(action) = ReflexAction::for_event(record) else {
            log::debug!(
                "no reflex action for {} on {}",
                record.event_type,
                record.camera_id
            );
            return Ok(());
        };
        let url = format!("{}{}", self.base_url, action.endpoint());
        self.agent
            .post(&url)
            .send_json(action.payload())
            .with_context(|| format!("post reflex action to {}", url))?;
        log::info!("triggered reflex action {} for {}", action.endpoint(), record.camera_id);
        Ok(())
    }
}

/// Counters reported by the worker when it shuts down.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub dispatched: u64,
    pub failed: u64,
    /// Rejected because the queue was full.
    pub dropped: u64,
}

/// Cloneable handle camera units use to queue alerts.
#[derive(Clone)]
pub struct AlertSender {
    tx: SyncSender<EventRecord>,
    dropped: Arc<AtomicU64>,
}

impl AlertSender {
    /// Queue `record` without blocking. Returns `false` if it was dropped.
    pub fn submit(&self, record: EventRecord) -> bool {
        match self.tx.try_send(record) {
            Ok(()) => true,
            Err(TrySendError::Full(record)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "alert queue full; dropping {} from {}",
                    record.event_type,
                    record.camera_id
                );
                false
            }
            Err(TrySendError::Disconnected(record)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "alert worker stopped; dropping {} from {}",
                    record.event_type,
                    record.camera_id
                );
                false
            }
        }
    }
}

pub struct AlertWorker {
    sender: Option<AlertSender>,
    handle: Option<JoinHandle<DispatchStats>>,
}

impl AlertWorker {
    pub fn spawn<D: AlertDispatcher + 'static>(dispatcher: D, capacity: usize) -> Self {
        let (tx, rx) = mpsc::sync_channel(capacity.max(1));
        let handle = std::thread::Builder::new()
            .name("alert-dispatch".to_string())
            .spawn(move || drain(dispatcher, rx));
        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::error!("failed to start alert worker: {}", e);
                None
            }
        };
        Self {
            sender: Some(AlertSender {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            }),
            handle,
        }
    }

    pub fn sender(&self) -> Option<AlertSender> {
        self.sender.clone()
    }

    /// Stop accepting alerts, deliver what is queued, and wait for the worker.
    ///
    /// Returns once every outstanding `AlertSender` clone has been dropped.
    pub fn shutdown(mut self) -> DispatchStats {
        let dropped = self
            .sender
            .take()
            .map(|sender| sender.dropped.load(Ordering::Relaxed))
            .unwrap_or(0);
        let mut stats = match self.handle.take().map(JoinHandle::join) {
            Some(Ok(stats)) => stats,
            Some(Err(_)) => {
                log::error!("alert worker panicked");
                DispatchStats::default()
            }
            None => DispatchStats::default(),
        };
        stats.dropped = dropped;
        stats
    }
}

fn drain<D: AlertDispatcher>(mut dispatcher: D, rx: Receiver<EventRecord>) -> DispatchStats {
    let mut stats = DispatchStats::default();
    for record in rx {
        match dispatcher.dispatch(&record) {
            Ok(()) => stats.dispatched += 1,
            Err(e) => {
                stats.failed += 1;
                log::warn!(
                    "could not dispatch {} from {}: {:#}",
                    record.event_type,
                    record.camera_id,
                    e
                );
            }
        }
    }
    stats
}
