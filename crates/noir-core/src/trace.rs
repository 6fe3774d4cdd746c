//! Trace publisher: ordered status-transition events for external listeners.
//!
//! Publishing never blocks. Each listener owns a bounded queue; when it is
//! full the event is dropped for that listener only and a
//! [`TraceItem::Gap`] is delivered ahead of the next event that fits.
//! One slot of every queue is held back so a listener closed while behind
//! still receives its final gap marker.
//! Listeners whose receiving end is gone are pruned on the next publish.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::domain::execution::StepStatus;
use crate::domain::investigation::{Investigation, InvestigationId, InvestigationStatus};
use crate::metrics::METRICS;
use crate::obs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceEntity {
    Step,
    Investigation,
}

/// One status transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Position within the investigation's trace, starting at 1.
    pub seq: u64,
    pub investigation_id: InvestigationId,
    pub timestamp: DateTime<Utc>,
    pub entity: TraceEntity,
    pub entity_id: String,
    pub old_status: Option<String>,
    pub new_status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// What a listener receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceItem {
    Event(TraceEvent),
    /// `missed` events were dropped because this listener fell behind.
    Gap { missed: u64 },
}

struct Listener {
    id: u64,
    filter: Option<InvestigationId>,
    tx: mpsc::Sender<TraceItem>,
    missed: u64,
}

enum Delivery {
    Sent,
    Full,
    Closed,
}

impl Listener {
    fn wants(&self, event: &TraceEvent) -> bool {
        self.filter
            .as_ref()
            .map_or(true, |id| *id == event.investigation_id)
    }

    /// Sends `item` only if at least `room` slots are free.
    fn send(&self, item: TraceItem, room: usize) -> Delivery {
        if self.tx.is_closed() {
            return Delivery::Closed;
        }
        if self.tx.capacity() < room {
            return Delivery::Full;
        }
        match self.tx.try_send(item) {
            Ok(()) => Delivery::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Returns false once the receiver is gone.
    fn deliver(&mut self, event: &TraceEvent) -> bool {
        if self.missed > 0 {
            match self.send(TraceItem::Gap { missed: self.missed }, 2) {
                Delivery::Sent => self.missed = 0,
                Delivery::Full => {
                    self.drop_event();
                    return true;
                }
                Delivery::Closed => return false,
            }
        }
        match self.send(TraceItem::Event(event.clone()), 2) {
            Delivery::Sent => true,
            Delivery::Full => {
                self.drop_event();
                if self.missed == 1 {
                    obs::emit_trace_listener_lagged(self.id, self.missed);
                }
                true
            }
            Delivery::Closed => false,
        }
    }

    /// Report outstanding drops into the reserved slot before the stream ends.
    fn flush_gap(&mut self) {
        if self.missed == 0 {
            return;
        }
        if let Delivery::Sent = self.send(TraceItem::Gap { missed: self.missed }, 1) {
            self.missed = 0;
        }
    }

    fn drop_event(&mut self) {
        self.missed += 1;
        METRICS.inc_trace_events_dropped();
    }
}

#[derive(Default)]
struct Registry {
    listeners: Vec<Listener>,
    next_id: u64,
}

/// Fan-out of trace events to any number of listeners.
#[derive(Clone)]
pub struct TracePublisher {
    inner: Arc<Mutex<Registry>>,
    buffer: usize,
}

impl TracePublisher {
    pub fn new(buffer: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Registry::default())),
            buffer: buffer.max(1),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Listen to one investigation, or to all when `investigation` is `None`.
    pub fn subscribe(&self, investigation: Option<InvestigationId>) -> TraceSubscription {
        let (tx, rx) = mpsc::channel(self.buffer + 1);
        let mut registry = self.registry();
        registry.next_id += 1;
        let id = registry.next_id;
        registry.listeners.push(Listener {
            id,
            filter: investigation,
            tx,
            missed: 0,
        });
        TraceSubscription { id, rx }
    }

    pub fn publish(&self, event: &TraceEvent) {
        let mut registry = self.registry();
        registry
            .listeners
            .retain_mut(|listener| !listener.wants(event) || listener.deliver(event));
    }

    /// Drop listeners scoped to `investigation`, ending their streams once
    /// drained. A listener that fell behind gets its gap marker first.
    pub fn close_investigation(&self, investigation: &InvestigationId) {
        self.registry().listeners.retain_mut(|listener| {
            if listener.filter.as_ref() != Some(investigation) {
                return true;
            }
            listener.flush_gap();
            false
        });
    }

    pub fn listener_count(&self) -> usize {
        self.registry().listeners.len()
    }

    /// Append a step transition to the investigation's trace log and publish it.
    pub fn record_step(
        &self,
        inv: &mut Investigation,
        step_id: &str,
        old: StepStatus,
        new: StepStatus,
        attempt: u32,
        detail: Option<String>,
    ) {
        obs::emit_step_transition(inv.id.as_str(), step_id, old.as_str(), new.as_str(), attempt);
        self.append(
            inv,
            TraceEntity::Step,
            step_id,
            Some(old.as_str()),
            new.as_str(),
            detail,
        );
    }

    /// Move the investigation to `new` and record the transition. No-op when
    /// the status is unchanged.
    pub fn record_status(
        &self,
        inv: &mut Investigation,
        new: InvestigationStatus,
        detail: Option<String>,
    ) {
        let old = std::mem::replace(&mut inv.status, new);
        if old == new {
            return;
        }
        let entity_id = inv.id.to_string();
        self.append(
            inv,
            TraceEntity::Investigation,
            &entity_id,
            Some(old.as_str()),
            new.as_str(),
            detail,
        );
    }

    /// First event of an investigation: creation in its current status.
    pub fn record_created(&self, inv: &mut Investigation) {
        let entity_id = inv.id.to_string();
        let status = inv.status.as_str();
        let detail = Some(format!("target {}", inv.target));
        self.append(inv, TraceEntity::Investigation, &entity_id, None, status, detail);
    }

    fn append(
        &self,
        inv: &mut Investigation,
        entity: TraceEntity,
        entity_id: &str,
        old_status: Option<&str>,
        new_status: &str,
        detail: Option<String>,
    ) {
        let event = TraceEvent {
            seq: inv.trace.len() as u64 + 1,
            investigation_id: inv.id.clone(),
            timestamp: Utc::now(),
            entity,
            entity_id: entity_id.to_string(),
            old_status: old_status.map(str::to_string),
            new_status: new_status.to_string(),
            detail,
        };
        self.publish(&event);
        inv.trace.push(event);
    }
}

impl Default for TracePublisher {
    fn default() -> Self {
        Self::new(256)
    }
}

impl std::fmt::Debug for TracePublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TracePublisher")
            .field("buffer", &self.buffer)
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Receiving end of a trace subscription.
#[derive(Debug)]
pub struct TraceSubscription {
    id: u64,
    rx: mpsc::Receiver<TraceItem>,
}

impl TraceSubscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// `None` once the publisher has dropped this listener and the queue is empty.
    pub async fn recv(&mut self) -> Option<TraceItem> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<TraceItem> {
        self.rx.try_recv().ok()
    }

    pub fn into_stream(self) -> impl Stream<Item = TraceItem> + Send + Unpin {
        Box::pin(futures::stream::unfold(self.rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        }))
    }
}
