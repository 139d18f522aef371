//! # Boost Notifier
//!
//! Priority-ordered subscriber chain carrying boost trigger events from
//! their producers (scene detection, input boost, ...) to the arbiter.
//!
//! Handlers run synchronously on the publisher's thread, lowest priority
//! value first.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use spin::RwLock;

use crate::session::BoostDuration;

// =============================================================================
// EVENTS
// =============================================================================

/// Boost trigger event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoostEvent {
    /// Start (or refresh) an exclusive boost session
    Activate(BoostDuration),
    /// End the current boost session early
    Deactivate,
    /// Reserved; delivered to subscribers but not acted on by the arbiter
    QtqActivate,
    /// Reserved; delivered to subscribers but not acted on by the arbiter
    QtqDeactivate,
}

impl BoostEvent {
    /// Decode a raw event number and optional duration payload
    ///
    /// A missing payload on an activation means the default duration.
    pub fn from_raw(event: u32, duration: Option<i32>) -> Option<Self> {
        match event {
            0 => Some(BoostEvent::Activate(
                duration.map_or(BoostDuration::Default, BoostDuration::from_raw),
            )),
            1 => Some(BoostEvent::Deactivate),
            2 => Some(BoostEvent::QtqActivate),
            3 => Some(BoostEvent::QtqDeactivate),
            _ => None,
        }
    }
}

/// Response from a notifier handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyResponse {
    /// Event was acted on
    Handled,
    /// Event was not relevant
    Ignored,
    /// Handling failed
    Error(String),
}

// =============================================================================
// SUBSCRIPTIONS
// =============================================================================

/// Notifier handler function type
pub type NotifyHandler = Box<dyn Fn(&BoostEvent) -> NotifyResponse + Send + Sync>;

/// Subscription ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NotifierId(u64);

/// Subscription priority (lower = runs earlier)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct NotifierPriority(pub u8);

impl NotifierPriority {
    /// Runs first
    pub const HIGHEST: Self = Self(0);
    /// Default
    pub const NORMAL: Self = Self(128);
    /// Runs last
    pub const LOWEST: Self = Self(255);
}

impl Default for NotifierPriority {
    fn default() -> Self {
        Self::NORMAL
    }
}

struct Subscription {
    id: NotifierId,
    name: String,
    priority: NotifierPriority,
    handler: NotifyHandler,
}

/// Result of one notification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifyOutcome {
    /// Handlers that acted on the event
    pub handled: usize,
    /// Handlers that ignored the event
    pub ignored: usize,
    /// Handlers that failed
    pub errors: usize,
}

// =============================================================================
// NOTIFIER
// =============================================================================

/// Boost trigger chain
pub struct BoostNotifier {
    subscriptions: RwLock<Vec<Subscription>>,
    next_id: AtomicU64,
    notified: AtomicU64,
    active: AtomicBool,
}

impl BoostNotifier {
    /// Create an empty chain
    pub const fn new() -> Self {
        Self {
            subscriptions: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            notified: AtomicU64::new(0),
            active: AtomicBool::new(true),
        }
    }

    /// Add a handler; equal priorities run in subscription order
    pub fn subscribe(
        &self,
        name: impl Into<String>,
        priority: NotifierPriority,
        handler: NotifyHandler,
    ) -> NotifierId {
        let id = NotifierId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut subs = self.subscriptions.write();
        let pos = subs
            .iter()
            .position(|s| s.priority > priority)
            .unwrap_or(subs.len());
        subs.insert(pos, Subscription {
            id,
            name: name.into(),
            priority,
            handler,
        });

        log::debug!("BoostNotifier: New subscription {:?}", id);
        id
    }

    /// Remove a handler
    pub fn unsubscribe(&self, id: NotifierId) -> bool {
        let mut subs = self.subscriptions.write();
        match subs.iter().position(|s| s.id == id) {
            Some(pos) => {
                subs.remove(pos);
                log::debug!("BoostNotifier: Removed subscription {:?}", id);
                true
            },
            None => false,
        }
    }

    /// Deliver `event` to every handler
    pub fn notify(&self, event: BoostEvent) -> NotifyOutcome {
        let mut outcome = NotifyOutcome::default();
        if !self.active.load(Ordering::Relaxed) {
            return outcome;
        }
        self.notified.fetch_add(1, Ordering::Relaxed);

        let subs = self.subscriptions.read();
        for sub in subs.iter() {
            match (sub.handler)(&event) {
                NotifyResponse::Handled => outcome.handled += 1,
                NotifyResponse::Ignored => outcome.ignored += 1,
                NotifyResponse::Error(e) => {
                    log::warn!("BoostNotifier: Handler '{}' error: {}", sub.name, e);
                    outcome.errors += 1;
                },
            }
        }

        outcome
    }

    /// Number of events delivered
    pub fn events_notified(&self) -> u64 {
        self.notified.load(Ordering::Relaxed)
    }

    /// Number of handlers
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Stop delivering events
    pub fn pause(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    /// Resume delivering events
    pub fn resume(&self) {
        self.active.store(true, Ordering::SeqCst);
    }
}

impl core::fmt::Debug for BoostNotifier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BoostNotifier")
            .field("subscriptions", &self.subscription_count())
            .field("notified", &self.events_notified())
            .field("active", &self.active.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for BoostNotifier {
    fn default() -> Self {
        Self::new()
    }
}
