//! System registry: the kernel's per-system runtime state.

use std::time::{Duration, Instant};

use engine_component::Filter;

use crate::system::{System, SystemId};

/// A registered system and its scheduling state.
pub struct SystemSlot {
    pub(crate) id: SystemId,
    pub(crate) system: Box<dyn System>,
    pub(crate) filter: Filter,
    /// Minimum time between two runs; zero means every frame.
    pub(crate) interval: Duration,
    pub(crate) last_run: Option<Instant>,
    pub(crate) started: bool,
}

impl SystemSlot {
    pub(crate) fn new(system: Box<dyn System>, interval: Duration) -> Self {
        Self {
            id: system.id(),
            filter: system.filter(),
            system,
            interval,
            last_run: None,
            started: false,
        }
    }

    #[must_use]
    pub fn id(&self) -> SystemId {
        self.id
    }

    #[must_use]
    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    #[must_use]
    pub fn last_run(&self) -> Option<Instant> {
        self.last_run
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// A started system is due if it never ran or its interval has elapsed.
    #[must_use]
    pub fn is_due(&self, now: Instant) -> bool {
        self.started
            && self
                .last_run
                .is_none_or(|last| now.saturating_duration_since(last) >= self.interval)
    }

    /// Interval for a tick rate in ticks per second.
    pub(crate) fn interval_for(tick_rate: f64) -> Option<Duration> {
        if tick_rate.is_nan() || tick_rate <= 0.0 {
            None
        } else if tick_rate.is_infinite() {
            Some(Duration::ZERO)
        } else {
            Some(Duration::from_secs_f64(1.0 / tick_rate))
        }
    }
}

/// Registered systems, in registration order.
#[derive(Default)]
pub struct SystemRegistry {
    slots: Vec<SystemSlot>,
}

impl SystemRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: SystemId) -> bool {
        self.slots.iter().any(|s| s.id == id)
    }

    #[must_use]
    pub fn get(&self, id: SystemId) -> Option<&SystemSlot> {
        self.slots.iter().find(|s| s.id == id)
    }

    pub fn get_mut(&mut self, id: SystemId) -> Option<&mut SystemSlot> {
        self.slots.iter_mut().find(|s| s.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SystemSlot> {
        self.slots.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut SystemSlot> {
        self.slots.iter_mut()
    }

    pub(crate) fn push(&mut self, slot: SystemSlot) {
        self.slots.push(slot);
    }

    pub(crate) fn remove(&mut self, id: SystemId) -> Option<SystemSlot> {
        let pos = self.slots.iter().position(|s| s.id == id)?;
        Some(self.slots.remove(pos))
    }
}
