//! Timeline diff daemon
//!
//! [`TimelineDaemon`] follows an external time value over the snapshots of an
//! [`Assembler`]. Each [`tick`](TimelineDaemon::tick) reads the clock, moves the
//! active snapshot forward or backward to the last snapshot at or before that
//! time, and publishes the structural diff between the old and the new active
//! roots to an [`EventSink`].
//!
//! The daemon is driven from a single timeline thread and takes `&mut self`
//! for every transition; it does no locking of its own.
//!
//! ## Examples
//!
//! ```rust
//! use weaver::daemon::{ManualClock, TimelineDaemon};
//! use weaver::source::MemoryHistoryBuilder;
//! use weaver::{AssemblerBuilder, Owner, WeaverEvent};
//! use std::sync::Arc;
//!
//! # fn main() -> weaver::Result<()> {
//! let ada = Owner::new("ada@example.com", "Ada");
//! let history = MemoryHistoryBuilder::new()
//!     .commit(ada.clone(), 0, &[])
//!     .commit(ada, 10, &[("a.txt", "h1")])
//!     .build();
//! let assembler = Arc::new(AssemblerBuilder::new().build(Arc::new(history))?);
//!
//! let clock = ManualClock::new(0.0);
//! let mut daemon = TimelineDaemon::new(clock.clone(), Vec::<WeaverEvent>::new());
//! daemon.set_assembler(Some(assembler));
//!
//! clock.set(1.0);
//! assert_eq!(daemon.tick()?, 1);
//! assert_eq!(daemon.sink()[0].key(), "weaver.item.created");
//! # Ok(())
//! # }
//! ```

use crate::assembler::Assembler;
use crate::diff::{diff_nodes, publish_creation, WeaverEvent};
use crate::error::Result;
use crate::types::Snapshot;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Source of the normalized timeline position
pub trait Clock {
    /// Current time in `[0, 1]`
    fn current_time(&self) -> f64;
}

impl<F> Clock for F
where
    F: Fn() -> f64,
{
    fn current_time(&self) -> f64 {
        self()
    }
}

/// A clock set by hand
///
/// Clones share the same time, so one clone can drive a daemon that owns
/// another.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    bits: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock showing `time`
    pub fn new(time: f64) -> Self {
        Self {
            bits: Arc::new(AtomicU64::new(time.to_bits())),
        }
    }

    /// Move the clock
    pub fn set(&self, time: f64) {
        self.bits.store(time.to_bits(), Ordering::Release);
    }

    /// Time currently shown
    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }
}

impl Clock for ManualClock {
    fn current_time(&self) -> f64 {
        self.get()
    }
}

/// Receiver of lifecycle events, in publication order
pub trait EventSink {
    /// Accept one event
    fn publish(&mut self, event: WeaverEvent);
}

impl EventSink for Vec<WeaverEvent> {
    fn publish(&mut self, event: WeaverEvent) {
        self.push(event);
    }
}

impl<S: EventSink + ?Sized> EventSink for &mut S {
    fn publish(&mut self, event: WeaverEvent) {
        (**self).publish(event);
    }
}

/// Adapter turning a closure into an [`EventSink`]
pub struct FnSink<F>(pub F);

impl<F> EventSink for FnSink<F>
where
    F: FnMut(WeaverEvent),
{
    fn publish(&mut self, event: WeaverEvent) {
        (self.0)(event);
    }
}

impl<F> std::fmt::Debug for FnSink<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FnSink")
    }
}

/// Observable state of a [`TimelineDaemon`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    /// No assembler is attached
    NoAssembler,
    /// Following the snapshot at this index
    Tracking(usize),
}

/// Follows a clock across the snapshots of an assembler and publishes diffs
pub struct TimelineDaemon<C, S> {
    clock: C,
    sink: S,
    assembler: Option<Arc<Assembler>>,
    active_index: usize,
}

impl<C: Clock, S: EventSink> std::fmt::Debug for TimelineDaemon<C, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimelineDaemon")
            .field("state", &self.state())
            .finish()
    }
}

impl<C: Clock, S: EventSink> TimelineDaemon<C, S> {
    /// Create a daemon with no assembler attached
    pub fn new(clock: C, sink: S) -> Self {
        Self {
            clock,
            sink,
            assembler: None,
            active_index: 0,
        }
    }

    /// Attach an assembler, or detach with `None`
    ///
    /// The active snapshot becomes the first one whose time is at or after the
    /// current clock, or the first snapshot when none is. No events are
    /// published; see [`publish_active`](Self::publish_active) to replay the
    /// attached state.
    pub fn set_assembler(&mut self, assembler: Option<Arc<Assembler>>) {
        let Some(assembler) = assembler else {
            debug!("Timeline detached");
            self.assembler = None;
            self.active_index = 0;
            return;
        };

        let now = self.clock.current_time();
        self.active_index = assembler
            .snapshots()
            .iter()
            .position(|snapshot| snapshot.time() >= now)
            .unwrap_or(0);
        debug!(
            "Timeline attached to {} snapshots at index {} (t={:.4})",
            assembler.snapshot_count(),
            self.active_index,
            now
        );
        self.assembler = Some(assembler);
    }

    /// Current state
    pub fn state(&self) -> DaemonState {
        match self.assembler {
            Some(_) => DaemonState::Tracking(self.active_index),
            None => DaemonState::NoAssembler,
        }
    }

    /// Index of the active snapshot, if tracking
    pub fn active_index(&self) -> Option<usize> {
        self.assembler.as_ref().map(|_| self.active_index)
    }

    /// The active snapshot, if tracking
    pub fn active_snapshot(&self) -> Option<&Snapshot> {
        self.assembler.as_ref()?.snapshots().get(self.active_index)
    }

    /// The attached assembler
    pub fn assembler(&self) -> Option<&Arc<Assembler>> {
        self.assembler.as_ref()
    }

    /// Follow the clock once, returning the number of events published
    ///
    /// Detached daemons and ticks that stay on the same snapshot publish
    /// nothing. Fails only when a deferred snapshot root cannot be built, in
    /// which case the active snapshot is left unchanged.
    pub fn tick(&mut self) -> Result<usize> {
        let Some(assembler) = self.assembler.clone() else {
            return Ok(0);
        };
        let snapshots = assembler.snapshots();
        let now = self.clock.current_time();

        let Some(next) = seek(snapshots, self.active_index, now) else {
            return Ok(0);
        };
        let (last, adopted) = (&snapshots[self.active_index], &snapshots[next]);
        if std::ptr::eq(last, adopted) {
            return Ok(0);
        }

        let old_root = last.ancestor()?;
        let new_root = adopted.ancestor()?;
        trace!("Active snapshot {} -> {} (t={:.4})", self.active_index, next, now);
        self.active_index = next;

        let mut published = 0;
        let sink = &mut self.sink;
        diff_nodes(&old_root, &new_root, &mut |event| {
            trace!("{} {}", event.key(), event.node().name);
            sink.publish(event);
            published += 1;
        });
        if published > 0 {
            debug!("Published {} events for snapshot {}", published, next);
        }
        Ok(published)
    }

    /// Publish creation events for everything in the active snapshot
    ///
    /// Lets a consumer attached after [`set_assembler`](Self::set_assembler)
    /// build its mirror of the current state. The root node itself is never
    /// created or destroyed by a diff, so only its items and children are
    /// published.
    pub fn publish_active(&mut self) -> Result<usize> {
        let Some(snapshot) = self.active_snapshot() else {
            return Ok(0);
        };
        let root = snapshot.ancestor()?;

        let mut published = 0;
        let sink = &mut self.sink;
        for item in &root.items {
            sink.publish(WeaverEvent::ItemCreated {
                node: Arc::clone(&root),
                item: Arc::clone(item),
            });
            published += 1;
        }
        for child in &root.children {
            publish_creation(child, &mut |event| {
                sink.publish(event);
                published += 1;
            });
        }
        Ok(published)
    }

    /// The event sink
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// The event sink, mutably
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// The clock
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Consume the daemon, returning its sink
    pub fn into_sink(self) -> S {
        self.sink
    }
}

/// Index of the snapshot to adopt for time `now`, starting from `current`
///
/// Moving forward finds the last snapshot at or before `now`, stopping at the
/// first one past it. Moving backward takes the first earlier snapshot at or
/// before `now`.
fn seek(snapshots: &[Snapshot], current: usize, now: f64) -> Option<usize> {
    let last = snapshots.get(current)?;

    if now - last.time() >= 0.0 {
        let mut adopted = None;
        for (index, snapshot) in snapshots.iter().enumerate().skip(current + 1) {
            if snapshot.time() > now {
                break;
            }
            adopted = Some(index);
        }
        adopted
    } else {
        (0..current).rev().find(|&index| snapshots[index].time() <= now)
    }
}
