//! Broadcast channel for Safe transaction transitions.
//!
//! Events are published only after the transition has been persisted, so a
//! subscriber that re-reads the store always sees at least the state the event
//! describes.

use disburse_types::SafeEvent;
use tokio::sync::broadcast;

/// Event bus for broadcasting [`SafeEvent`]s to any number of listeners.
///
/// Slow subscribers lag and lose the oldest events rather than blocking
/// publishers.
#[derive(Clone)]
pub struct EventBus {
	/// The broadcast sender used to publish events.
	sender: broadcast::Sender<SafeEvent>,
}

impl EventBus {
	/// Creates a bus whose subscribers can fall `capacity` events behind.
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	/// Returns a receiver that sees every event published from now on.
	pub fn subscribe(&self) -> broadcast::Receiver<SafeEvent> {
		self.sender.subscribe()
	}

	/// Publishes to all current subscribers. Having none is not an error.
	pub fn publish(&self, event: SafeEvent) {
		let _ = self.sender.send(event);
	}
}

impl Default for EventBus {
	fn default() -> Self {
		Self::new(256)
	}
}
