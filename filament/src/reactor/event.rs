/// Readiness reported by a poller for one registered descriptor.
///
/// Errors and hang-ups are folded into both directions, so whichever side
/// is waiting retries its syscall and observes the failure itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Event {
    /// Packed [`ArenaIndex`](crate::reactor::arena::ArenaIndex) given at registration.
    pub(crate) token: u64,
    pub(crate) readable: bool,
    pub(crate) writable: bool,
}

impl Event {
    /// Merges a second report for the same token into this one.
    pub(crate) fn merge(&mut self, other: Event) {
        self.readable |= other.readable;
        self.writable |= other.writable;
    }
}

/// Appends `event`, coalescing with an earlier entry for the same token.
pub(crate) fn push_event(events: &mut Vec<Event>, event: Event) {
    match events.iter_mut().find(|e| e.token == event.token) {
        Some(existing) => existing.merge(event),
        None => events.push(event),
    }
}
