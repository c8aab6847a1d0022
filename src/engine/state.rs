use crate::hal::Mode;

/// What an open request for a device in some mode amounts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeTransition {
    /// The current mode already satisfies the request
    Unchanged,
    /// Request for `Mode::None`: close if no client is active
    Close,
    /// (Re)open the backend in the given mode
    Open(Mode),
}

/// Decide how to satisfy a request for `requested` while in `current`.
/// A device open in one direction that is asked for the other one is
/// escalated to duplex, never switched.
pub fn resolve(current: Mode, requested: Mode) -> ModeTransition {
    if requested == current {
        return ModeTransition::Unchanged;
    }
    if requested == Mode::None {
        return ModeTransition::Close;
    }
    let target = current.union(requested);
    if target == current {
        return ModeTransition::Unchanged;
    }
    // Read + Write, Write + Read, or a single direction + Duplex all land on
    // Duplex; a closed device opens as requested
    ModeTransition::Open(target)
}
