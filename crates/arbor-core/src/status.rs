//! Entry status lifecycle.
//!
//! Every status mutation goes through the engine's single transition routine,
//! which consults [`Status::can_transition`] and fans out to the entry's
//! listeners. The terminal set is `{Removed, StaleDestroyed}`; terminal
//! entries may still be referenced briefly but are filtered out of every
//! query result.

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Status {
    /// Created by this session; unknown to the workspace.
    New,
    /// Mirrors the workspace observation.
    Existing,
    /// Locally modified on top of the workspace observation.
    ExistingModified,
    /// Locally removed; the workspace still holds the item.
    ExistingRemoved,
    /// Locally modified, but the workspace has diverged incompatibly.
    StaleModified,
    /// Locally touched, but the workspace item has been destroyed.
    StaleDestroyed,
    /// Gone - saved removal or external destruction of a clean entry.
    Removed,
    /// Identity preserved, payload dropped; the next read re-resolves.
    Invalidated,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Removed | Status::StaleDestroyed)
    }

    pub fn is_stale(self) -> bool {
        matches!(self, Status::StaleModified | Status::StaleDestroyed)
    }

    /// Visible in query results and counted for same-name-sibling indices.
    /// Transiently removed entries keep their slot structurally but vacate
    /// their index in the session's view.
    pub fn is_valid(self) -> bool {
        !self.is_terminal() && self != Status::ExistingRemoved
    }

    /// Carries uncommitted local state that a flush must consider.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Status::New
                | Status::ExistingModified
                | Status::ExistingRemoved
                | Status::StaleModified
                | Status::StaleDestroyed
        )
    }

    /// Known to the workspace, i.e. reachable through a workspace id.
    pub fn is_workspace_backed(self) -> bool {
        !matches!(self, Status::New) && !self.is_terminal()
    }

    pub fn can_transition(from: Status, to: Status) -> bool {
        use Status::*;
        match from {
            New => matches!(to, Existing | Removed),
            Existing => matches!(to, ExistingModified | ExistingRemoved | Invalidated | Removed),
            ExistingModified => matches!(
                to,
                Existing | ExistingRemoved | StaleModified | StaleDestroyed | Invalidated
            ),
            ExistingRemoved => matches!(to, Removed | Existing | StaleDestroyed | Invalidated),
            StaleModified => matches!(to, Existing | StaleDestroyed | Invalidated),
            Invalidated => matches!(to, Existing | ExistingModified | ExistingRemoved | Removed),
            Removed | StaleDestroyed => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Status::*;
    use super::*;

    const ALL: [Status; 8] = [
        New,
        Existing,
        ExistingModified,
        ExistingRemoved,
        StaleModified,
        StaleDestroyed,
        Removed,
        Invalidated,
    ];

    #[test]
    fn terminal_states_never_transition() {
        for to in ALL {
            assert!(!Status::can_transition(Removed, to));
            assert!(!Status::can_transition(StaleDestroyed, to));
        }
    }

    #[test]
    fn save_and_revert_lanes() {
        assert!(Status::can_transition(New, Existing));
        assert!(Status::can_transition(New, Removed));
        assert!(Status::can_transition(ExistingModified, Existing));
        assert!(Status::can_transition(ExistingRemoved, Removed));
        assert!(Status::can_transition(ExistingRemoved, Existing));
        assert!(Status::can_transition(StaleModified, Existing));
    }

    #[test]
    fn external_lanes() {
        assert!(Status::can_transition(ExistingModified, StaleModified));
        assert!(Status::can_transition(ExistingModified, StaleDestroyed));
        assert!(Status::can_transition(ExistingRemoved, StaleDestroyed));
        assert!(Status::can_transition(Invalidated, Existing));
        assert!(!Status::can_transition(New, Invalidated));
        assert!(!Status::can_transition(New, StaleDestroyed));
    }

    #[test]
    fn external_refresh_invalidates_every_non_terminal_state() {
        for from in [Existing, ExistingModified, ExistingRemoved, StaleModified] {
            assert!(Status::can_transition(from, Invalidated), "{from:?}");
        }
        assert!(!Status::can_transition(Removed, Invalidated));
        assert!(!Status::can_transition(StaleDestroyed, Invalidated));
    }

    #[test]
    fn validity_excludes_terminal_and_transiently_removed() {
        assert!(New.is_valid());
        assert!(Existing.is_valid());
        assert!(StaleModified.is_valid());
        assert!(Invalidated.is_valid());
        assert!(!ExistingRemoved.is_valid());
        assert!(!Removed.is_valid());
        assert!(!StaleDestroyed.is_valid());
    }
}
