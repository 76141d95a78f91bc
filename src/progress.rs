//! # Request progress.
//!
//! Every request emits an ordered sequence of [`Progress`] values. The
//! stash branch and the source branch are each optional; which of them run
//! is decided by the request's [`Blueprint`](crate::Blueprint).
//!
//! ```text
//! Pending ─► Executing ─┬─► FetchingFromStash ─► ReceivedFromStash ─┐
//!                       │                                            │
//!                       ├─► CallingSource ─► ReceivedFromSource ─┬───┤
//!                       │                    (value)             ▼   │
//!                       │                 SavingToStash ─► SavedToStash
//!                       │                                            │
//!                       └────────────────────────────────────────────┴─► Complete
//! ```
//!
//! ## Rules
//! - A sequence produced by the processor starts with `Executing` and ends with `Complete`.
//!   `Pending` is only the initial value for consumers that track the latest state.
//! - Save events follow a `ReceivedFromSource` carrying a value, and only when a stash is configured.
//! - Open-ended sources repeat the `ReceivedFromSource` (and save) events once per refresh.

/// One step of a request, carrying the payload where there is one.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Progress<T> {
    /// Not started.
    #[default]
    Pending,
    /// The request is being executed.
    Executing,
    /// Reading the stash.
    FetchingFromStash,
    /// Stash read finished; `None` on a miss.
    ReceivedFromStash(Option<T>),
    /// Calling the source.
    CallingSource,
    /// Source answered; `None` on an empty success.
    ReceivedFromSource(Option<T>),
    /// Writing the fetched value to the stash.
    SavingToStash,
    /// Stash write finished (successfully or not).
    SavedToStash,
    /// Terminal.
    Complete,
}

/// Payload-free mirror of [`Progress`], ordered by lifecycle position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProgressState {
    Pending,
    Executing,
    FetchingFromStash,
    ReceivedFromStash,
    CallingSource,
    ReceivedFromSource,
    SavingToStash,
    SavedToStash,
    Complete,
}

impl ProgressState {
    /// True for [`ProgressState::Complete`].
    pub fn is_terminal(self) -> bool {
        matches!(self, ProgressState::Complete)
    }

    /// Stable snake_case label for logs.
    pub fn as_label(self) -> &'static str {
        match self {
            ProgressState::Pending => "pending",
            ProgressState::Executing => "executing",
            ProgressState::FetchingFromStash => "fetching_from_stash",
            ProgressState::ReceivedFromStash => "received_from_stash",
            ProgressState::CallingSource => "calling_source",
            ProgressState::ReceivedFromSource => "received_from_source",
            ProgressState::SavingToStash => "saving_to_stash",
            ProgressState::SavedToStash => "saved_to_stash",
            ProgressState::Complete => "complete",
        }
    }
}

impl<T> Progress<T> {
    /// The state without payload.
    pub fn state(&self) -> ProgressState {
        match self {
            Progress::Pending => ProgressState::Pending,
            Progress::Executing => ProgressState::Executing,
            Progress::FetchingFromStash => ProgressState::FetchingFromStash,
            Progress::ReceivedFromStash(_) => ProgressState::ReceivedFromStash,
            Progress::CallingSource => ProgressState::CallingSource,
            Progress::ReceivedFromSource(_) => ProgressState::ReceivedFromSource,
            Progress::SavingToStash => ProgressState::SavingToStash,
            Progress::SavedToStash => ProgressState::SavedToStash,
            Progress::Complete => ProgressState::Complete,
        }
    }

    /// Payload of a `Received*` step, if it carries one.
    pub fn payload(&self) -> Option<&T> {
        match self {
            Progress::ReceivedFromStash(v) | Progress::ReceivedFromSource(v) => v.as_ref(),
            _ => None,
        }
    }

    /// Consumes the step, returning its payload.
    pub fn into_payload(self) -> Option<T> {
        match self {
            Progress::ReceivedFromStash(v) | Progress::ReceivedFromSource(v) => v,
            _ => None,
        }
    }

    /// True for [`Progress::Complete`].
    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_follow_lifecycle_order() {
        let seq: Vec<Progress<u8>> = vec![
            Progress::Pending,
            Progress::Executing,
            Progress::FetchingFromStash,
            Progress::ReceivedFromStash(None),
            Progress::CallingSource,
            Progress::ReceivedFromSource(Some(1)),
            Progress::SavingToStash,
            Progress::SavedToStash,
            Progress::Complete,
        ];
        let states: Vec<_> = seq.iter().map(Progress::state).collect();
        let mut sorted = states.clone();
        sorted.sort();
        assert_eq!(states, sorted);
        assert!(seq.last().unwrap().is_terminal());
    }

    #[test]
    fn payload_only_on_received() {
        assert_eq!(Progress::ReceivedFromSource(Some(3)).payload(), Some(&3));
        assert_eq!(Progress::ReceivedFromStash(Some(4)).into_payload(), Some(4));
        assert_eq!(Progress::<u8>::SavingToStash.payload(), None);
        assert_eq!(Progress::<u8>::default(), Progress::Pending);
    }
}
