//! Tagged scheduler command (SPEC_FULL.md §9 REDESIGN FLAG).
//!
//! The original dispatches scheduled work through a reflection-built command
//! wrapping a function value and an argument tuple, validated at
//! registration time. That has no equivalent failure mode in a typed
//! dispatch: there is exactly one kind of scheduled work (generate a feed),
//! so a tagged enum replaces it outright; `ARITY_MISMATCH`/`TYPE_MISMATCH`
//! simply cannot occur here.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerCommand {
    GenerateFeed { feed_type: String },
}

impl SchedulerCommand {
    pub fn feed_type(&self) -> &str {
        match self {
            SchedulerCommand::GenerateFeed { feed_type } => feed_type,
        }
    }
}
