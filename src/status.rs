/// Appointment status transitions.
///
/// Two policies share the status enum. The explicit status menu may move an
/// appointment from any status to any other. The day-of-service board only
/// connects adjacent workflow columns, forward:
///
/// `pending | confirmed -> waiting -> in-progress -> completed`
///
/// Each policy is its own transition table so they can be tested apart.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::TransitionError;
use crate::models::AppointmentStatus;

use AppointmentStatus::*;

/// Where a status change originates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionSource {
    /// Drag-and-drop or quick action on the board.
    Board,
    /// Explicit status-change menu.
    Menu,
}

/// Columns of the day-of-service board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BoardColumn {
    Scheduled,
    Waiting,
    InProgress,
    Completed,
}

impl BoardColumn {
    pub const ALL: [BoardColumn; 4] = [
        BoardColumn::Scheduled,
        BoardColumn::Waiting,
        BoardColumn::InProgress,
        BoardColumn::Completed,
    ];

    /// Column a card sits in. Cancelled and no-show cards are not on the board.
    pub fn for_status(status: AppointmentStatus) -> Option<Self> {
        match status {
            Pending | Confirmed => Some(BoardColumn::Scheduled),
            Waiting => Some(BoardColumn::Waiting),
            InProgress => Some(BoardColumn::InProgress),
            Completed => Some(BoardColumn::Completed),
            Cancelled | NoShow => None,
        }
    }

    /// Status a card gets when dropped into this column.
    pub fn status(&self) -> AppointmentStatus {
        match self {
            BoardColumn::Scheduled => Confirmed,
            BoardColumn::Waiting => Waiting,
            BoardColumn::InProgress => InProgress,
            BoardColumn::Completed => Completed,
        }
    }
}

/// An accepted status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub from: AppointmentStatus,
    pub to: AppointmentStatus,
    /// Entering `completed` from `in-progress`; the caller should offer checkout.
    pub triggers_checkout: bool,
}

/// Board adjacency, forward only.
const BOARD_TRANSITIONS: &[(AppointmentStatus, AppointmentStatus)] = &[
    (Pending, Waiting),
    (Confirmed, Waiting),
    (Waiting, InProgress),
    (InProgress, Completed),
];

/// Menu transitions: every ordered pair of distinct statuses.
fn menu_allows(from: AppointmentStatus, to: AppointmentStatus) -> bool {
    from != to
}

fn board_allows(from: AppointmentStatus, to: AppointmentStatus) -> bool {
    BOARD_TRANSITIONS.contains(&(from, to))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StatusMachine;

impl StatusMachine {
    pub fn new() -> Self {
        StatusMachine
    }

    /// Validate a status change under the policy for `source`.
    pub fn transition(
        &self,
        from: AppointmentStatus,
        to: AppointmentStatus,
        source: TransitionSource,
    ) -> Result<StatusChange, TransitionError> {
        debug!(%from, %to, ?source, "Validating status transition");

        if from == to {
            return Err(TransitionError::Unchanged(from));
        }

        let allowed = match source {
            TransitionSource::Menu => menu_allows(from, to),
            TransitionSource::Board => {
                if from == Completed {
                    return Err(TransitionError::Terminal);
                }
                board_allows(from, to)
            }
        };
        if !allowed {
            return Err(TransitionError::NotAdjacent { from, to });
        }

        let change = StatusChange {
            from,
            to,
            triggers_checkout: from == InProgress && to == Completed,
        };
        info!(%from, %to, checkout = change.triggers_checkout, "Status transition accepted");
        Ok(change)
    }

    /// Drop a card into a board column.
    pub fn move_card(
        &self,
        from: AppointmentStatus,
        column: BoardColumn,
    ) -> Result<StatusChange, TransitionError> {
        self.transition(from, column.status(), TransitionSource::Board)
    }

    /// Statuses reachable from `from` under the policy for `source`.
    pub fn targets(
        &self,
        from: AppointmentStatus,
        source: TransitionSource,
    ) -> Vec<AppointmentStatus> {
        AppointmentStatus::ALL
            .into_iter()
            .filter(|&to| match source {
                TransitionSource::Menu => menu_allows(from, to),
                TransitionSource::Board => board_allows(from, to),
            })
            .collect()
    }

    /// Board columns a card in `from` can be dropped into.
    pub fn droppable_columns(&self, from: AppointmentStatus) -> Vec<BoardColumn> {
        BoardColumn::ALL
            .into_iter()
            .filter(|column| board_allows(from, column.status()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn board_follows_the_workflow() {
        let machine = StatusMachine::new();
        for (from, to) in [
            (Pending, Waiting),
            (Confirmed, Waiting),
            (Waiting, InProgress),
            (InProgress, Completed),
        ] {
            assert!(machine.transition(from, to, TransitionSource::Board).is_ok());
        }
    }

    #[test]
    fn board_rejects_skipping_a_column_but_menu_allows_it() {
        let machine = StatusMachine::new();
        assert_eq!(
            machine.transition(Waiting, Completed, TransitionSource::Board),
            Err(TransitionError::NotAdjacent {
                from: Waiting,
                to: Completed
            })
        );
        let change = machine
            .transition(Waiting, Completed, TransitionSource::Menu)
            .unwrap();
        assert!(!change.triggers_checkout);

        assert!(machine.transition(Pending, Completed, TransitionSource::Board).is_err());
        assert!(machine.transition(Pending, Completed, TransitionSource::Menu).is_ok());
    }

    #[test]
    fn board_is_forward_only() {
        let machine = StatusMachine::new();
        assert!(machine.transition(InProgress, Waiting, TransitionSource::Board).is_err());
        assert!(machine.transition(Waiting, Confirmed, TransitionSource::Board).is_err());
    }

    #[test]
    fn completed_cards_are_terminal_on_the_board() {
        let machine = StatusMachine::new();
        assert_eq!(
            machine.move_card(Completed, BoardColumn::InProgress),
            Err(TransitionError::Terminal)
        );
        assert!(machine.droppable_columns(Completed).is_empty());
        // The menu can still reopen it.
        assert!(machine.transition(Completed, Confirmed, TransitionSource::Menu).is_ok());
    }

    #[test]
    fn cancelled_and_no_show_only_via_menu() {
        let machine = StatusMachine::new();
        for from in [Pending, Confirmed, Waiting, InProgress] {
            assert!(machine.transition(from, Cancelled, TransitionSource::Board).is_err());
            assert!(machine.transition(from, NoShow, TransitionSource::Board).is_err());
            assert!(machine.transition(from, Cancelled, TransitionSource::Menu).is_ok());
        }
        assert_eq!(BoardColumn::for_status(Cancelled), None);
        assert_eq!(BoardColumn::for_status(NoShow), None);
    }

    #[test]
    fn completing_from_in_progress_triggers_checkout() {
        let machine = StatusMachine::new();
        let change = machine.move_card(InProgress, BoardColumn::Completed).unwrap();
        assert!(change.triggers_checkout);

        let waiting = machine.move_card(Confirmed, BoardColumn::Waiting).unwrap();
        assert!(!waiting.triggers_checkout);
    }

    #[test]
    fn unchanged_status_is_rejected() {
        let machine = StatusMachine::new();
        assert_eq!(
            machine.transition(Waiting, Waiting, TransitionSource::Menu),
            Err(TransitionError::Unchanged(Waiting))
        );
    }

    #[test]
    fn target_tables() {
        let machine = StatusMachine::new();
        assert_eq!(machine.targets(Pending, TransitionSource::Board), vec![Waiting]);
        assert_eq!(machine.targets(Pending, TransitionSource::Menu).len(), 6);
        assert_eq!(
            machine.droppable_columns(Confirmed),
            vec![BoardColumn::Waiting]
        );
        assert_eq!(
            BoardColumn::for_status(Pending),
            BoardColumn::for_status(Confirmed)
        );
    }
}
