use crate::{Action, ThreadKey, ToolStatus, WorkspaceId};
use std::collections::HashSet;

#[derive(Clone, Debug, PartialEq)]
pub enum TurnCommand {
    Dispatch(Action),
    Interrupt {
        workspace_id: WorkspaceId,
        thread_key: ThreadKey,
        turn_id: String,
    },
}

/// Turn transitions plus the two interrupt markers.
///
/// A stop requested before the engine reports the turn is parked in the pending set
/// and fired against the turn id the moment `turn_started` sees it. A thread whose
/// turn was stopped is marked interrupted so the error the engine reports for the
/// aborted turn does not surface as a failure.
#[derive(Clone, Debug, Default)]
pub struct TurnLifecycle {
    pending_interrupts: HashSet<ThreadKey>,
    interrupted: HashSet<ThreadKey>,
}

impl TurnLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turn_started(
        &mut self,
        workspace_id: &WorkspaceId,
        thread_key: &ThreadKey,
        turn_id: &str,
        at_ms: u64,
    ) -> Vec<TurnCommand> {
        if self.pending_interrupts.remove(thread_key) {
            self.interrupted.insert(thread_key.clone());
            return vec![TurnCommand::Interrupt {
                workspace_id: workspace_id.clone(),
                thread_key: thread_key.clone(),
                turn_id: turn_id.to_owned(),
            }];
        }

        vec![
            TurnCommand::Dispatch(Action::MarkProcessing {
                thread_key: thread_key.clone(),
                processing: true,
                at_ms,
            }),
            TurnCommand::Dispatch(Action::SetActiveTurnId {
                thread_key: thread_key.clone(),
                turn_id: Some(turn_id.to_owned()),
            }),
        ]
    }

    pub fn turn_completed(&mut self, thread_key: &ThreadKey, at_ms: u64) -> Vec<TurnCommand> {
        self.interrupted.remove(thread_key);

        vec![
            TurnCommand::Dispatch(Action::SetActiveTurnId {
                thread_key: thread_key.clone(),
                turn_id: None,
            }),
            TurnCommand::Dispatch(Action::MarkProcessing {
                thread_key: thread_key.clone(),
                processing: false,
                at_ms,
            }),
            TurnCommand::Dispatch(Action::FinalizePendingToolStatuses {
                thread_key: thread_key.clone(),
                status: ToolStatus::Completed,
            }),
            TurnCommand::Dispatch(Action::ResetAgentSegment {
                thread_key: thread_key.clone(),
            }),
        ]
    }

    pub fn turn_error(
        &mut self,
        thread_key: &ThreadKey,
        message: &str,
        will_retry: bool,
        at_ms: u64,
    ) -> Vec<TurnCommand> {
        if will_retry {
            return Vec::new();
        }
        let interrupted = self.interrupted.remove(thread_key);

        let mut commands = vec![
            TurnCommand::Dispatch(Action::FinalizePendingToolStatuses {
                thread_key: thread_key.clone(),
                status: ToolStatus::Failed,
            }),
            TurnCommand::Dispatch(Action::MarkProcessing {
                thread_key: thread_key.clone(),
                processing: false,
                at_ms,
            }),
            TurnCommand::Dispatch(Action::MarkReviewing {
                thread_key: thread_key.clone(),
                reviewing: false,
            }),
            TurnCommand::Dispatch(Action::SetActiveTurnId {
                thread_key: thread_key.clone(),
                turn_id: None,
            }),
        ];
        if !interrupted {
            commands.push(TurnCommand::Dispatch(Action::AppendErrorMessage {
                thread_key: thread_key.clone(),
                message: turn_error_text(message),
            }));
        }
        commands
    }

    pub fn request_interrupt(
        &mut self,
        workspace_id: &WorkspaceId,
        thread_key: &ThreadKey,
        active_turn_id: Option<&str>,
    ) -> Vec<TurnCommand> {
        match active_turn_id {
            Some(turn_id) => {
                self.interrupted.insert(thread_key.clone());
                vec![TurnCommand::Interrupt {
                    workspace_id: workspace_id.clone(),
                    thread_key: thread_key.clone(),
                    turn_id: turn_id.to_owned(),
                }]
            }
            None => {
                self.pending_interrupts.insert(thread_key.clone());
                Vec::new()
            }
        }
    }

    pub fn rename_thread(&mut self, from: &ThreadKey, to: &ThreadKey) {
        if self.pending_interrupts.remove(from) {
            self.pending_interrupts.insert(to.clone());
        }
        if self.interrupted.remove(from) {
            self.interrupted.insert(to.clone());
        }
    }

    pub fn is_interrupt_pending(&self, thread_key: &ThreadKey) -> bool {
        self.pending_interrupts.contains(thread_key)
    }

    pub fn is_interrupted(&self, thread_key: &ThreadKey) -> bool {
        self.interrupted.contains(thread_key)
    }

    pub fn pending_interrupts(&self) -> impl Iterator<Item = &ThreadKey> {
        self.pending_interrupts.iter()
    }
}

fn turn_error_text(message: &str) -> String {
    let message = message.trim();
    if message.is_empty() {
        return "Turn failed.".to_owned();
    }
    format!("Turn failed: {message}")
}
