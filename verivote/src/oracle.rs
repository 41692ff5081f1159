//! Collaborators the engine calls out to: voter eligibility and notifications.

use crate::*;
use std::sync::mpsc::{Sender, TryRecvError};
use std::sync::{mpsc, Mutex, PoisonError};
use thiserror::Error;

/// Answers "may this voter cast a ballot in this election?"
pub trait EligibilityOracle: Send + Sync {
    fn is_eligible(&self, voter: &VoterId, election: &Election) -> bool;

    /// Voters barred despite being eligible, e.g. after an administrative exclusion.
    fn is_excluded(&self, _voter: &VoterId, _election: &Election) -> bool {
        false
    }
}

/// Eligibility from the election's own roster, or anyone under open registration.
#[derive(Debug, Default, Clone, Copy)]
pub struct RosterEligibility;

impl EligibilityOracle for RosterEligibility {
    fn is_eligible(&self, voter: &VoterId, election: &Election) -> bool {
        election.open_registration() || election.voters().contains(voter)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NotificationEvent {
    BallotAccepted { receipt: CastReceipt },
    ResultReleased { election_id: uuid::Uuid },
}

#[derive(Debug, Clone, Error)]
pub enum NotifyError {
    #[error("notification channel closed")]
    Closed,

    #[error("notification failed: {0}")]
    Failed(String),
}

/// Delivers notifications to voters. Delivery mechanics are the implementor's.
pub trait Notifier: Send + Sync {
    fn notify(&self, voter: &VoterId, event: &NotificationEvent) -> Result<(), NotifyError>;
}

/// Drops every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _voter: &VoterId, _event: &NotificationEvent) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Queues notifications on an unbounded channel for a delivery worker. Never blocks
/// the caller.
#[derive(Debug)]
pub struct ChannelNotifier {
    sender: Mutex<Sender<(VoterId, NotificationEvent)>>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, NotificationQueue) {
        let (sender, receiver) = mpsc::channel();
        (
            ChannelNotifier {
                sender: Mutex::new(sender),
            },
            NotificationQueue { receiver },
        )
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, voter: &VoterId, event: &NotificationEvent) -> Result<(), NotifyError> {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send((voter.clone(), event.clone()))
            .map_err(|_| NotifyError::Closed)
    }
}

/// Receiving end of a `ChannelNotifier`.
#[derive(Debug)]
pub struct NotificationQueue {
    receiver: mpsc::Receiver<(VoterId, NotificationEvent)>,
}

impl NotificationQueue {
    /// Everything queued so far, without waiting.
    pub fn drain(&self) -> Vec<(VoterId, NotificationEvent)> {
        let mut events = Vec::new();
        loop {
            match self.receiver.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        events
    }
}
