use super::types::{NextAction, Reservation, SigningRequest, SigningSignature, Workload};
use chrono::Utc;
use log::trace;

/// Something which moves through the deployment lifecycle.
pub trait Pipelined {
    /// Current lifecycle state.
    fn next_action(&self) -> NextAction;
    /// Overwrite the lifecycle state.
    fn set_next_action(&mut self, action: NextAction);
    /// Request which must be signed before provisioning.
    fn provision_request(&self) -> &SigningRequest;
    /// Request which must be signed to force deletion.
    fn delete_request(&self) -> &SigningRequest;
    /// Signatures collected on the provision request.
    fn provision_signatures(&self) -> &[SigningSignature];
    /// Signatures collected on the delete request.
    fn delete_signatures(&self) -> &[SigningSignature];
    /// Whether the hard end of life has passed.
    fn is_expired(&self, _now: i64) -> bool {
        false
    }
    /// Whether the provisioning deadline passed before deployment completed.
    fn provisioning_expired(&self, _now: i64) -> bool {
        false
    }
}

/// Derives the next lifecycle state of a reservation or workload. The pipeline never fails,
/// persisting the new state and acting on a deletion is left to the caller.
#[derive(Debug)]
pub struct Pipeline<T> {
    subject: T,
    now: i64,
}

/// Pipeline for multi workload reservations.
pub type ReservationPipeline = Pipeline<Reservation>;
/// Pipeline for single workloads.
pub type WorkloadPipeline = Pipeline<Workload>;

impl<T: Pipelined> Pipeline<T> {
    /// Create a pipeline evaluated at the current time.
    pub fn new(subject: T) -> Self {
        Self::at(subject, Utc::now().timestamp())
    }

    /// Create a pipeline evaluated at the given unix timestamp.
    pub fn at(subject: T, now: i64) -> Self {
        Pipeline { subject, now }
    }

    fn should_delete(&self) -> bool {
        let s = &self.subject;
        s.delete_request().delete_quorum_met(s.delete_signatures())
            || s.is_expired(self.now)
            || s.provisioning_expired(self.now)
    }

    /// Advance the subject as far as it can go. Returns the subject and whether its state
    /// changed.
    pub fn next(mut self) -> (T, bool) {
        let initial = self.subject.next_action();
        loop {
            let current = self.subject.next_action();
            if current == NextAction::Delete || current == NextAction::Deleted {
                break;
            }
            if self.should_delete() {
                self.subject.set_next_action(NextAction::Delete);
                break;
            }
            let next = match current {
                NextAction::Create => NextAction::Sign,
                NextAction::Sign
                    if self
                        .subject
                        .provision_request()
                        .provision_quorum_met(self.subject.provision_signatures()) =>
                {
                    NextAction::Pay
                }
                NextAction::Pay => NextAction::Deploy,
                other => other,
            };
            if next == current {
                break;
            }
            trace!("pipeline moves from {:?} to {:?}", current, next);
            self.subject.set_next_action(next);
        }
        let changed = self.subject.next_action() != initial;
        (self.subject, changed)
    }
}

impl Pipelined for Workload {
    fn next_action(&self) -> NextAction {
        self.state.next_action
    }

    fn set_next_action(&mut self, action: NextAction) {
        self.state.next_action = action;
    }

    fn provision_request(&self) -> &SigningRequest {
        &self.contract.signing_request_provision
    }

    fn delete_request(&self) -> &SigningRequest {
        &self.contract.signing_request_delete
    }

    fn provision_signatures(&self) -> &[SigningSignature] {
        &self.state.signatures_provision
    }

    fn delete_signatures(&self) -> &[SigningSignature] {
        &self.state.signatures_delete
    }
}

impl Pipelined for Reservation {
    fn next_action(&self) -> NextAction {
        self.next_action
    }

    fn set_next_action(&mut self, action: NextAction) {
        self.next_action = action;
    }

    fn provision_request(&self) -> &SigningRequest {
        &self.signing_request_provision
    }

    fn delete_request(&self) -> &SigningRequest {
        &self.signing_request_delete
    }

    fn provision_signatures(&self) -> &[SigningSignature] {
        &self.signatures_provision
    }

    fn delete_signatures(&self) -> &[SigningSignature] {
        &self.signatures_delete
    }

    fn is_expired(&self, now: i64) -> bool {
        self.expiration_reservation <= now
    }

    fn provisioning_expired(&self, now: i64) -> bool {
        self.expiration_provisioning < now && !self.is_successfully_deployed()
    }
}
