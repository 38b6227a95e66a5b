use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::events::TakeoverField;

/// How a takeover round ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakeoverResolution {
    Submitted,
    Skipped,
    ManualComplete,
    /// Replaced by a newer request before anyone acted on it.
    Superseded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    Pending,
    Resolved(TakeoverResolution),
}

/// One request round. Identity is the (message, field-set) pair: the engine
/// can re-send the same round across reconnects, and a later round can look
/// identical to an earlier one after its credentials were consumed.
#[derive(Debug, Clone)]
pub struct TakeoverRound {
    pub message: String,
    pub fields: Vec<TakeoverField>,
    pub timeout_seconds: Option<u32>,
    phase: Phase,
    /// Countdown deadline, armed on entry to pending, cleared on any
    /// transition out.
    deadline: Option<DateTime<Utc>>,
}

impl TakeoverRound {
    fn same_identity(&self, message: &str, fields: &[TakeoverField]) -> bool {
        self.message == message && self.fields == fields
    }
}

/// Login-takeover sub-state-machine for one exploration session.
///
/// absent -> pending -> resolved, terminal per round. Redelivery of the
/// round currently pending is absorbed; any request arriving once the prior
/// round resolved starts a fresh round and shows the form again, even with
/// identical content (the engine only re-asks when it actually needs input).
#[derive(Debug, Default)]
pub struct TakeoverState {
    round: Option<TakeoverRound>,
}

impl TakeoverState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle a takeover-request event. Returns true when the form should
    /// be (re)shown.
    pub fn on_request(
        &mut self,
        message: String,
        fields: Vec<TakeoverField>,
        timeout_seconds: Option<u32>,
        now: DateTime<Utc>,
    ) -> bool {
        if let Some(round) = &self.round {
            if round.phase == Phase::Pending {
                if round.same_identity(&message, &fields) {
                    debug!("duplicate takeover request absorbed");
                    return false;
                }
                // A different request while one is pending supersedes it.
                self.resolve(TakeoverResolution::Superseded);
            }
        }

        let deadline = timeout_seconds.map(|secs| now + Duration::seconds(secs as i64));
        self.round = Some(TakeoverRound {
            message,
            fields,
            timeout_seconds,
            phase: Phase::Pending,
            deadline,
        });
        true
    }

    /// Resolve the pending round. Returns false when nothing was pending,
    /// which makes redelivered resolution events harmless.
    pub fn resolve(&mut self, resolution: TakeoverResolution) -> bool {
        match &mut self.round {
            Some(round) if round.phase == Phase::Pending => {
                round.phase = Phase::Resolved(resolution);
                round.deadline = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(&self.round, Some(r) if r.phase == Phase::Pending)
    }

    /// The request whose form should currently be on screen.
    pub fn pending_request(&self) -> Option<&TakeoverRound> {
        self.round.as_ref().filter(|r| r.phase == Phase::Pending)
    }

    pub fn last_resolution(&self) -> Option<TakeoverResolution> {
        match &self.round {
            Some(TakeoverRound { phase: Phase::Resolved(res), .. }) => Some(*res),
            _ => None,
        }
    }

    /// Seconds left on the countdown, if one is armed. Never negative.
    pub fn countdown_remaining(&self, now: DateTime<Utc>) -> Option<i64> {
        self.pending_request()
            .and_then(|r| r.deadline)
            .map(|deadline| (deadline - now).num_seconds().max(0))
    }

    /// Whether the countdown ran out. Informational only: expiry never
    /// auto-resolves, the consumer decides what to do.
    pub fn countdown_expired(&self, now: DateTime<Utc>) -> bool {
        self.pending_request()
            .and_then(|r| r.deadline)
            .map(|deadline| now >= deadline)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> Vec<TakeoverField> {
        vec![
            TakeoverField {
                id: "username".to_string(),
                label: "Username".to_string(),
                field_type: "text".to_string(),
                required: true,
            },
            TakeoverField {
                id: "password".to_string(),
                label: "Password".to_string(),
                field_type: "password".to_string(),
                required: true,
            },
        ]
    }

    fn request(state: &mut TakeoverState, timeout: Option<u32>) -> bool {
        state.on_request("Login required".to_string(), fields(), timeout, Utc::now())
    }

    #[test]
    fn test_request_enters_pending() {
        let mut state = TakeoverState::new();
        assert!(request(&mut state, None));
        assert!(state.is_pending());
        assert_eq!(state.pending_request().unwrap().fields.len(), 2);
    }

    #[test]
    fn test_duplicate_pending_request_absorbed() {
        let mut state = TakeoverState::new();
        assert!(request(&mut state, None));
        assert!(!request(&mut state, None), "redelivery must not reopen the form");
        assert!(state.is_pending());
    }

    #[test]
    fn test_resolution_is_terminal_per_round() {
        let mut state = TakeoverState::new();
        request(&mut state, None);
        assert!(state.resolve(TakeoverResolution::Submitted));
        assert!(!state.is_pending());

        // A second resolve of the same round is a no-op.
        assert!(!state.resolve(TakeoverResolution::Skipped));
        assert_eq!(state.last_resolution(), Some(TakeoverResolution::Submitted));
    }

    #[test]
    fn test_identical_request_after_resolution_shows_again() {
        let mut state = TakeoverState::new();
        request(&mut state, None);
        state.resolve(TakeoverResolution::Submitted);

        // Same message and field set, but a genuinely new round.
        assert!(request(&mut state, None));
        assert!(state.is_pending());
    }

    #[test]
    fn test_new_request_supersedes_pending_one() {
        let mut state = TakeoverState::new();
        request(&mut state, None);
        assert!(state.on_request("MFA code required".to_string(), fields(), None, Utc::now()));
        assert_eq!(state.pending_request().unwrap().message, "MFA code required");
    }

    #[test]
    fn test_countdown_arms_and_clears() {
        let mut state = TakeoverState::new();
        let now = Utc::now();
        state.on_request("Login required".to_string(), fields(), Some(120), now);

        let remaining = state.countdown_remaining(now + Duration::seconds(30)).unwrap();
        assert_eq!(remaining, 90);
        assert!(!state.countdown_expired(now + Duration::seconds(30)));
        assert!(state.countdown_expired(now + Duration::seconds(121)));

        // Expiry is informational: the round is still pending.
        assert!(state.is_pending());

        state.resolve(TakeoverResolution::Skipped);
        assert_eq!(state.countdown_remaining(now), None);
        assert!(!state.countdown_expired(now + Duration::seconds(300)));
    }
}
