//! # Payment Session
//!
//! The pure state machine behind a cash payment. It owns the order id, the
//! target and the running total; the coordinator owns exactly one of these
//! and drives it from device credit events.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   Idle ── start(order, target) ──► Active                              │
//! │    ▲                                 │  apply_credit(v)                 │
//! │    │                                 │  accumulated += v                │
//! │    │                                 ▼                                  │
//! │    │                  accumulated ≥ target?  ── no ──► stay Active      │
//! │    │                                 │ yes (exactly once)               │
//! │    │                                 ▼                                  │
//! │    │                            Completing ── finish() ──► Completed    │
//! │    │                                                          │         │
//! │    │                 Active ── cancel() ──► Cancelled          │         │
//! │    │                                            │              │         │
//! │    └──────────────── reset() ◄──────────────────┴──────────────┘         │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Credits are only accepted while Active. A credit that arrives in any other
//! state is rejected with `NoActiveSession` so the caller can report it
//! instead of losing it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::types::SessionStatus;
use crate::validation::{validate_credit, validate_order_id, validate_target_amount};

// =============================================================================
// Outcomes
// =============================================================================

/// Result of applying one credit to an active session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditOutcome {
    /// Value of this credit.
    pub value: Money,
    /// Running total after this credit.
    pub accumulated: Money,
    /// `max(0, target - accumulated)`.
    pub remaining: Money,
    /// Set exactly once: on the credit that reached the target.
    pub completion: Option<Completion>,
}

/// The session reached its target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub order_id: String,
    pub total_paid: Money,
    /// `total_paid - target`, never negative.
    pub change: Money,
}

/// The session was cancelled; `refunded` is owed back to the customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancellation {
    pub order_id: String,
    pub refunded: Money,
}

/// Read-only view of the session for status queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub session_id: Option<String>,
    pub order_id: Option<String>,
    pub target: Money,
    pub accumulated: Money,
    #[ts(type = "string | null")]
    pub started_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Payment Session
// =============================================================================

#[derive(Debug, Clone)]
struct SessionData {
    session_id: String,
    order_id: String,
    target: Money,
    accumulated: Money,
    started_at: DateTime<Utc>,
}

/// One payment session slot.
#[derive(Debug, Clone, Default)]
pub struct PaymentSession {
    status: SessionStatus,
    data: Option<SessionData>,
}

impl PaymentSession {
    /// Creates an idle session slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current status.
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// True while cash is being accepted.
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// Order id of the current session, if any.
    pub fn order_id(&self) -> Option<&str> {
        self.data.as_ref().map(|d| d.order_id.as_str())
    }

    /// Running total of the current session (zero when idle).
    pub fn accumulated(&self) -> Money {
        self.data.as_ref().map(|d| d.accumulated).unwrap_or_default()
    }

    /// Checks that `start` would succeed without changing anything.
    ///
    /// Lets the coordinator reject bad input before touching hardware.
    pub fn check_can_start(&self, order_id: &str, target: Money) -> CoreResult<()> {
        validate_order_id(order_id)?;
        validate_target_amount(target)?;

        match (self.status, &self.data) {
            (SessionStatus::Active | SessionStatus::Completing, Some(data)) => {
                Err(CoreError::SessionInProgress {
                    order_id: data.order_id.clone(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Starts a new session with `accumulated = 0`.
    ///
    /// Allowed from Idle and from the transient terminal states.
    pub fn start(&mut self, order_id: &str, target: Money) -> CoreResult<SessionSnapshot> {
        self.check_can_start(order_id, target)?;

        self.data = Some(SessionData {
            session_id: Uuid::new_v4().to_string(),
            order_id: order_id.trim().to_string(),
            target,
            accumulated: Money::zero(),
            started_at: Utc::now(),
        });
        self.status = SessionStatus::Active;

        Ok(self.snapshot())
    }

    /// Adds a device credit to the running total.
    ///
    /// The first credit that brings the total to or past the target moves
    /// the session to Completing and carries the [`Completion`]. Any credit
    /// after that is rejected with `NoActiveSession`.
    pub fn apply_credit(&mut self, value: Money) -> CoreResult<CreditOutcome> {
        validate_credit(value)?;

        if self.status != SessionStatus::Active {
            return Err(CoreError::NoActiveSession);
        }
        let data = self.data.as_mut().ok_or(CoreError::NoActiveSession)?;

        data.accumulated += value;
        let accumulated = data.accumulated;
        let remaining = data.target.saturating_remaining(accumulated);

        let completion = if accumulated >= data.target {
            self.status = SessionStatus::Completing;
            Some(Completion {
                order_id: data.order_id.clone(),
                total_paid: accumulated,
                change: accumulated - data.target,
            })
        } else {
            None
        };

        Ok(CreditOutcome {
            value,
            accumulated,
            remaining,
            completion,
        })
    }

    /// Completing → Completed.
    pub fn finish(&mut self) -> CoreResult<()> {
        if self.status != SessionStatus::Completing {
            return Err(self.invalid("finish"));
        }
        self.status = SessionStatus::Completed;
        Ok(())
    }

    /// Active → Cancelled, returning what must be refunded.
    pub fn cancel(&mut self) -> CoreResult<Cancellation> {
        match self.status {
            SessionStatus::Active => {}
            SessionStatus::Idle | SessionStatus::Completed | SessionStatus::Cancelled => {
                return Err(CoreError::NoActiveSession)
            }
            SessionStatus::Completing => return Err(self.invalid("cancel")),
        }

        let data = self.data.as_ref().ok_or(CoreError::NoActiveSession)?;
        let cancellation = Cancellation {
            order_id: data.order_id.clone(),
            refunded: data.accumulated,
        };
        self.status = SessionStatus::Cancelled;
        Ok(cancellation)
    }

    /// Clears a terminal session back to Idle. No-op when already Idle.
    pub fn reset(&mut self) -> CoreResult<()> {
        match self.status {
            SessionStatus::Idle => Ok(()),
            SessionStatus::Completed | SessionStatus::Cancelled => {
                self.status = SessionStatus::Idle;
                self.data = None;
                Ok(())
            }
            _ => Err(self.invalid("reset")),
        }
    }

    /// Abandons whatever is in flight (process shutdown).
    ///
    /// Returns what was collected so the caller can log it.
    pub fn abandon(&mut self) -> Option<Cancellation> {
        let data = self.data.take()?;
        self.status = SessionStatus::Idle;
        Some(Cancellation {
            order_id: data.order_id,
            refunded: data.accumulated,
        })
    }

    /// Returns a read-only view.
    pub fn snapshot(&self) -> SessionSnapshot {
        match &self.data {
            Some(data) => SessionSnapshot {
                status: self.status,
                session_id: Some(data.session_id.clone()),
                order_id: Some(data.order_id.clone()),
                target: data.target,
                accumulated: data.accumulated,
                started_at: Some(data.started_at),
            },
            None => SessionSnapshot {
                status: self.status,
                session_id: None,
                order_id: None,
                target: Money::zero(),
                accumulated: Money::zero(),
                started_at: None,
            },
        }
    }

    fn invalid(&self, operation: &str) -> CoreError {
        CoreError::InvalidSessionStatus {
            operation: operation.to_string(),
            status: self.status.to_string(),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn cents(v: i64) -> Money {
        Money::from_cents(v)
    }

    #[test]
    fn test_start_resets_accumulated() {
        let mut session = PaymentSession::new();
        let snapshot = session.start("A-1", cents(550)).unwrap();
        assert_eq!(snapshot.status, SessionStatus::Active);
        assert_eq!(snapshot.accumulated, Money::zero());
        assert_eq!(snapshot.order_id.as_deref(), Some("A-1"));
        assert!(snapshot.session_id.is_some());
    }

    #[test]
    fn test_overpay_completes_once_with_change() {
        let mut session = PaymentSession::new();
        session.start("A-1", cents(550)).unwrap();

        let first = session.apply_credit(cents(500)).unwrap();
        assert_eq!(first.accumulated, cents(500));
        assert_eq!(first.remaining, cents(50));
        assert!(first.completion.is_none());

        let second = session.apply_credit(cents(100)).unwrap();
        assert_eq!(second.accumulated, cents(600));
        assert_eq!(second.remaining, Money::zero());
        assert_eq!(
            second.completion,
            Some(Completion {
                order_id: "A-1".into(),
                total_paid: cents(600),
                change: cents(50),
            })
        );
        assert_eq!(session.status(), SessionStatus::Completing);

        // Nothing more may be credited to a completing session.
        assert!(matches!(
            session.apply_credit(cents(100)),
            Err(CoreError::NoActiveSession)
        ));
    }

    #[test]
    fn test_exact_payment_has_zero_change() {
        let mut session = PaymentSession::new();
        session.start("A-2", cents(300)).unwrap();
        let outcome = session.apply_credit(cents(300)).unwrap();
        assert_eq!(outcome.completion.unwrap().change, Money::zero());
    }

    #[test]
    fn test_accumulated_is_exact_sum_and_completion_fires_once() {
        let credits = [100, 200, 50, 20, 500, 10, 200];
        let target = cents(800);

        let mut session = PaymentSession::new();
        session.start("A-3", target).unwrap();

        let mut sum = 0;
        let mut completions = 0;
        for v in credits {
            match session.apply_credit(cents(v)) {
                Ok(outcome) => {
                    sum += v;
                    assert_eq!(outcome.accumulated, cents(sum));
                    if let Some(done) = outcome.completion {
                        completions += 1;
                        assert!(sum >= 800);
                        assert_eq!(done.change, cents(sum - 800));
                    }
                }
                Err(CoreError::NoActiveSession) => assert_eq!(completions, 1),
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(completions, 1);
        assert_eq!(sum, 870);
    }

    #[test]
    fn test_cancel_refunds_accumulated() {
        let mut session = PaymentSession::new();
        session.start("A-4", cents(1000)).unwrap();
        session.apply_credit(cents(300)).unwrap();

        let cancellation = session.cancel().unwrap();
        assert_eq!(cancellation.refunded, cents(300));
        assert_eq!(session.status(), SessionStatus::Cancelled);

        session.reset().unwrap();
        assert_eq!(session.status(), SessionStatus::Idle);
        assert_eq!(session.snapshot().order_id, None);
    }

    #[test]
    fn test_cancel_when_idle_is_rejected() {
        let mut session = PaymentSession::new();
        assert!(matches!(session.cancel(), Err(CoreError::NoActiveSession)));
    }

    #[test]
    fn test_start_while_active_is_rejected() {
        let mut session = PaymentSession::new();
        session.start("A-5", cents(1000)).unwrap();
        session.apply_credit(cents(200)).unwrap();

        let err = session.start("A-6", cents(100)).unwrap_err();
        assert!(matches!(err, CoreError::SessionInProgress { ref order_id } if order_id == "A-5"));
        assert_eq!(session.accumulated(), cents(200));
    }

    #[test]
    fn test_start_after_terminal_state_is_allowed() {
        let mut session = PaymentSession::new();
        session.start("A-7", cents(100)).unwrap();
        session.apply_credit(cents(100)).unwrap();
        session.finish().unwrap();
        assert_eq!(session.status(), SessionStatus::Completed);

        session.start("A-8", cents(200)).unwrap();
        assert_eq!(session.accumulated(), Money::zero());
    }

    #[test]
    fn test_invalid_input_rejected() {
        let mut session = PaymentSession::new();
        assert!(matches!(
            session.start("", cents(100)),
            Err(CoreError::Validation(_))
        ));
        assert!(matches!(
            session.start("A-9", Money::zero()),
            Err(CoreError::Validation(_))
        ));
        assert_eq!(session.status(), SessionStatus::Idle);
    }

    #[test]
    fn test_finish_and_reset_guard_states() {
        let mut session = PaymentSession::new();
        assert!(session.finish().is_err());
        assert!(session.reset().is_ok());

        session.start("A-10", cents(100)).unwrap();
        assert!(matches!(
            session.reset(),
            Err(CoreError::InvalidSessionStatus { .. })
        ));
    }

    #[test]
    fn test_abandon_reports_collected_cash() {
        let mut session = PaymentSession::new();
        assert!(session.abandon().is_none());

        session.start("A-11", cents(500)).unwrap();
        session.apply_credit(cents(200)).unwrap();
        let abandoned = session.abandon().unwrap();
        assert_eq!(abandoned.refunded, cents(200));
        assert_eq!(session.status(), SessionStatus::Idle);
    }
}
