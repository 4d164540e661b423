//! The processing state machine.
//!
//! `Session` is synchronous and clock-agnostic: callers pass `now` in, and
//! remote calls happen elsewhere. Each call is tied to the generation that was
//! current when it started; completions for an older generation are dropped.

use crate::error::{RecolorError, Result};
use crate::image::{RecolorResult, UploadedImage};
use crate::session::state::{Failure, ProcessingState, Snapshot};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Minimum interval between two accepted `start` calls.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(15);

/// Permission to run one remote call, issued by [`Session::start`].
#[derive(Debug, Clone)]
pub(crate) struct Ticket {
    /// Generation the result must be delivered against.
    pub generation: u64,
    /// Image to send.
    pub image: Arc<UploadedImage>,
}

/// Session state for one user.
///
/// Only the controller task drives a `Session`; presentation code goes
/// through [`RecolorController`](crate::session::RecolorController).
#[derive(Debug)]
pub(crate) struct Session {
    state: ProcessingState,
    image: Option<Arc<UploadedImage>>,
    result: Option<Arc<RecolorResult>>,
    failure: Option<Failure>,
    cooldown_anchor: Option<Instant>,
    cooldown: Duration,
    generation: u64,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}

impl Session {
    /// Creates an idle session with the given cooldown.
    pub fn new(cooldown: Duration) -> Self {
        Self {
            state: ProcessingState::Idle,
            image: None,
            result: None,
            failure: None,
            cooldown_anchor: None,
            cooldown,
            generation: 0,
        }
    }

    /// Time left before `start` will be accepted again.
    pub fn cooldown_remaining(&self, now: Instant) -> Option<Duration> {
        let anchor = self.cooldown_anchor?;
        let elapsed = now.saturating_duration_since(anchor);
        self.cooldown
            .checked_sub(elapsed)
            .filter(|remaining| !remaining.is_zero())
    }

    /// Replaces the held image and returns to `Idle`.
    ///
    /// Any in-flight call is orphaned. The cooldown anchor is kept.
    pub fn upload(&mut self, image: UploadedImage) {
        self.generation += 1;
        self.image = Some(Arc::new(image));
        self.result = None;
        self.failure = None;
        self.state = ProcessingState::Idle;
        tracing::info!(generation = self.generation, "image uploaded");
    }

    /// Attempts to begin processing.
    ///
    /// A request while `Processing` is rejected without touching state. A
    /// missing image or an active cooldown moves to `Error`. Otherwise the
    /// cooldown anchor is set to `now` and a [`Ticket`] is issued.
    pub fn start(&mut self, now: Instant) -> Result<Ticket> {
        if self.state == ProcessingState::Processing {
            tracing::warn!(generation = self.generation, "start rejected: already processing");
            return Err(RecolorError::AlreadyProcessing);
        }

        let Some(image) = self.image.clone() else {
            return Err(self.fail(RecolorError::NoImageSelected));
        };

        if let Some(remaining) = self.cooldown_remaining(now) {
            tracing::warn!(
                generation = self.generation,
                remaining_ms = remaining.as_millis() as u64,
                "start rejected: cooldown active"
            );
            return Err(self.fail(RecolorError::CooldownActive { remaining }));
        }

        self.cooldown_anchor = Some(now);
        self.result = None;
        self.failure = None;
        self.state = ProcessingState::Processing;
        tracing::info!(generation = self.generation, "processing started");

        Ok(Ticket {
            generation: self.generation,
            image,
        })
    }

    /// Applies the outcome of a remote call.
    ///
    /// Returns false, leaving state untouched, if the call belongs to an
    /// older generation or the session is no longer processing.
    pub fn complete(&mut self, generation: u64, outcome: Result<RecolorResult>) -> bool {
        if generation != self.generation || self.state != ProcessingState::Processing {
            tracing::warn!(
                call_generation = generation,
                generation = self.generation,
                "discarding stale recolor completion"
            );
            return false;
        }

        match outcome {
            Ok(result) => {
                self.result = Some(Arc::new(result));
                self.failure = None;
                self.state = ProcessingState::Success;
                tracing::info!(generation, "processing succeeded");
            }
            Err(err) => {
                tracing::info!(generation, error = %err, "processing failed");
                self.fail(err);
            }
        }
        true
    }

    /// Clears everything, including the cooldown, and returns to `Idle`.
    pub fn reset(&mut self) {
        self.generation += 1;
        self.image = None;
        self.result = None;
        self.failure = None;
        self.cooldown_anchor = None;
        self.state = ProcessingState::Idle;
        tracing::info!(generation = self.generation, "session reset");
    }

    /// Captures the current state for presentation.
    pub fn snapshot(&self, now: Instant) -> Snapshot {
        Snapshot {
            state: self.state,
            generation: self.generation,
            original: self.image.clone(),
            result: self.result.clone(),
            error: self.failure.clone(),
            cooldown_remaining: self.cooldown_remaining(now),
        }
    }

    fn fail(&mut self, err: RecolorError) -> RecolorError {
        self.failure = Some(Failure::from(&err));
        self.state = ProcessingState::Error;
        err
    }
}

#[cfg(test)]
impl Session {
    /// Current state.
    pub fn state(&self) -> ProcessingState {
        self.state
    }

    /// Current generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The held image.
    pub fn image(&self) -> Option<&Arc<UploadedImage>> {
        self.image.as_ref()
    }

    /// The last successful result.
    pub fn result(&self) -> Option<&Arc<RecolorResult>> {
        self.result.as_ref()
    }

    /// The current failure.
    pub fn failure(&self) -> Option<&Failure> {
        self.failure.as_ref()
    }

    /// When the last accepted `start` happened.
    pub fn cooldown_anchor(&self) -> Option<Instant> {
        self.cooldown_anchor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::image::{EncodedImage, ImageFormat};

    fn upload() -> UploadedImage {
        UploadedImage {
            image: EncodedImage::from_bytes(&[0xFF, 0xD8, 0xFF], "image/jpeg"),
            width: 1024,
            height: 512,
            source_format: ImageFormat::Jpeg,
        }
    }

    fn result() -> RecolorResult {
        RecolorResult::new(EncodedImage::from_base64("iVBORw0KGgo=", "image/png"))
    }

    #[test]
    fn test_upload_moves_to_idle_and_clears() {
        let mut session = Session::default();
        let now = Instant::now();
        session.upload(upload());
        let ticket = session.start(now).unwrap();
        assert!(session.complete(ticket.generation, Ok(result())));
        assert_eq!(session.state(), ProcessingState::Success);

        session.upload(upload());
        assert_eq!(session.state(), ProcessingState::Idle);
        assert!(session.result().is_none());
        assert!(session.failure().is_none());
        assert!(session.image().is_some());
        assert_eq!(session.cooldown_anchor(), Some(now));
    }

    #[test]
    fn test_start_without_image_errors() {
        let mut session = Session::default();
        let err = session.start(Instant::now()).unwrap_err();
        assert!(matches!(err, RecolorError::NoImageSelected));
        assert_eq!(session.state(), ProcessingState::Error);
        assert_eq!(session.failure().unwrap().kind, ErrorKind::NoImageSelected);
        assert!(session.cooldown_anchor().is_none());
    }

    #[test]
    fn test_start_while_processing_is_rejected_without_change() {
        let mut session = Session::default();
        let now = Instant::now();
        session.upload(upload());
        let ticket = session.start(now).unwrap();

        let later = now + Duration::from_secs(60);
        let err = session.start(later).unwrap_err();
        assert!(matches!(err, RecolorError::AlreadyProcessing));
        assert_eq!(session.state(), ProcessingState::Processing);
        assert_eq!(session.cooldown_anchor(), Some(now));
        assert!(session.failure().is_none());
        assert!(session.complete(ticket.generation, Ok(result())));
    }

    #[test]
    fn test_cooldown_rejects_second_start() {
        let mut session = Session::default();
        let t0 = Instant::now();
        session.upload(upload());
        let ticket = session.start(t0).unwrap();
        session.complete(ticket.generation, Ok(result()));

        let err = session.start(t0 + Duration::from_secs(5)).unwrap_err();
        assert!(matches!(
            err,
            RecolorError::CooldownActive { remaining } if remaining == Duration::from_secs(10)
        ));
        assert_eq!(session.state(), ProcessingState::Error);
        assert_eq!(
            session.failure().unwrap().message,
            "Please wait 10 more seconds before processing another image."
        );
        assert_eq!(session.cooldown_anchor(), Some(t0));

        // Re-enterable from Error once the window has elapsed.
        let ticket = session.start(t0 + Duration::from_secs(15)).unwrap();
        assert_eq!(session.state(), ProcessingState::Processing);
        assert!(session.failure().is_none());
        assert_eq!(
            session.cooldown_anchor(),
            Some(t0 + Duration::from_secs(15))
        );
        assert_eq!(ticket.generation, session.generation());
    }

    #[test]
    fn test_failure_leaves_result_empty() {
        let mut session = Session::default();
        session.upload(upload());
        let ticket = session.start(Instant::now()).unwrap();
        session.complete(
            ticket.generation,
            Err(RecolorError::NoImageReturned("text only".into())),
        );
        assert_eq!(session.state(), ProcessingState::Error);
        assert!(session.result().is_none());
        assert_eq!(session.failure().unwrap().kind, ErrorKind::NoImageReturned);
    }

    #[test]
    fn test_content_policy_failure_gets_soft_message() {
        let mut session = Session::new(Duration::ZERO);
        session.upload(upload());

        let ticket = session.start(Instant::now()).unwrap();
        session.complete(
            ticket.generation,
            Err(RecolorError::ContentBlocked("IMAGE_SAFETY".into())),
        );
        let blocked = session.failure().unwrap().message.clone();

        let ticket = session.start(Instant::now()).unwrap();
        session.complete(
            ticket.generation,
            Err(RecolorError::Api {
                status: 503,
                message: "overloaded".into(),
            }),
        );
        let generic = session.failure().unwrap().message.clone();

        assert_ne!(blocked, generic);
        assert!(!generic.contains("overloaded"));
    }

    #[test]
    fn test_stale_completion_is_discarded() {
        let mut session = Session::default();
        session.upload(upload());
        let stale = session.start(Instant::now()).unwrap();

        session.reset();
        session.upload(upload());
        assert!(!session.complete(stale.generation, Ok(result())));
        assert_eq!(session.state(), ProcessingState::Idle);
        assert!(session.result().is_none());
    }

    #[test]
    fn test_reset_from_every_state() {
        let now = Instant::now();
        let mut states = Vec::new();

        let idle = Session::default();
        states.push(idle);

        let mut processing = Session::default();
        processing.upload(upload());
        processing.start(now).unwrap();
        states.push(processing);

        let mut success = Session::default();
        success.upload(upload());
        let t = success.start(now).unwrap();
        success.complete(t.generation, Ok(result()));
        states.push(success);

        let mut error = Session::default();
        error.start(now).unwrap_err();
        states.push(error);

        for mut session in states {
            session.reset();
            assert_eq!(session.state(), ProcessingState::Idle);
            assert!(session.image().is_none());
            assert!(session.result().is_none());
            assert!(session.failure().is_none());
            assert!(session.cooldown_anchor().is_none());
            assert!(session.cooldown_remaining(now).is_none());
        }
    }

    #[test]
    fn test_snapshot_reports_cooldown() {
        let mut session = Session::default();
        let t0 = Instant::now();
        session.upload(upload());
        session.start(t0).unwrap();

        let snap = session.snapshot(t0 + Duration::from_secs(4));
        assert!(snap.is_processing());
        assert_eq!(snap.cooldown_remaining, Some(Duration::from_secs(11)));
        assert!(snap.original.is_some());
        assert!(session
            .snapshot(t0 + Duration::from_secs(20))
            .cooldown_remaining
            .is_none());
    }
}
