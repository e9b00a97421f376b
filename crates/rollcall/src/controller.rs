//! Session/flow controller: capture → match → store decisions.

use crate::error::FlowError;
use crate::session::{Session, SessionState};
use chrono::{Local, NaiveDateTime};
use rollcall_core::{FaceDetector, FaceSampler, Matcher, PixelDiffMatcher, Template};
use rollcall_hw::{CaptureError, Frame, FrameSource};
use rollcall_store::{
    AttendanceEntry, AttendanceRecord, AttendanceStore, MarkResult, NewUser, UserId,
};

/// User-entered registration fields.
#[derive(Debug, Clone, Default)]
pub struct Registration {
    pub name: String,
    pub enrollment: String,
    pub college: String,
    pub class: String,
    pub section: String,
}

impl Registration {
    /// Names of required fields that are empty or whitespace only.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("name", &self.name),
            ("enrollment", &self.enrollment),
            ("college", &self.college),
            ("class", &self.class),
            ("section", &self.section),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| field)
        .collect()
    }
}

/// Successful outcome of a mark-trigger.
#[derive(Debug, Clone, PartialEq)]
pub enum MarkOutcome {
    Marked { record: AttendanceRecord, score: f32 },
    /// The face matched but today's record already exists. Nothing was written.
    AlreadyMarkedToday { score: f32 },
}

impl MarkOutcome {
    pub fn score(&self) -> f32 {
        match self {
            MarkOutcome::Marked { score, .. } | MarkOutcome::AlreadyMarkedToday { score } => *score,
        }
    }
}

/// Drives sessions through registration, login and attendance marking.
///
/// Owns the process-wide store handle plus the sampler and matcher. Session
/// state lives in the [`Session`] passed to each call.
pub struct Controller<D, M = PixelDiffMatcher> {
    store: AttendanceStore,
    sampler: FaceSampler<D>,
    matcher: M,
    capture_attempts: usize,
}

const DEFAULT_CAPTURE_ATTEMPTS: usize = 30;

impl<D: FaceDetector> Controller<D> {
    pub fn new(store: AttendanceStore, sampler: FaceSampler<D>) -> Self {
        Self {
            store,
            sampler,
            matcher: PixelDiffMatcher::default(),
            capture_attempts: DEFAULT_CAPTURE_ATTEMPTS,
        }
    }
}

impl<D: FaceDetector, M: Matcher> Controller<D, M> {
    pub fn with_matcher<N: Matcher>(self, matcher: N) -> Controller<D, N> {
        Controller {
            store: self.store,
            sampler: self.sampler,
            matcher,
            capture_attempts: self.capture_attempts,
        }
    }

    /// Frames to pull from a source before giving up. Zero is treated as one.
    pub fn with_capture_attempts(mut self, attempts: usize) -> Self {
        self.capture_attempts = attempts.max(1);
        self
    }

    pub fn store(&self) -> &AttendanceStore {
        &self.store
    }

    /// Release the controller and hand back the store for shutdown.
    pub fn into_store(self) -> AttendanceStore {
        self.store
    }

    /// Sample a canonical template from one frame.
    pub fn sample_frame(&self, frame: &Frame) -> Option<Template> {
        tracing::debug!(
            seq = frame.sequence,
            width = frame.width(),
            height = frame.height(),
            brightness = frame.avg_brightness(),
            "sampling frame"
        );
        self.sampler.sample(&frame.image)
    }

    /// Capture-trigger: pull frames until one yields a face template.
    pub fn capture_template<S: FrameSource>(&self, mut source: S) -> Result<Template, FlowError> {
        let mut last_error = None;
        let mut sampled = false;

        for attempt in 1..=self.capture_attempts {
            let frame = match source.read_frame() {
                Ok(frame) => frame,
                Err(e) if e.is_terminal() => return Err(capture_failure(sampled, Some(e))),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "frame capture failed");
                    last_error = Some(e);
                    continue;
                }
            };
            sampled = true;
            if let Some(template) = self.sample_frame(&frame) {
                tracing::info!(attempt, "face captured");
                return Ok(template);
            }
        }

        Err(capture_failure(sampled, last_error))
    }

    /// Registration submission.
    ///
    /// Every field must be non-blank and a face template must have been
    /// captured. The template is stored as lossless image bytes.
    pub fn register(
        &self,
        registration: &Registration,
        template: Option<&Template>,
    ) -> Result<UserId, FlowError> {
        let mut missing = registration.missing_fields();
        if template.is_none() {
            missing.push("face sample");
        }
        let Some(template) = template.filter(|_| missing.is_empty()) else {
            tracing::info!(?missing, "registration rejected");
            return Err(FlowError::Validation(missing));
        };

        let encoded = template.encode()?;
        let id = self.store.register_user(&NewUser {
            name: &registration.name,
            enrollment: &registration.enrollment,
            college: &registration.college,
            class: &registration.class,
            section: &registration.section,
            face_template: &encoded,
        })?;
        Ok(id)
    }

    /// Login submission. On success the session holds the user and their
    /// canonical reference template.
    pub fn login(
        &self,
        session: &mut Session,
        name: &str,
        enrollment: &str,
    ) -> Result<UserId, FlowError> {
        let Some(user) = self.store.find_user_by_credentials(name, enrollment)? else {
            tracing::info!(enrollment, "login rejected");
            return Err(FlowError::CredentialsNotFound);
        };

        let reference = Template::decode(&user.face_template, self.sampler.template_size())?;
        let id = user.id;
        session.log_in(user, reference);
        tracing::info!(user_id = id, "logged in");
        Ok(id)
    }

    /// Enter `AttendanceInProgress` ahead of capturing.
    pub fn begin_attendance(&self, session: &mut Session) -> Result<(), FlowError> {
        if !session.is_logged_in() {
            return Err(FlowError::NotLoggedIn);
        }
        session.set_state(SessionState::AttendanceInProgress);
        Ok(())
    }

    /// Mark-trigger on a single frame, stamped with the current local time.
    pub fn mark_attendance(
        &self,
        session: &mut Session,
        frame: &Frame,
    ) -> Result<MarkOutcome, FlowError> {
        self.mark_attendance_at(session, frame, Local::now().naive_local())
    }

    /// Mark-trigger on a single frame at an explicit timestamp.
    ///
    /// No face leaves the session in `AttendanceInProgress`; a mismatch moves
    /// it to `AttendanceRejected` but keeps the user logged in.
    pub fn mark_attendance_at(
        &self,
        session: &mut Session,
        frame: &Frame,
        at: NaiveDateTime,
    ) -> Result<MarkOutcome, FlowError> {
        let Some(active) = session.active() else {
            return Err(FlowError::NotLoggedIn);
        };
        let user_id = active.user.id;

        let Some(candidate) = self.sample_frame(frame) else {
            session.set_state(SessionState::AttendanceInProgress);
            return Err(FlowError::FaceNotDetected);
        };

        let result = self.matcher.compare(&candidate, &active.reference);
        if !result.matched {
            tracing::info!(user_id, score = result.score, "face not matched");
            session.set_state(SessionState::AttendanceRejected);
            return Err(FlowError::FaceNotMatched { score: result.score });
        }

        match self.store.mark_attendance(user_id, at) {
            Ok(MarkResult::Marked(record)) => {
                session.set_state(SessionState::AttendanceMarked);
                Ok(MarkOutcome::Marked { record, score: result.score })
            }
            Ok(MarkResult::AlreadyMarkedToday) => {
                session.set_state(SessionState::AttendanceAlreadyMarked);
                Ok(MarkOutcome::AlreadyMarkedToday { score: result.score })
            }
            Err(e) => {
                tracing::warn!(user_id, error = %e, "failed to mark attendance");
                session.set_state(SessionState::AttendanceInProgress);
                Err(e.into())
            }
        }
    }

    /// Pull frames until one has a face, then mark on it.
    ///
    /// Frames without a face are skipped up to the configured attempt limit.
    pub fn mark_from_source<S: FrameSource>(
        &self,
        session: &mut Session,
        mut source: S,
    ) -> Result<MarkOutcome, FlowError> {
        self.begin_attendance(session)?;
        let mut last_error = None;
        let mut sampled = false;

        for attempt in 1..=self.capture_attempts {
            let frame = match source.read_frame() {
                Ok(frame) => frame,
                Err(e) if e.is_terminal() => return Err(capture_failure(sampled, Some(e))),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "frame capture failed");
                    last_error = Some(e);
                    continue;
                }
            };
            sampled = true;
            match self.mark_attendance(session, &frame) {
                Err(FlowError::FaceNotDetected) => continue,
                other => return other,
            }
        }

        Err(capture_failure(sampled, last_error))
    }

    /// Attendance listing for the logged-in user, most recent first.
    pub fn attendance(&self, session: &Session) -> Result<Vec<AttendanceEntry>, FlowError> {
        let user = session.user().ok_or(FlowError::NotLoggedIn)?;
        self.attendance_for(user.id)
    }

    pub fn attendance_for(&self, user_id: UserId) -> Result<Vec<AttendanceEntry>, FlowError> {
        Ok(self.store.list_attendance(user_id)?)
    }

    pub fn logout(&self, session: &mut Session) {
        if let Some(user) = session.user() {
            tracing::info!(user_id = user.id, "logged out");
        }
        session.log_out();
    }
}

/// Attendance listing by credentials for callers that hold only the store.
///
/// Needs no sampler, so it works without a cascade or camera.
pub fn history(
    store: &AttendanceStore,
    name: &str,
    enrollment: &str,
) -> Result<Vec<AttendanceEntry>, FlowError> {
    let Some(user) = store.find_user_by_credentials(name, enrollment)? else {
        tracing::info!(enrollment, "history lookup rejected");
        return Err(FlowError::CredentialsNotFound);
    };
    Ok(store.list_attendance(user.id)?)
}

/// Error for a capture loop that stopped without a usable face.
///
/// Once a frame has been read, running out of frames means no face was found.
fn capture_failure(sampled: bool, error: Option<CaptureError>) -> FlowError {
    match error {
        Some(CaptureError::Exhausted) if sampled => FlowError::FaceNotDetected,
        Some(e) if !sampled || e.is_terminal() => FlowError::Capture(e),
        _ => FlowError::FaceNotDetected,
    }
}
