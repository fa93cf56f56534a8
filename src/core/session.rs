use crate::capture::{FaceSampleProvider, SpeechEngine};
use crate::common::config::{Config, DEFAULT_DETECTION_INTERVAL_MS};
use crate::common::{VerifyError, Result};
use crate::core::descriptor::{FaceDescriptor, FaceSample};
use crate::core::face_matcher::{FaceMatcher, VerificationResult};
use crate::core::guard::{CaptureGuard, CaptureKind, SessionState};
use crate::core::phrase::{ChallengePhrase, PhraseChallenge, SpeechMatchResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Outcome of a single face capture attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum FaceCapture {
    /// Another capture or listen held the sensors; the provider was not called.
    Busy,
    NoFace,
    Face(FaceSample),
}

/// One user's enrollment/verification session.
///
/// Owns the camera and speech collaborators, the enrolled descriptor and the
/// active challenge phrase. All capture paths share one [`CaptureGuard`], so
/// face capture and phrase listening never overlap.
pub struct VerificationSession<F: FaceSampleProvider, S: SpeechEngine> {
    provider: F,
    speech: S,
    matcher: FaceMatcher,
    challenge: Mutex<PhraseChallenge>,
    enrolled: Mutex<Option<FaceDescriptor>>,
    guard: CaptureGuard,
    closed: AtomicBool,
    detection_interval: Duration,
}

impl<F: FaceSampleProvider, S: SpeechEngine> VerificationSession<F, S> {
    pub fn new(provider: F, speech: S) -> Self {
        Self {
            provider,
            speech,
            matcher: FaceMatcher::default(),
            challenge: Mutex::new(PhraseChallenge::default()),
            enrolled: Mutex::new(None),
            guard: CaptureGuard::new(),
            closed: AtomicBool::new(false),
            detection_interval: Duration::from_millis(DEFAULT_DETECTION_INTERVAL_MS),
        }
    }

    pub fn with_config(provider: F, speech: S, config: &Config) -> Self {
        let mut session = Self::new(provider, speech);
        session.matcher = FaceMatcher::from_config(config);
        session.challenge = Mutex::new(PhraseChallenge::from_config(config));
        session.detection_interval = Duration::from_millis(config.detection.interval_ms);
        session
    }

    pub fn with_matcher(mut self, matcher: FaceMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn with_challenge(mut self, challenge: PhraseChallenge) -> Self {
        self.challenge = Mutex::new(challenge);
        self
    }

    pub fn matcher(&self) -> &FaceMatcher {
        &self.matcher
    }

    pub fn state(&self) -> SessionState {
        self.guard.state()
    }

    pub fn is_busy(&self) -> bool {
        self.guard.is_busy()
    }

    /// Acknowledge the last outcome and return to `Idle`.
    pub fn reset(&self) {
        self.guard.reset();
    }

    pub fn enrolled_descriptor(&self) -> Option<FaceDescriptor> {
        lock(&self.enrolled).clone()
    }

    /// Load a descriptor enrolled earlier, e.g. from the student store.
    pub fn set_enrolled(&self, descriptor: FaceDescriptor) {
        *lock(&self.enrolled) = Some(descriptor);
    }

    /// Capture once. Returns `Busy` without touching the camera when another
    /// attempt is in flight.
    pub fn detect_face(&self) -> Result<FaceCapture> {
        let capture = self.with_face(|sample| {
            let found = sample.is_some();
            let capture = match sample {
                Some(sample) => FaceCapture::Face(sample),
                None => FaceCapture::NoFace,
            };
            Ok((capture, found))
        })?;
        Ok(capture.unwrap_or(FaceCapture::Busy))
    }

    /// Capture and keep the live descriptor as this session's identity record.
    pub fn enroll_face(&self) -> Result<FaceDescriptor> {
        let descriptor = self
            .with_face(|sample| Ok((self.matcher.enroll(sample)?, true)))?
            .ok_or(VerifyError::CaptureInProgress)?;

        *lock(&self.enrolled) = Some(descriptor.clone());
        tracing::info!("Face enrolled ({} values)", descriptor.len());
        Ok(descriptor)
    }

    /// Capture and compare against `stored`. A missing face is a denial in
    /// the returned result, not an error.
    pub fn verify_face(&self, stored: &FaceDescriptor) -> Result<VerificationResult> {
        let result = self
            .with_face(|sample| {
                let result = self.matcher.verify(stored, sample.as_ref())?;
                let verified = result.verified;
                Ok((result, verified))
            })?
            .ok_or(VerifyError::CaptureInProgress)?;

        tracing::info!("Face verification: verified={} confidence={}",
                       result.verified, result.confidence_display());
        Ok(result)
    }

    pub fn verify_enrolled(&self) -> Result<VerificationResult> {
        let stored = self.enrolled_descriptor().ok_or(VerifyError::NotEnrolled)?;
        self.verify_face(&stored)
    }

    /// Start a new voice challenge; the previous phrase is discarded.
    pub fn new_challenge(&self) -> String {
        lock(&self.challenge).generate_phrase()
    }

    pub fn set_challenge(&self, phrase: ChallengePhrase) {
        lock(&self.challenge).set_target(phrase);
    }

    pub fn current_challenge(&self) -> Option<String> {
        lock(&self.challenge).target().map(ChallengePhrase::text)
    }

    /// Listen once and score the transcript against the latest challenge.
    ///
    /// Unlike face capture, a second listen while busy is rejected with
    /// `ListenInProgress` so the caller can tell the user.
    pub fn listen_for_phrase(&self) -> Result<SpeechMatchResult> {
        self.ensure_open()?;
        let permit = self
            .guard
            .try_begin(CaptureKind::Phrase)
            .ok_or(VerifyError::ListenInProgress)?;

        if lock(&self.challenge).target().is_none() {
            return Err(VerifyError::NoChallengeActive);
        }

        let transcript = self.speech.listen().map_err(|e| {
            tracing::warn!("Speech recognition failed: {}", e);
            e
        })?;

        let result = lock(&self.challenge).evaluate(&transcript)?;
        tracing::info!("Phrase check: matched={} ({:.1}%)", result.matched, result.match_percentage);

        permit.finish(result.matched);
        Ok(result)
    }

    /// Poll the camera every `interval` (session default when `None`) and
    /// hand each capture to `on_detection` on a worker thread.
    ///
    /// Ticks that find the guard busy, or that fall due while a slow capture
    /// is still running, are dropped rather than queued. A result is only
    /// delivered if the handle has not been stopped by then.
    pub fn start_continuous_detection<C>(
        self: &Arc<Self>,
        interval: Option<Duration>,
        mut on_detection: C,
    ) -> Result<DetectionHandle>
    where
        F: 'static,
        S: 'static,
        C: FnMut(Result<Option<FaceSample>>) + Send + 'static,
    {
        self.ensure_open()?;
        let interval = interval.unwrap_or(self.detection_interval);
        if interval.is_zero() {
            return Err(VerifyError::InvalidInput("detection interval must be non-zero".into()));
        }

        let cancelled = Arc::new(AtomicBool::new(false));
        let weak: Weak<Self> = Arc::downgrade(self);
        let flag = Arc::clone(&cancelled);

        let worker = thread::Builder::new()
            .name("face-detection".into())
            .spawn(move || {
                let mut next_tick = Instant::now() + interval;
                loop {
                    wait_until(next_tick, &flag);
                    if flag.load(Ordering::Acquire) {
                        break;
                    }

                    let Some(session) = weak.upgrade() else { break };
                    let outcome = session.detect_face();
                    drop(session);

                    let delivery = match outcome {
                        Ok(FaceCapture::Busy) => {
                            tracing::trace!("Detection tick dropped: capture in flight");
                            None
                        }
                        Ok(FaceCapture::Face(sample)) => Some(Ok(Some(sample))),
                        Ok(FaceCapture::NoFace) => Some(Ok(None)),
                        Err(VerifyError::SessionClosed) => break,
                        Err(e) => Some(Err(e)),
                    };

                    if let Some(result) = delivery {
                        if flag.load(Ordering::Acquire) {
                            tracing::debug!("Discarding detection result after stop");
                            break;
                        }
                        on_detection(result);
                    }

                    next_tick += interval;
                    let now = Instant::now();
                    while next_tick <= now {
                        tracing::trace!("Detection tick skipped: previous capture overran");
                        next_tick += interval;
                    }
                }
                tracing::debug!("Continuous detection worker exited");
            })?;

        tracing::info!("Continuous detection started ({} ms)", interval.as_millis());
        Ok(DetectionHandle {
            cancelled,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Same as `handle.stop()`; safe on an already stopped handle.
    pub fn stop_continuous_detection(&self, handle: &DetectionHandle) {
        handle.stop();
    }

    /// Release camera and microphone. Safe to call more than once.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.provider.release();
        self.speech.release();
        tracing::debug!("Verification session closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(VerifyError::SessionClosed);
        }
        Ok(())
    }

    /// Run one guarded face capture. `Ok(None)` means the guard was busy.
    fn with_face<T>(
        &self,
        decide: impl FnOnce(Option<FaceSample>) -> Result<(T, bool)>,
    ) -> Result<Option<T>> {
        self.ensure_open()?;
        let Some(permit) = self.guard.try_begin(CaptureKind::Face) else {
            tracing::debug!("Face capture already in flight, skipping");
            return Ok(None);
        };

        let sample = self.provider.detect().map_err(|e| {
            tracing::warn!("Face detection failed: {}", e);
            e
        })?;

        let (value, succeeded) = decide(sample)?;
        permit.finish(succeeded);
        Ok(Some(value))
    }
}

impl<F: FaceSampleProvider, S: SpeechEngine> Drop for VerificationSession<F, S> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Cancellation handle for [`VerificationSession::start_continuous_detection`].
///
/// Stopping prevents future ticks and suppresses delivery of a capture that
/// is already running. Dropping the handle stops the worker.
#[derive(Debug)]
pub struct DetectionHandle {
    cancelled: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DetectionHandle {
    pub fn stop(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            tracing::info!("Continuous detection stopped");
        }
        if let Some(worker) = lock(&self.worker).as_ref() {
            worker.thread().unpark();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Stop and wait for the worker to exit. A no-op when called from the
    /// worker itself (inside the callback) or after a previous join.
    pub fn join(&self) {
        self.stop();
        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            if worker.thread().id() == thread::current().id() {
                return;
            }
            if worker.join().is_err() {
                tracing::warn!("Detection callback panicked");
            }
        }
    }
}

impl Drop for DetectionHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn wait_until(deadline: Instant, cancelled: &AtomicBool) {
    while !cancelled.load(Ordering::Acquire) {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::park_timeout(deadline - now);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::RecognitionErrorCode;
    use crate::core::phrase::Transcript;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    fn face(values: &[f32]) -> FaceSample {
        FaceSample::new(FaceDescriptor::new(values.to_vec()))
    }

    /// Replays canned detections; repeats the last one when exhausted.
    struct ScriptedCamera {
        frames: Mutex<VecDeque<Result<Option<FaceSample>>>>,
        calls: Arc<AtomicUsize>,
        releases: Arc<AtomicUsize>,
    }

    impl ScriptedCamera {
        fn new(frames: Vec<Result<Option<FaceSample>>>) -> Self {
            Self {
                frames: Mutex::new(frames.into()),
                calls: Arc::new(AtomicUsize::new(0)),
                releases: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl FaceSampleProvider for ScriptedCamera {
        fn detect(&self) -> Result<Option<FaceSample>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut frames = lock(&self.frames);
            let next = frames.pop_front().unwrap_or(Ok(None));
            if frames.is_empty() {
                if let Ok(sample) = &next {
                    frames.push_back(Ok(sample.clone()));
                }
            }
            next
        }

        fn release(&self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Blocks inside `detect` until the test lets it go.
    struct GatedCamera {
        entered: Mutex<mpsc::Sender<()>>,
        release_gate: Mutex<mpsc::Receiver<()>>,
        calls: Arc<AtomicUsize>,
    }

    impl FaceSampleProvider for GatedCamera {
        fn detect(&self) -> Result<Option<FaceSample>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _ = lock(&self.entered).send(());
            let _ = lock(&self.release_gate).recv();
            Ok(Some(face(&[0.0, 0.0])))
        }
    }

    struct ScriptedEngine {
        heard: Mutex<VecDeque<Result<Transcript>>>,
        releases: Arc<AtomicUsize>,
    }

    impl ScriptedEngine {
        fn new(heard: Vec<Result<Transcript>>) -> Self {
            Self {
                heard: Mutex::new(heard.into()),
                releases: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn silent() -> Self {
            Self::new(Vec::new())
        }
    }

    impl SpeechEngine for ScriptedEngine {
        fn listen(&self) -> Result<Transcript> {
            lock(&self.heard)
                .pop_front()
                .unwrap_or(Err(VerifyError::Recognition(RecognitionErrorCode::NoSpeech)))
        }

        fn release(&self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn gated_session() -> (
        Arc<VerificationSession<GatedCamera, ScriptedEngine>>,
        mpsc::Receiver<()>,
        mpsc::Sender<()>,
        Arc<AtomicUsize>,
    ) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (gate_tx, gate_rx) = mpsc::channel();
        let calls = Arc::new(AtomicUsize::new(0));
        let camera = GatedCamera {
            entered: Mutex::new(entered_tx),
            release_gate: Mutex::new(gate_rx),
            calls: Arc::clone(&calls),
        };
        let session = Arc::new(VerificationSession::new(camera, ScriptedEngine::silent()));
        (session, entered_rx, gate_tx, calls)
    }

    #[test]
    fn enroll_then_verify_same_face() {
        let camera = ScriptedCamera::new(vec![Ok(Some(face(&[0.1, 0.2, 0.3])))]);
        let session = VerificationSession::new(camera, ScriptedEngine::silent());

        assert_eq!(session.state(), SessionState::Idle);
        let enrolled = session.enroll_face().unwrap();
        assert_eq!(enrolled.as_slice(), &[0.1, 0.2, 0.3]);
        assert_eq!(session.state(), SessionState::Succeeded(CaptureKind::Face));

        let result = session.verify_enrolled().unwrap();
        assert!(result.verified);
        assert_eq!(result.confidence_display(), "100.0");
    }

    #[test]
    fn enroll_without_face_fails_and_frees_guard() {
        let session = VerificationSession::new(ScriptedCamera::new(vec![Ok(None)]), ScriptedEngine::silent());

        let err = session.enroll_face().unwrap_err();
        assert!(matches!(err, VerifyError::NoFaceDetected));
        assert!(!session.is_busy());
        assert_eq!(session.state(), SessionState::Failed(CaptureKind::Face));
        assert!(session.enrolled_descriptor().is_none());
    }

    #[test]
    fn verify_without_face_is_a_result() {
        let session = VerificationSession::new(ScriptedCamera::new(vec![Ok(None)]), ScriptedEngine::silent());
        let stored = FaceDescriptor::new(vec![0.5, 0.5]);

        let result = session.verify_face(&stored).unwrap();
        assert!(!result.verified);
        assert_eq!(result.error.as_deref(), Some("No face detected"));
    }

    #[test]
    fn verify_requires_enrollment() {
        let session = VerificationSession::new(ScriptedCamera::new(vec![]), ScriptedEngine::silent());
        assert!(matches!(session.verify_enrolled(), Err(VerifyError::NotEnrolled)));
    }

    #[test]
    fn detection_error_clears_guard() {
        let camera = ScriptedCamera::new(vec![
            Err(VerifyError::Detection("camera unplugged".into())),
            Ok(Some(face(&[1.0]))),
        ]);
        let session = VerificationSession::new(camera, ScriptedEngine::silent());

        assert!(matches!(session.detect_face(), Err(VerifyError::Detection(_))));
        assert!(!session.is_busy());
        assert_eq!(session.detect_face().unwrap(), FaceCapture::Face(face(&[1.0])));
    }

    #[test]
    fn busy_guard_skips_the_detector() {
        let (session, entered, gate, calls) = gated_session();

        let background = {
            let session = Arc::clone(&session);
            thread::spawn(move || session.detect_face())
        };
        entered.recv().unwrap();

        assert_eq!(session.state(), SessionState::Capturing(CaptureKind::Face));
        assert_eq!(session.detect_face().unwrap(), FaceCapture::Busy);
        assert!(matches!(session.enroll_face(), Err(VerifyError::CaptureInProgress)));
        assert!(matches!(session.listen_for_phrase(), Err(VerifyError::ListenInProgress)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        gate.send(()).unwrap();
        let first = background.join().unwrap().unwrap();
        assert!(matches!(first, FaceCapture::Face(_)));
        assert!(!session.is_busy());
    }

    #[test]
    fn listen_scores_latest_phrase() {
        let engine = ScriptedEngine::new(vec![Ok(Transcript::new("Hello my name is present now", 0.88))]);
        let session = VerificationSession::new(ScriptedCamera::new(vec![]), engine);

        session.set_challenge(ChallengePhrase::from_words(vec!["Hello", "my name is", "attending", "today"]));
        let result = session.listen_for_phrase().unwrap();

        assert_eq!(result.match_percentage, 50.0);
        assert!(!result.matched);
        assert_eq!(session.state(), SessionState::Failed(CaptureKind::Phrase));
    }

    #[test]
    fn listen_without_challenge_fails_fast() {
        let engine = ScriptedEngine::new(vec![Ok(Transcript::new("hello", 1.0))]);
        let session = VerificationSession::new(ScriptedCamera::new(vec![]), engine);

        assert!(matches!(session.listen_for_phrase(), Err(VerifyError::NoChallengeActive)));
        assert!(!session.is_busy());
    }

    #[test]
    fn recognition_errors_are_not_denials() {
        let engine = ScriptedEngine::new(vec![Err(VerifyError::Recognition(RecognitionErrorCode::NotAllowed))]);
        let session = VerificationSession::new(ScriptedCamera::new(vec![]), engine);
        session.new_challenge();

        let err = session.listen_for_phrase().unwrap_err();
        assert!(matches!(err, VerifyError::Recognition(RecognitionErrorCode::NotAllowed)));
        assert!(!session.is_busy());
    }

    #[test]
    fn new_challenge_replaces_previous() {
        let session = VerificationSession::new(ScriptedCamera::new(vec![]), ScriptedEngine::silent());
        assert!(session.current_challenge().is_none());

        let phrase = session.new_challenge();
        assert_eq!(session.current_challenge(), Some(phrase));
    }

    #[test]
    fn continuous_detection_delivers_until_stopped() {
        let camera = ScriptedCamera::new(vec![Ok(Some(face(&[0.4, 0.4])))]);
        let calls = Arc::clone(&camera.calls);
        let session = Arc::new(VerificationSession::new(camera, ScriptedEngine::silent()));

        let (tx, rx) = mpsc::channel();
        let handle = session
            .start_continuous_detection(Some(Duration::from_millis(10)), move |result| {
                let _ = tx.send(result);
            })
            .unwrap();

        for _ in 0..2 {
            let delivered = rx.recv_timeout(Duration::from_secs(2)).unwrap();
            assert!(delivered.unwrap().is_some());
        }

        session.stop_continuous_detection(&handle);
        handle.join();
        assert!(handle.is_stopped());
        assert!(calls.load(Ordering::SeqCst) >= 2);

        // stopping again, or after the worker is gone, is fine
        handle.stop();
        session.stop_continuous_detection(&handle);
        handle.join();
    }

    #[test]
    fn stop_suppresses_in_flight_result() {
        let (session, entered, gate, _calls) = gated_session();
        let (tx, rx) = mpsc::channel();

        let handle = session
            .start_continuous_detection(Some(Duration::from_millis(5)), move |result| {
                let _ = tx.send(result);
            })
            .unwrap();

        entered.recv_timeout(Duration::from_secs(2)).unwrap();
        handle.stop();
        gate.send(()).unwrap();
        handle.join();

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert!(!session.is_busy());
    }

    #[test]
    fn missed_ticks_are_dropped_not_replayed() {
        let (session, entered, gate, calls) = gated_session();
        let (tx, rx) = mpsc::channel();

        // A manual capture holds the sensors
        let manual = {
            let session = Arc::clone(&session);
            thread::spawn(move || session.detect_face())
        };
        entered.recv_timeout(Duration::from_secs(2)).unwrap();

        let handle = session
            .start_continuous_detection(Some(Duration::from_millis(5)), move |result| {
                let _ = tx.send(result);
            })
            .unwrap();

        thread::sleep(Duration::from_millis(60));
        assert_eq!(calls.load(Ordering::SeqCst), 1, "busy ticks must not reach the camera");
        assert!(rx.try_recv().is_err(), "busy ticks must not deliver");

        gate.send(()).unwrap();
        assert!(matches!(manual.join().unwrap().unwrap(), FaceCapture::Face(_)));

        // The worker's own capture now overruns about a dozen ticks
        entered.recv_timeout(Duration::from_secs(2)).unwrap();
        thread::sleep(Duration::from_millis(60));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // Closing the gate channel lets every later capture return at once
        drop(gate);
        rx.recv_timeout(Duration::from_secs(2)).unwrap().unwrap();
        thread::sleep(Duration::from_millis(20));
        handle.join();

        let delivered = 1 + rx.try_iter().count();
        assert!(delivered <= 8, "overrun ticks were replayed: {} deliveries", delivered);
        assert!(calls.load(Ordering::SeqCst) <= 2 + 8);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let session = Arc::new(VerificationSession::new(ScriptedCamera::new(vec![]), ScriptedEngine::silent()));
        let err = session
            .start_continuous_detection(Some(Duration::ZERO), |_| {})
            .unwrap_err();
        assert!(matches!(err, VerifyError::InvalidInput(_)));
    }

    #[test]
    fn close_releases_each_device_once() {
        let camera = ScriptedCamera::new(vec![]);
        let engine = ScriptedEngine::silent();
        let camera_releases = Arc::clone(&camera.releases);
        let engine_releases = Arc::clone(&engine.releases);

        let session = VerificationSession::new(camera, engine);
        session.close();
        session.close();
        assert!(matches!(session.detect_face(), Err(VerifyError::SessionClosed)));
        drop(session);

        assert_eq!(camera_releases.load(Ordering::SeqCst), 1);
        assert_eq!(engine_releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_releases_devices() {
        let camera = ScriptedCamera::new(vec![]);
        let releases = Arc::clone(&camera.releases);
        drop(VerificationSession::new(camera, ScriptedEngine::silent()));
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }
}
