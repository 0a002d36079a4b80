//! Live conversation pipeline: audio → recognizer → translation client → synthesizer.
//! Audio capture, recognition and synthesis are host collaborators behind traits;
//! recognizer callbacks arrive on an mpsc channel and results leave on a broadcast.
//!
//! Final transcripts are translated one at a time in arrival order. Interim
//! transcripts are ignored.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::translate::{LanguagePair, TranslateError, TranslateOptions, TranslationClient};

const EVENT_BUFFER: usize = 64;

/// Microphone or tab capture.
pub trait AudioSource: Send + Sync {
    fn start(&self) -> Result<(), PipelineError>;
    fn stop(&self);
}

/// Continuous speech recognition. Events go to `events` until `stop`.
pub trait SpeechRecognizer: Send + Sync {
    fn start(&self, events: mpsc::UnboundedSender<RecognizerEvent>) -> Result<(), PipelineError>;
    fn stop(&self);
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn speak(&self, text: &str, lang: &str) -> Result<(), PipelineError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEvent {
    pub text: String,
    pub session_id: String,
    pub is_final: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecognizerState {
    Listening,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognizerEvent {
    Transcript(TranscriptEvent),
    StateChanged(RecognizerState),
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineEvent {
    Translated {
        session_id: String,
        source: String,
        translated: String,
    },
    TranslationFailed {
        session_id: String,
        source: String,
        error: String,
    },
    SpeechFailed {
        session_id: String,
        error: String,
    },
    RecognizerStateChanged {
        state: RecognizerState,
    },
    RecognizerError {
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    Idle,
    Running,
}

#[derive(Debug)]
pub enum PipelineError {
    Audio(String),
    Recognizer(String),
    Synthesis(String),
    Translate(TranslateError),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::Audio(msg) => write!(f, "audio source error: {msg}"),
            PipelineError::Recognizer(msg) => write!(f, "speech recognizer error: {msg}"),
            PipelineError::Synthesis(msg) => write!(f, "speech synthesis error: {msg}"),
            PipelineError::Translate(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<TranslateError> for PipelineError {
    fn from(e: TranslateError) -> Self {
        PipelineError::Translate(e)
    }
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct TranslationPipeline {
    client: Arc<TranslationClient>,
    audio: Arc<dyn AudioSource>,
    recognizer: Arc<dyn SpeechRecognizer>,
    synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    options: TranslateOptions,
    events_tx: broadcast::Sender<PipelineEvent>,
    state_tx: watch::Sender<PipelineState>,
    running: Mutex<Option<Running>>,
}

impl TranslationPipeline {
    pub fn new(
        client: Arc<TranslationClient>,
        audio: Arc<dyn AudioSource>,
        recognizer: Arc<dyn SpeechRecognizer>,
        synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_BUFFER);
        let (state_tx, _) = watch::channel(PipelineState::Idle);
        Self {
            client,
            audio,
            recognizer,
            synthesizer,
            options: TranslateOptions::default(),
            events_tx,
            state_tx,
            running: Mutex::new(None),
        }
    }

    /// Options used for every transcript. The cancel field is managed by the pipeline.
    pub fn with_options(mut self, options: TranslateOptions) -> Self {
        self.options = options;
        self
    }

    /// Start audio, then recognition, then the processing loop. No-op when running.
    pub fn start(&self) -> Result<(), PipelineError> {
        let mut running = self.running.lock();
        if running.is_some() {
            debug!("pipeline already running");
            return Ok(());
        }

        self.audio.start()?;
        let (tx, rx) = mpsc::unbounded_channel();
        if let Err(e) = self.recognizer.start(tx) {
            self.audio.stop();
            return Err(e);
        }

        let cancel = self.client.child_token();
        let worker = Worker {
            client: Arc::clone(&self.client),
            synthesizer: self.synthesizer.clone(),
            options: TranslateOptions {
                cancel: Some(cancel.clone()),
                ..self.options.clone()
            },
            events_tx: self.events_tx.clone(),
        };
        let task = tokio::spawn(worker.run(rx, cancel.clone()));
        *running = Some(Running { cancel, task });

        self.state_tx.send_replace(PipelineState::Running);
        info!("pipeline started");
        Ok(())
    }

    /// Stop recognition and audio and abandon in-flight translation. No-op when idle.
    pub fn stop(&self) {
        let Some(run) = self.running.lock().take() else {
            debug!("pipeline already stopped");
            return;
        };

        self.recognizer.stop();
        self.audio.stop();
        run.cancel.cancel();
        drop(run.task);

        self.state_tx.send_replace(PipelineState::Idle);
        info!("pipeline stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    pub fn state(&self) -> PipelineState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<PipelineState> {
        self.state_tx.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events_tx.subscribe()
    }

    pub fn set_source_language(&self, lang: &str) -> Result<(), PipelineError> {
        Ok(self.client.set_source_language(lang)?)
    }

    pub fn set_target_language(&self, lang: &str) -> Result<(), PipelineError> {
        Ok(self.client.set_target_language(lang)?)
    }

    pub fn languages(&self) -> LanguagePair {
        self.client.languages()
    }

    pub fn client(&self) -> &Arc<TranslationClient> {
        &self.client
    }
}

impl Drop for TranslationPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker {
    client: Arc<TranslationClient>,
    synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    options: TranslateOptions,
    events_tx: broadcast::Sender<PipelineEvent>,
}

impl Worker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<RecognizerEvent>, cancel: CancellationToken) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            match event {
                RecognizerEvent::Transcript(t) if t.is_final => self.handle_final(t).await,
                RecognizerEvent::Transcript(_) => {}
                RecognizerEvent::StateChanged(state) => {
                    debug!(?state, "recognizer state changed");
                    self.emit(PipelineEvent::RecognizerStateChanged { state });
                }
                RecognizerEvent::Error(message) => {
                    warn!(%message, "recognizer error");
                    self.emit(PipelineEvent::RecognizerError { message });
                }
            }
        }
        debug!("pipeline loop exited");
    }

    async fn handle_final(&self, transcript: TranscriptEvent) {
        let TranscriptEvent { text, session_id, .. } = transcript;

        let translated = match self.client.translate(&text, &self.options).await {
            Ok(translated) => translated,
            Err(TranslateError::Cancelled) => return,
            Err(e) => {
                self.emit(PipelineEvent::TranslationFailed {
                    session_id,
                    source: text,
                    error: e.to_string(),
                });
                return;
            }
        };
        if translated.is_empty() {
            return;
        }

        self.emit(PipelineEvent::Translated {
            session_id: session_id.clone(),
            source: text,
            translated: translated.clone(),
        });

        if let Some(ref synthesizer) = self.synthesizer {
            let lang = self.client.languages().target;
            if let Err(e) = synthesizer.speak(&translated, &lang).await {
                warn!(error = %e, "speech synthesis failed");
                self.emit(PipelineEvent::SpeechFailed {
                    session_id,
                    error: e.to_string(),
                });
            }
        }
    }

    fn emit(&self, event: PipelineEvent) {
        // No subscribers is fine.
        let _ = self.events_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TranslatorConfig;
    use crate::translate::limiter::RateLimitMode;
    use crate::translate::provider::TranslationProvider;
    use crate::translate::TranslateCall;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct TagProvider;

    #[async_trait]
    impl TranslationProvider for TagProvider {
        async fn translate(&self, call: &TranslateCall) -> Result<Vec<String>, TranslateError> {
            call.texts
                .iter()
                .map(|t| {
                    if t == "boom" {
                        Err(TranslateError::UnexpectedResponseShape("boom".into()))
                    } else {
                        Ok(format!("{} {}", call.target_lang, t))
                    }
                })
                .collect()
        }

        async fn detect_language(&self, _text: &str) -> Result<String, TranslateError> {
            Ok("en".into())
        }
    }

    #[derive(Default)]
    struct FakeAudio {
        starts: AtomicUsize,
        stops: AtomicUsize,
    }

    impl AudioSource for FakeAudio {
        fn start(&self) -> Result<(), PipelineError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct FakeRecognizer {
        events: Mutex<Option<mpsc::UnboundedSender<RecognizerEvent>>>,
        fail_start: bool,
    }

    impl FakeRecognizer {
        fn say(&self, text: &str, is_final: bool) {
            let tx = self.events.lock().clone().unwrap();
            tx.send(RecognizerEvent::Transcript(TranscriptEvent {
                text: text.into(),
                session_id: "s1".into(),
                is_final,
            }))
            .unwrap();
        }
    }

    impl SpeechRecognizer for FakeRecognizer {
        fn start(&self, events: mpsc::UnboundedSender<RecognizerEvent>) -> Result<(), PipelineError> {
            if self.fail_start {
                return Err(PipelineError::Recognizer("no microphone permission".into()));
            }
            *self.events.lock() = Some(events);
            Ok(())
        }

        fn stop(&self) {
            self.events.lock().take();
        }
    }

    struct FakeSynth {
        spoken: mpsc::UnboundedSender<(String, String)>,
    }

    #[async_trait]
    impl SpeechSynthesizer for FakeSynth {
        async fn speak(&self, text: &str, lang: &str) -> Result<(), PipelineError> {
            if text.contains("mute") {
                return Err(PipelineError::Synthesis("voice unavailable".into()));
            }
            let _ = self.spoken.send((text.to_string(), lang.to_string()));
            Ok(())
        }
    }

    fn client() -> Arc<TranslationClient> {
        let mut config = TranslatorConfig::default();
        config.target_lang = "fr".into();
        config.rate_limit.mode = RateLimitMode::Disabled;
        config.retry.base_delay_ms = 0;
        Arc::new(TranslationClient::new(&config, Arc::new(TagProvider)).unwrap())
    }

    async fn next_event(rx: &mut broadcast::Receiver<PipelineEvent>) -> PipelineEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no pipeline event")
            .unwrap()
    }

    #[tokio::test]
    async fn only_final_transcripts_are_translated_and_spoken() {
        let audio = Arc::new(FakeAudio::default());
        let recognizer = Arc::new(FakeRecognizer::default());
        let (spoken_tx, mut spoken_rx) = mpsc::unbounded_channel();
        let pipeline = TranslationPipeline::new(
            client(),
            audio.clone(),
            recognizer.clone(),
            Some(Arc::new(FakeSynth { spoken: spoken_tx })),
        );
        let mut events = pipeline.subscribe();

        pipeline.start().unwrap();
        recognizer.say("hello there", false);
        recognizer.say("hello there friend", true);

        assert_eq!(
            next_event(&mut events).await,
            PipelineEvent::Translated {
                session_id: "s1".into(),
                source: "hello there friend".into(),
                translated: "fr hello there friend".into(),
            }
        );
        assert_eq!(
            spoken_rx.recv().await.unwrap(),
            ("fr hello there friend".to_string(), "fr".to_string())
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let audio = Arc::new(FakeAudio::default());
        let recognizer = Arc::new(FakeRecognizer::default());
        let pipeline = TranslationPipeline::new(client(), audio.clone(), recognizer.clone(), None);
        let state = pipeline.subscribe_state();

        pipeline.start().unwrap();
        pipeline.start().unwrap();
        assert_eq!(audio.starts.load(Ordering::SeqCst), 1);
        assert_eq!(*state.borrow(), PipelineState::Running);

        pipeline.stop();
        pipeline.stop();
        assert_eq!(audio.stops.load(Ordering::SeqCst), 1);
        assert_eq!(pipeline.state(), PipelineState::Idle);
        assert!(!pipeline.is_running());
    }

    #[tokio::test]
    async fn recognizer_failure_releases_audio() {
        let audio = Arc::new(FakeAudio::default());
        let recognizer = Arc::new(FakeRecognizer {
            fail_start: true,
            ..Default::default()
        });
        let pipeline = TranslationPipeline::new(client(), audio.clone(), recognizer, None);

        assert!(matches!(pipeline.start(), Err(PipelineError::Recognizer(_))));
        assert_eq!(audio.stops.load(Ordering::SeqCst), 1);
        assert_eq!(pipeline.state(), PipelineState::Idle);
    }

    #[tokio::test]
    async fn failures_are_broadcast() {
        let recognizer = Arc::new(FakeRecognizer::default());
        let (spoken_tx, _spoken_rx) = mpsc::unbounded_channel();
        let pipeline = TranslationPipeline::new(
            client(),
            Arc::new(FakeAudio::default()),
            recognizer.clone(),
            Some(Arc::new(FakeSynth { spoken: spoken_tx })),
        );
        let mut events = pipeline.subscribe();
        pipeline.start().unwrap();

        recognizer.say("boom", true);
        match next_event(&mut events).await {
            PipelineEvent::TranslationFailed { source, error, .. } => {
                assert_eq!(source, "boom");
                assert!(error.contains("unexpected API response"));
            }
            other => panic!("unexpected event: {other:?}"),
        }

        recognizer.say("mute me", true);
        assert!(matches!(next_event(&mut events).await, PipelineEvent::Translated { .. }));
        assert!(matches!(next_event(&mut events).await, PipelineEvent::SpeechFailed { .. }));
    }

    #[tokio::test]
    async fn language_changes_reach_the_client() {
        let recognizer = Arc::new(FakeRecognizer::default());
        let pipeline =
            TranslationPipeline::new(client(), Arc::new(FakeAudio::default()), recognizer.clone(), None);
        let mut events = pipeline.subscribe();

        pipeline.set_target_language("de").unwrap();
        assert!(pipeline.set_target_language("auto").is_err());
        assert_eq!(pipeline.languages().target, "de");

        pipeline.start().unwrap();
        recognizer.say("good morning", true);
        match next_event(&mut events).await {
            PipelineEvent::Translated { translated, .. } => assert_eq!(translated, "de good morning"),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
