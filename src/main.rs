//! `tolk` binary: each stdin line is treated as a final transcript, translated
//! through the pipeline and printed.
//!
//! Usage: `tolk [--json-logs] [config.json]`

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use tolk::pipeline::{
    AudioSource, PipelineError, PipelineEvent, RecognizerEvent, RecognizerState, SpeechRecognizer,
    TranscriptEvent,
};
use tolk::{init_tracing, TranslationClient, TranslationPipeline, TranslatorConfig};

/// Text input has no audio to capture.
struct NoAudio;

impl AudioSource for NoAudio {
    fn start(&self) -> Result<(), PipelineError> {
        Ok(())
    }

    fn stop(&self) {}
}

/// Reads lines from stdin; every non-empty line is a final transcript.
#[derive(Default)]
struct StdinRecognizer {
    cancel: Mutex<Option<CancellationToken>>,
}

impl SpeechRecognizer for StdinRecognizer {
    fn start(&self, events: mpsc::UnboundedSender<RecognizerEvent>) -> Result<(), PipelineError> {
        let cancel = CancellationToken::new();
        *self.cancel.lock() = Some(cancel.clone());

        tokio::spawn(async move {
            let _ = events.send(RecognizerEvent::StateChanged(RecognizerState::Listening));
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            let mut line_no = 0u64;
            loop {
                let line = tokio::select! {
                    _ = cancel.cancelled() => break,
                    line = lines.next_line() => line,
                };
                match line {
                    Ok(Some(text)) if text.trim().is_empty() => {}
                    Ok(Some(text)) => {
                        line_no += 1;
                        let event = RecognizerEvent::Transcript(TranscriptEvent {
                            text,
                            session_id: format!("line-{line_no}"),
                            is_final: true,
                        });
                        if events.send(event).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = events.send(RecognizerEvent::Error(e.to_string()));
                        break;
                    }
                }
            }
            let _ = events.send(RecognizerEvent::StateChanged(RecognizerState::Stopped));
        });
        Ok(())
    }

    fn stop(&self) {
        if let Some(cancel) = self.cancel.lock().take() {
            cancel.cancel();
        }
    }
}

#[tokio::main]
async fn main() {
    let mut json_logs = false;
    let mut config_path: Option<PathBuf> = None;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--json-logs" => json_logs = true,
            _ => config_path = Some(PathBuf::from(arg)),
        }
    }
    init_tracing(json_logs);

    if let Err(e) = run(config_path).await {
        error!(error = %e, "tolk failed");
        std::process::exit(1);
    }
}

async fn run(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match config_path {
        Some(ref path) => TranslatorConfig::load_from_file(path)?,
        None => TranslatorConfig::default(),
    };
    config.apply_env()?;

    let client = Arc::new(TranslationClient::from_config(&config)?);
    client.init().await?;

    let pipeline = TranslationPipeline::new(
        Arc::clone(&client),
        Arc::new(NoAudio),
        Arc::new(StdinRecognizer::default()),
        None,
    );
    let mut events = pipeline.subscribe();
    pipeline.start()?;

    let languages = pipeline.languages();
    info!(source = %languages.source, target = %languages.target, "reading transcripts from stdin");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(PipelineEvent::Translated { translated, .. }) => println!("{translated}"),
                Ok(PipelineEvent::TranslationFailed { session_id, error, .. }) => {
                    eprintln!("{session_id}: {error}");
                }
                Ok(PipelineEvent::RecognizerStateChanged { state: RecognizerState::Stopped }) => break,
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "output fell behind"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    pipeline.stop();
    let summary = serde_json::to_string(&client.metrics().summary())?;
    info!(%summary, "metrics");
    Ok(())
}
