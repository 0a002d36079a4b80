//! Translation client: the single entry point of the translation service.
//! Per call: cache check → (hit) return, or
//! rate-limit → protect → dispatch with retry → restore → glossary → cache store.

use std::path::Path;
use std::sync::Arc;

use futures_util::future::{try_join_all, BoxFuture};
use futures_util::FutureExt;
use parking_lot::RwLock;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::cache::{CacheKey, CacheStore};
use super::dispatch::{AsyncDispatcher, RemoteCall, RemoteReply};
use super::glossary::{Glossary, GlossaryError};
use super::limiter::RateLimiter;
use super::protect::TextProtector;
use super::provider::{HttpProvider, TranslationProvider};
use super::retry::{run_with_backoff, RetryPolicy};
use super::{
    validate_language_tag, LanguagePair, TranslateCall, TranslateError, TranslateOptions, AUTO_LANG,
};
use crate::config::{ConfigError, TranslatorConfig};
use crate::metrics::{metric_names, MetricsRegistry};

pub struct TranslationClient {
    languages: RwLock<LanguagePair>,
    batch_size: usize,
    retry: RetryPolicy,
    protector: TextProtector,
    glossary: RwLock<Glossary>,
    cache: CacheStore,
    limiter: RateLimiter,
    dispatcher: AsyncDispatcher,
    metrics: Arc<MetricsRegistry>,
    cancel: CancellationToken,
}

impl TranslationClient {
    /// Build a client around `provider`. Must run inside a Tokio runtime.
    pub fn new(config: &TranslatorConfig, provider: Arc<dyn TranslationProvider>) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            languages: RwLock::new(LanguagePair {
                source: config.source_lang.clone(),
                target: config.target_lang.clone(),
            }),
            batch_size: config.batch_size,
            retry: config.retry.policy(),
            protector: TextProtector::new(),
            glossary: RwLock::new(Glossary::empty()),
            cache: CacheStore::new(config.cache.path.clone(), config.cache.hot_capacity),
            limiter: RateLimiter::new(
                config.rate_limit.mode,
                config.rate_limit.capacity,
                config.rate_limit.refill_interval(),
            ),
            dispatcher: AsyncDispatcher::new(provider, config.dispatch.mode, config.dispatch.queue_capacity),
            metrics: Arc::new(MetricsRegistry::new()),
            cancel: CancellationToken::new(),
        })
    }

    /// Build a client that talks to the configured HTTP provider.
    pub fn from_config(config: &TranslatorConfig) -> Result<Self, ConfigError> {
        let provider = HttpProvider::new(&config.api)?;
        Self::new(config, Arc::new(provider))
    }

    /// Open the cache eagerly. Operations open it on first use otherwise.
    pub async fn init(&self) -> Result<(), TranslateError> {
        self.cache.init().await?;
        let persistent = self.cache.is_persistent().await?;
        info!(persistent, mode = ?self.limiter.mode(), "translation client ready");
        Ok(())
    }

    // --- Translation ---

    /// Translate one utterance with the active language pair.
    pub async fn translate(&self, text: &str, options: &TranslateOptions) -> Result<String, TranslateError> {
        let result = self.translate_inner(text, options).await;
        if let Err(ref e) = result {
            self.metrics.increment(metric_names::TRANSLATE_FAILED);
            warn!(error = %e, "translation failed");
        }
        result
    }

    async fn translate_inner(&self, text: &str, options: &TranslateOptions) -> Result<String, TranslateError> {
        let normalized = self.protector.normalize_whitespace(text);
        if normalized.is_empty() {
            return Ok(String::new());
        }

        let cancel = self.cancel_for(options);
        let span = self.metrics.span(metric_names::TRANSLATE_DONE);
        let LanguagePair { source, target } = self.languages();
        let glossary = options
            .apply_glossary
            .then(|| self.glossary.read().fingerprint().to_string());
        let key = CacheKey::new(&source, &target, glossary.as_deref(), &normalized);

        let lookup = self.metrics.span(metric_names::CACHE_LOOKUP);
        let cached = self.cache.get(&key).await?;
        lookup.finish();
        if let Some(hit) = cached {
            self.metrics.increment(metric_names::CACHE_HIT);
            debug!(source = %source, target = %target, "cache hit");
            return Ok(hit);
        }
        self.metrics.increment(metric_names::CACHE_MISS);

        self.admit(&cancel).await?;
        let protected = self.protector.protect(&normalized);

        let source_lang = if options.detect_source && source == AUTO_LANG {
            self.detect_remote(&normalized, &cancel).await?
        } else {
            source.clone()
        };

        let call = TranslateCall {
            texts: vec![protected.masked_text.clone()],
            source_lang,
            target_lang: target.clone(),
            format: options.format,
        };
        let translated = self
            .dispatch_translate(call, &cancel)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| TranslateError::UnexpectedResponseShape("empty translation list".into()))?;

        let mut output = self.protector.restore(&translated, &protected);
        let mut cacheable = true;
        if options.apply_glossary {
            let current = self.glossary.read();
            output = current.apply(&output);
            cacheable = glossary.as_deref() == Some(current.fingerprint());
        }

        if cacheable {
            self.cache.set(&key, &output).await?;
        } else {
            debug!("glossary changed during the call, result not cached");
        }
        let elapsed_ms = span.finish();
        debug!(source = %source, target = %target, elapsed_ms, "translated");
        Ok(output)
    }

    /// Translate many texts in provider-sized batches, one rate-limit token and
    /// one retried remote call per batch. The result has exactly `texts.len()`
    /// entries in input order. A batch reply with surplus entries is truncated;
    /// a batch reply with too few entries fails with `UnexpectedResponseShape`
    /// instead of being padded, so callers never receive filler translations.
    pub async fn batch_translate<S: AsRef<str>>(
        &self,
        texts: &[S],
        options: &TranslateOptions,
    ) -> Result<Vec<String>, TranslateError> {
        let cancel = self.cancel_for(options);
        let span = self.metrics.span(metric_names::BATCH_DONE);
        let LanguagePair { source, target } = self.languages();
        let mut results = Vec::with_capacity(texts.len());

        for (index, chunk) in texts.chunks(self.batch_size).enumerate() {
            self.admit(&cancel).await?;

            let call = TranslateCall {
                texts: chunk.iter().map(|t| t.as_ref().to_string()).collect(),
                source_lang: source.clone(),
                target_lang: target.clone(),
                format: options.format,
            };
            let mut translated = self.dispatch_translate(call, &cancel).await?;

            if translated.len() < chunk.len() {
                return Err(TranslateError::UnexpectedResponseShape(format!(
                    "batch {index}: expected {} translations, got {}",
                    chunk.len(),
                    translated.len()
                )));
            }
            if translated.len() > chunk.len() {
                warn!(batch = index, expected = chunk.len(), got = translated.len(), "provider returned extra translations, truncating");
                translated.truncate(chunk.len());
            }
            results.extend(translated);
        }

        if options.apply_glossary {
            let glossary = self.glossary.read();
            for text in &mut results {
                *text = glossary.apply(text);
            }
        }

        let elapsed_ms = span.finish();
        debug!(count = results.len(), elapsed_ms, "batch translated");
        Ok(results)
    }

    /// Ask the provider for the most probable language of `text`.
    pub async fn detect_language(&self, text: &str) -> Result<String, TranslateError> {
        let cancel = self.cancel.child_token();
        self.admit(&cancel).await?;
        self.detect_remote(text, &cancel).await
    }

    /// Translate every string leaf of a JSON value. Object keys, numbers,
    /// booleans and nulls pass through; array elements run concurrently.
    pub fn translate_json<'a>(
        &'a self,
        value: &'a Value,
        options: &'a TranslateOptions,
    ) -> BoxFuture<'a, Result<Value, TranslateError>> {
        async move {
            match value {
                Value::String(text) => Ok(Value::String(self.translate(text, options).await?)),
                Value::Array(items) => {
                    let translated =
                        try_join_all(items.iter().map(|item| self.translate_json(item, options))).await?;
                    Ok(Value::Array(translated))
                }
                Value::Object(map) => {
                    let mut out = serde_json::Map::with_capacity(map.len());
                    for (key, item) in map {
                        out.insert(key.clone(), self.translate_json(item, options).await?);
                    }
                    Ok(Value::Object(out))
                }
                other => Ok(other.clone()),
            }
        }
        .boxed()
    }

    // --- Remote calls ---

    async fn dispatch_translate(
        &self,
        call: TranslateCall,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, TranslateError> {
        let mut attempt = 0u32;
        run_with_backoff(&self.retry, cancel, move || {
            self.count_retry(&mut attempt);
            let remote = RemoteCall::Translate(call.clone());
            async move {
                match self.remote(remote, cancel).await? {
                    RemoteReply::Translations(texts) => Ok(texts),
                    other => Err(TranslateError::UnexpectedResponseShape(format!("{other:?}"))),
                }
            }
        })
        .await
    }

    async fn detect_remote(&self, text: &str, cancel: &CancellationToken) -> Result<String, TranslateError> {
        let mut attempt = 0u32;
        run_with_backoff(&self.retry, cancel, move || {
            self.count_retry(&mut attempt);
            let remote = RemoteCall::DetectLanguage { text: text.to_string() };
            async move {
                match self.remote(remote, cancel).await? {
                    RemoteReply::Language(tag) => Ok(tag),
                    other => Err(TranslateError::UnexpectedResponseShape(format!("{other:?}"))),
                }
            }
        })
        .await
    }

    /// Take a rate-limit token, counting calls that had to wait and strict denials.
    async fn admit(&self, cancel: &CancellationToken) -> Result<(), TranslateError> {
        if self.limiter.try_acquire().is_ok() {
            return Ok(());
        }
        let result = self.limiter.acquire(cancel).await;
        match result {
            Err(TranslateError::RateLimitExceeded) => {
                self.metrics.increment(metric_names::RATE_LIMIT_DENIED)
            }
            _ => self.metrics.increment(metric_names::RATE_LIMIT_WAITS),
        }
        result
    }

    fn count_retry(&self, attempt: &mut u32) {
        if *attempt > 0 {
            self.metrics.increment(metric_names::RETRIES);
        }
        *attempt += 1;
    }

    /// One attempt across the dispatch boundary.
    async fn remote(&self, call: RemoteCall, cancel: &CancellationToken) -> Result<RemoteReply, TranslateError> {
        let span = self.metrics.span(metric_names::REMOTE_CALL);
        self.metrics.increment(metric_names::REMOTE_CALLS);

        let rx = self.dispatcher.dispatch(AsyncDispatcher::next_id(), call).await?;
        let result = tokio::select! {
            outcome = rx => outcome
                .map_err(|_| TranslateError::Network("dispatch result dropped".into()))
                .and_then(|r| r),
            _ = cancel.cancelled() => Err(TranslateError::Cancelled),
        };
        span.finish();
        result
    }

    // --- Settings ---

    pub fn languages(&self) -> LanguagePair {
        self.languages.read().clone()
    }

    pub fn set_source_language(&self, lang: &str) -> Result<(), TranslateError> {
        validate_language_tag(lang, true)?;
        self.languages.write().source = lang.to_string();
        info!(source = lang, "source language set");
        Ok(())
    }

    pub fn set_target_language(&self, lang: &str) -> Result<(), TranslateError> {
        validate_language_tag(lang, false)?;
        self.languages.write().target = lang.to_string();
        info!(target = lang, "target language set");
        Ok(())
    }

    /// Drop every cached translation.
    pub async fn clear_cache(&self) -> Result<(), TranslateError> {
        self.cache.clear().await
    }

    // --- Glossary ---

    pub fn add_glossary_term(&self, term: &str, translation: &str) -> Result<(), TranslateError> {
        self.glossary
            .write()
            .add_term(term, translation)
            .map_err(|e| TranslateError::InvalidInput(e.to_string()))
    }

    /// Replace the glossary with the contents of a JSON file.
    pub fn load_glossary(&self, path: &Path) -> Result<(), GlossaryError> {
        let loaded = Glossary::load_from_file(path)?;
        if loaded.is_empty() {
            warn!(path = %path.display(), "glossary file has no entries");
        }
        info!(path = %path.display(), terms = loaded.len(), version = loaded.version(), "glossary loaded");
        *self.glossary.write() = loaded;
        Ok(())
    }

    pub fn apply_glossary(&self, text: &str) -> String {
        self.glossary.read().apply(text)
    }

    // --- Lifecycle ---

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn pending_requests(&self) -> usize {
        self.dispatcher.pending_count()
    }

    /// Token that, once cancelled, aborts every wait inside this client.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// A token cancelled together with the client, usable per call.
    pub fn child_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Abort all in-flight rate-limit waits, backoffs and pending dispatches.
    pub fn shutdown(&self) {
        info!("translation client shutting down");
        self.cancel.cancel();
    }

    fn cancel_for(&self, options: &TranslateOptions) -> CancellationToken {
        options
            .cancel
            .clone()
            .unwrap_or_else(|| self.cancel.child_token())
    }
}
