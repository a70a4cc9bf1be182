//! Batched subtitle translation.
//!
//! Text is queued on a worker that flushes a batch when it reaches
//! `batch_size` entries or `batch_window_ms` after the first entry arrived.
//! The endpoint speaks a DeepL-style JSON API:
//! `{"text": [...], "target_lang": "..."}` answered by
//! `{"translations": [{"text": "..."}]}`. Results are kept in an LRU cache;
//! whenever a batch fails the original text is returned.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use ds_core::config::TranslatorConfig;
use ds_core::{Error, Result};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

type Cache = Arc<Mutex<LruCache<String, String>>>;

struct Job {
    text: String,
    reply: oneshot::Sender<String>,
}

#[derive(Serialize)]
struct TranslateRequest<'a> {
    text: Vec<&'a str>,
    target_lang: &'a str,
}

#[derive(Deserialize)]
struct TranslateResponse {
    translations: Vec<Translation>,
}

#[derive(Deserialize)]
struct Translation {
    text: String,
}

pub struct Translator {
    target_language: String,
    cache: Cache,
    jobs: mpsc::Sender<Job>,
}

impl Translator {
    /// Start the batching worker. `None` when translation is disabled or no
    /// endpoint is configured. Must be called inside a tokio runtime.
    pub fn spawn(config: &TranslatorConfig, client: reqwest::Client) -> Option<Arc<Self>> {
        if !config.enabled || config.batch_size == 0 {
            return None;
        }
        let url = config.api_url.clone()?;
        let capacity = NonZeroUsize::new(config.cache_size).unwrap_or(NonZeroUsize::MIN);
        let cache: Cache = Arc::new(Mutex::new(LruCache::new(capacity)));
        let (jobs, rx) = mpsc::channel(config.batch_size * 4);

        let worker = Worker {
            client,
            url,
            api_key: config.api_key.clone(),
            target_language: config.target_language.clone(),
            batch_size: config.batch_size,
            window: Duration::from_millis(config.batch_window_ms),
            cache: cache.clone(),
        };
        tokio::spawn(worker.run(rx));

        Some(Arc::new(Self {
            target_language: config.target_language.clone(),
            cache,
            jobs,
        }))
    }

    pub fn target_language(&self) -> &str {
        &self.target_language
    }

    /// Whether text in `language` should be translated.
    pub fn wants(&self, language: &str) -> bool {
        !language.is_empty()
            && !language.eq_ignore_ascii_case("und")
            && !language.eq_ignore_ascii_case(&self.target_language)
    }

    /// Translated text, or `text` itself when translation fails.
    pub async fn translate(&self, text: String) -> String {
        if text.trim().is_empty() {
            return text;
        }
        if let Some(hit) = self.cache.lock().get(&text) {
            return hit.clone();
        }
        let (reply, rx) = oneshot::channel();
        if self
            .jobs
            .send(Job {
                text: text.clone(),
                reply,
            })
            .await
            .is_err()
        {
            return text;
        }
        rx.await.unwrap_or(text)
    }
}

struct Worker {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    target_language: String,
    batch_size: usize,
    window: Duration,
    cache: Cache,
}

impl Worker {
    async fn run(self, mut rx: mpsc::Receiver<Job>) {
        while let Some(first) = rx.recv().await {
            let mut batch = vec![first];
            let deadline = Instant::now() + self.window;
            while batch.len() < self.batch_size {
                match tokio::time::timeout_at(deadline, rx.recv()).await {
                    Ok(Some(job)) => batch.push(job),
                    Ok(None) | Err(_) => break,
                }
            }
            self.flush(batch).await;
        }
        debug!("Translator worker stopped");
    }

    async fn flush(&self, batch: Vec<Job>) {
        let texts: Vec<&str> = batch.iter().map(|j| j.text.as_str()).collect();
        let translated = match self.request(&texts).await {
            Ok(translated) => translated,
            Err(e) => {
                warn!(error = %e, count = batch.len(), "Translation batch failed");
                texts.iter().map(|t| t.to_string()).collect()
            }
        };
        let mut cache = self.cache.lock();
        for (job, text) in batch.into_iter().zip(translated) {
            if text != job.text {
                cache.put(job.text.clone(), text.clone());
            }
            let _ = job.reply.send(text);
        }
    }

    async fn request(&self, texts: &[&str]) -> Result<Vec<String>> {
        let mut request = self
            .client
            .post(&self.url)
            .timeout(REQUEST_TIMEOUT)
            .json(&TranslateRequest {
                text: texts.to_vec(),
                target_lang: &self.target_language,
            });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| Error::Upstream(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Error::Upstream(format!(
                "translator returned {}",
                response.status()
            )));
        }
        let body: TranslateResponse = response
            .json()
            .await
            .map_err(|e| Error::Upstream(format!("bad translator response: {e}")))?;
        if body.translations.len() != texts.len() {
            return Err(Error::Upstream(format!(
                "translator answered {} of {} texts",
                body.translations.len(),
                texts.len()
            )));
        }
        Ok(body.translations.into_iter().map(|t| t.text).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    /// Upper-cases every text it receives.
    struct Shout;

    impl Respond for Shout {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
            let translations: Vec<_> = body["text"]
                .as_array()
                .unwrap()
                .iter()
                .map(|t| serde_json::json!({"text": t.as_str().unwrap().to_uppercase()}))
                .collect();
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "translations": translations }))
        }
    }

    fn config(url: String) -> TranslatorConfig {
        TranslatorConfig {
            enabled: true,
            api_url: Some(url),
            api_key: Some("secret".into()),
            target_language: "eng".into(),
            batch_size: 3,
            batch_window_ms: 200,
            cache_size: 16,
        }
    }

    #[test]
    fn disabled_without_endpoint() {
        let cfg = TranslatorConfig {
            enabled: true,
            ..TranslatorConfig::default()
        };
        // No runtime needed: nothing is spawned.
        assert!(Translator::spawn(&cfg, reqwest::Client::new()).is_none());
        assert!(Translator::spawn(&TranslatorConfig::default(), reqwest::Client::new()).is_none());
    }

    #[tokio::test]
    async fn batches_requests_and_caches_results() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(Shout)
            .expect(1)
            .mount(&server)
            .await;

        let translator = Translator::spawn(&config(server.uri()), reqwest::Client::new()).unwrap();
        let (a, b, c) = tokio::join!(
            translator.translate("one".into()),
            translator.translate("two".into()),
            translator.translate("three".into()),
        );
        assert_eq!((a.as_str(), b.as_str(), c.as_str()), ("ONE", "TWO", "THREE"));

        // Served from the cache: the mock expects a single request.
        assert_eq!(translator.translate("two".into()).await, "TWO");
    }

    #[tokio::test]
    async fn failures_fall_back_to_original_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let translator = Translator::spawn(&config(server.uri()), reqwest::Client::new()).unwrap();
        assert_eq!(translator.translate("hola".into()).await, "hola");
    }

    #[tokio::test]
    async fn language_filter() {
        let server = MockServer::start().await;
        let translator = Translator::spawn(&config(server.uri()), reqwest::Client::new()).unwrap();
        assert!(translator.wants("jpn"));
        assert!(!translator.wants("ENG"));
        assert!(!translator.wants("und"));
        assert_eq!(translator.target_language(), "eng");
    }
}
