pub mod anthropic_provider;
pub mod cache;
pub mod prompt;
pub mod provider;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use log::warn;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, Semaphore};

use crate::evidence::{Classification, EvidenceRecord};
use crate::metrics::Metrics;

pub use cache::{Cache, CacheKey};
pub use provider::JudgeProvider;

/// Output of a judge call, identical in shape to gateway-source evidence
/// (spec §4.4) so the correlator can append it as a synthetic member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub classification: Classification,
    pub confidence: u8,
    pub reasoning: String,
    pub cache_hit: bool,
    pub inference_time_ms: u64,
}

impl Verdict {
    fn fallback(reason: &str) -> Self {
        Self {
            classification: Classification::Suspect,
            confidence: 0,
            reasoning: reason.to_string(),
            cache_hit: false,
            inference_time_ms: 0,
        }
    }

    pub fn score_contribution(&self) -> i64 {
        self.classification.judge_score_contribution()
    }
}

/// Bounded-concurrency LLM classifier (spec §4.4): cache-first lookup,
/// at-most-one in-flight inference per `CacheKey` (singleflight), a hard
/// per-call deadline, and a mandatory-parallel `batch_classify`.
pub struct JudgeWorker {
    provider: Arc<dyn JudgeProvider>,
    cache: Arc<dyn Cache<Verdict>>,
    deadline: Duration,
    semaphore: Arc<Semaphore>,
    inflight: Mutex<HashMap<CacheKey, Arc<Notify>>>,
    metrics: Arc<Metrics>,
}

impl JudgeWorker {
    pub fn new(
        provider: Arc<dyn JudgeProvider>,
        cache: Arc<dyn Cache<Verdict>>,
        deadline: Duration,
        max_parallel: usize,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            provider,
            cache,
            deadline,
            semaphore: Arc::new(Semaphore::new(max_parallel.max(1))),
            inflight: Mutex::new(HashMap::new()),
            metrics,
        }
    }

    /// Classifies one detection bundle. Never returns an error: a timeout,
    /// provider error, or singleflight race all resolve to a fallback
    /// `Verdict` (spec §4.4: "it never propagates an error to the caller's
    /// hot path").
    pub async fn classify(&self, bundle: &[EvidenceRecord]) -> Verdict {
        let tree = serde_json::to_value(bundle).unwrap_or(serde_json::Value::Null);
        let key = CacheKey::from_canonical_json(&tree);

        if let Some(cached) = self.cached_hit(&key).await {
            return cached;
        }

        // The follower must register as a waiter while still holding this
        // lock: the leader can only remove its entry and call
        // `notify_waiters` under the same lock, so a waiter enabled here is
        // guaranteed to be registered before that happens. Enabling after
        // releasing the lock would leave a window where `notify_waiters`
        // fires with nobody listening, hanging the follower forever.
        //
        // The lock guard itself is confined to this block (rather than
        // spanning the `.await` below) purely so the compiler can see the
        // future is `Send`; the synchronization it performs is unchanged.
        let notify: Arc<Notify>;
        let mut waiter: Option<Pin<Box<dyn Future<Output = ()> + Send + '_>>> = None;
        {
            let mut inflight = self.inflight.lock();
            if let Some(existing) = inflight.get(&key) {
                notify = existing.clone();
                let mut notified = Box::pin(notify.notified());
                notified.as_mut().enable();
                waiter = Some(notified);
            } else {
                let n = Arc::new(Notify::new());
                inflight.insert(key.clone(), n.clone());
                notify = n;
            }
        }

        if let Some(notified) = waiter {
            notified.await;
            return self
                .cached_hit(&key)
                .await
                .unwrap_or_else(|| Verdict::fallback("singleflight leader produced no result"));
        }

        let result = self.infer(bundle, &key).await;

        {
            let mut inflight = self.inflight.lock();
            inflight.remove(&key);
        }
        notify.notify_waiters();

        result
    }

    async fn cached_hit(&self, key: &CacheKey) -> Option<Verdict> {
        match self.cache.get(key).await {
            Ok(Some(mut verdict)) => {
                self.metrics.judge_cache_hit_total.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                verdict.cache_hit = true;
                verdict.inference_time_ms = 0;
                Some(verdict)
            }
            _ => None,
        }
    }

    async fn infer(&self, bundle: &[EvidenceRecord], key: &CacheKey) -> Verdict {
        let _permit = match self.semaphore.acquire().await {
            Ok(permit) => permit,
            Err(_) => return Verdict::fallback("judge pool closed"),
        };

        let user_prompt = prompt::build_user_prompt(bundle);
        let started = Instant::now();

        let call = self.provider.complete(prompt::system_prompt(), &user_prompt);
        let (verdict, cacheable) = match tokio::time::timeout(self.deadline, call).await {
            Ok(Ok(body)) => {
                let parsed = prompt::parse_response(&body);
                let verdict = Verdict {
                    classification: parsed.classification,
                    confidence: parsed.confidence,
                    reasoning: parsed.reasoning,
                    cache_hit: false,
                    inference_time_ms: started.elapsed().as_millis() as u64,
                };
                (verdict, true)
            }
            Ok(Err(e)) => {
                self.metrics.judge_provider_error_total.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                warn!(target: "judge", "provider {} error: {e}", self.provider.name());
                (Verdict::fallback("provider error"), false)
            }
            Err(_) => {
                self.metrics.judge_timeout_total.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                (Verdict::fallback("timeout"), false)
            }
        };

        if cacheable {
            self.cache.put(key.clone(), verdict.clone()).await;
        }

        verdict
    }

    /// Classifies every bundle in `bundles`. Parallel by default
    /// (concurrency capped by the worker's `max_parallel` semaphore,
    /// overriding the sequential behaviour of the system this design was
    /// distilled from); pass `sequential=true` to restore strict one-at-a-
    /// time processing.
    pub async fn batch_classify(&self, bundles: &[Vec<EvidenceRecord>], sequential: bool) -> Vec<Verdict> {
        if sequential {
            let mut results = Vec::with_capacity(bundles.len());
            for bundle in bundles {
                results.push(self.classify(bundle).await);
            }
            return results;
        }

        join_all(bundles.iter().map(|bundle| self.classify(bundle))).await
    }
}
