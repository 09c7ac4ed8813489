//! AI comparison stage
//!
//! Runs matched pairs through the verdict model with bounded parallelism.
//! Transient model failures retry with exponential backoff; exhausted retries
//! and fatal failures are absorbed into an `Uncertain` verdict for that pair
//! rather than aborting the run. One-sided keys never reach the model.

use crate::config::RetrySettings;
use crate::progress::ProgressTracker;
use crate::services::{ModelError, VerdictModel};
use crate::types::{ModelVerdict, PairedKey, PolicyRecord, Verdict, VerdictClass};
use futures::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct AiComparator {
    model: Arc<dyn VerdictModel>,
    retry: RetrySettings,
    concurrency: usize,
}

impl AiComparator {
    pub fn new(model: Arc<dyn VerdictModel>, retry: RetrySettings, concurrency: usize) -> Self {
        Self {
            model,
            retry,
            concurrency: concurrency.max(1),
        }
    }

    /// One pair through the model, retrying transient failures. Never
    /// returns an error: failure degrades to an `Uncertain` verdict.
    async fn compare_pair(&self, erp: &PolicyRecord, notion: &PolicyRecord) -> ModelVerdict {
        let mut last_error = String::new();

        for attempt in 1..=self.retry.max_attempts {
            match self
                .model
                .compare(&notion.condition_text, &erp.condition_text)
                .await
            {
                Ok(verdict) => return verdict,
                Err(ModelError::Transient(message)) => {
                    tracing::warn!(
                        key = %erp.key,
                        attempt,
                        %message,
                        "Transient comparison failure"
                    );
                    last_error = message;
                    if attempt < self.retry.max_attempts {
                        tokio::time::sleep(self.retry.delay_for_attempt(attempt)).await;
                    }
                }
                Err(ModelError::Fatal(message)) => {
                    last_error = message;
                    break;
                }
            }
        }

        ModelVerdict {
            class: VerdictClass::Uncertain,
            explanation: format!("Comparison could not be completed: {}", last_error),
            confidence: None,
        }
    }

    /// Compare every pair. Matched pairs go to the model; one-sided keys map
    /// straight to `MissingCounterpart`. Progress advances through the given
    /// percentage band as matched pairs complete. When cancellation fires,
    /// pairs not yet dispatched are marked uncompared instead of calling out.
    pub async fn compare_all(
        &self,
        pairs: Vec<PairedKey>,
        tracker: &ProgressTracker,
        cancel: &CancellationToken,
        band: (u8, u8),
    ) -> Vec<Verdict> {
        let total_matched = pairs.iter().filter(|p| p.is_matched()).count().max(1);
        let completed = AtomicUsize::new(0);
        let (band_start, band_end) = band;
        let band_width = band_end.saturating_sub(band_start) as usize;

        let verdicts: Vec<Verdict> = futures::stream::iter(pairs.into_iter().map(|pair| {
            let completed = &completed;
            async move {
                let (class, explanation, confidence) = match &pair {
                    PairedKey::Matched { erp, notion } => {
                        if cancel.is_cancelled() {
                            (
                                VerdictClass::Uncertain,
                                "Not compared: run cancelled".to_string(),
                                None,
                            )
                        } else {
                            let verdict = self.compare_pair(erp, notion).await;
                            let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                            let pct = band_start as usize + band_width * done / total_matched;
                            tracker.set_percentage(pct as u8).await;
                            (verdict.class, verdict.explanation, verdict.confidence)
                        }
                    }
                    PairedKey::ErpOnly(_) | PairedKey::NotionOnly(_) => {
                        (VerdictClass::MissingCounterpart, String::new(), None)
                    }
                };

                Verdict {
                    pair,
                    class,
                    explanation,
                    confidence,
                }
            }
        }))
        .buffered(self.concurrency)
        .collect()
        .await;

        let uncertain = verdicts
            .iter()
            .filter(|v| v.class == VerdictClass::Uncertain)
            .count();
        if uncertain > 0 {
            tracker
                .warn(format!(
                    "{} comparison(s) could not be resolved and were marked uncertain",
                    uncertain
                ))
                .await;
        }

        verdicts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SourceKind;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    fn record(key: &str, source: SourceKind) -> PolicyRecord {
        PolicyRecord {
            key: key.to_string(),
            source,
            condition_text: format!("policy {}", key),
            metadata: BTreeMap::new(),
        }
    }

    fn matched(key: &str) -> PairedKey {
        PairedKey::Matched {
            erp: record(key, SourceKind::Erp),
            notion: record(key, SourceKind::Notion),
        }
    }

    fn fast_retry() -> RetrySettings {
        RetrySettings {
            max_attempts: 3,
            base_delay_ms: 1,
            multiplier: 2.0,
        }
    }

    /// Scripted model: pops one outcome per call
    struct ScriptedModel {
        outcomes: Mutex<Vec<Result<ModelVerdict, ModelError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedModel {
        fn new(outcomes: Vec<Result<ModelVerdict, ModelError>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes),
                calls: AtomicUsize::new(0),
            }
        }

        fn equivalent() -> ModelVerdict {
            ModelVerdict {
                class: VerdictClass::Equivalent,
                explanation: "No significant functional differences found.".to_string(),
                confidence: Some(1.0),
            }
        }
    }

    #[async_trait]
    impl VerdictModel for ScriptedModel {
        async fn compare(&self, _n: &str, _e: &str) -> Result<ModelVerdict, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut outcomes = self.outcomes.lock().unwrap();
            if outcomes.is_empty() {
                Ok(Self::equivalent())
            } else {
                outcomes.remove(0)
            }
        }
    }

    async fn running_tracker() -> (ProgressTracker, CancellationToken) {
        let tracker = ProgressTracker::new();
        let (_, token) = tracker.begin_run().await.unwrap();
        (tracker, token)
    }

    #[tokio::test]
    async fn transient_failures_retry_then_succeed() {
        let model = Arc::new(ScriptedModel::new(vec![
            Err(ModelError::Transient("rate limited".into())),
            Ok(ScriptedModel::equivalent()),
        ]));
        let comparator = AiComparator::new(model.clone(), fast_retry(), 2);
        let (tracker, token) = running_tracker().await;

        let verdicts = comparator
            .compare_all(vec![matched("a")], &tracker, &token, (35, 90))
            .await;

        assert_eq!(verdicts[0].class, VerdictClass::Equivalent);
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausted_retries_absorb_to_uncertain() {
        let model = Arc::new(ScriptedModel::new(vec![
            Err(ModelError::Transient("boom".into())),
            Err(ModelError::Transient("boom".into())),
            Err(ModelError::Transient("boom".into())),
        ]));
        let comparator = AiComparator::new(model.clone(), fast_retry(), 1);
        let (tracker, token) = running_tracker().await;

        let verdicts = comparator
            .compare_all(vec![matched("a")], &tracker, &token, (35, 90))
            .await;

        assert_eq!(verdicts.len(), 1);
        assert_eq!(verdicts[0].class, VerdictClass::Uncertain);
        assert!(verdicts[0].explanation.contains("boom"));
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_failures_do_not_retry() {
        let model = Arc::new(ScriptedModel::new(vec![Err(ModelError::Fatal(
            "bad key".into(),
        ))]));
        let comparator = AiComparator::new(model.clone(), fast_retry(), 1);
        let (tracker, token) = running_tracker().await;

        let verdicts = comparator
            .compare_all(vec![matched("a")], &tracker, &token, (35, 90))
            .await;

        assert_eq!(verdicts[0].class, VerdictClass::Uncertain);
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn one_sided_pairs_skip_the_model() {
        let model = Arc::new(ScriptedModel::new(vec![]));
        let comparator = AiComparator::new(model.clone(), fast_retry(), 2);
        let (tracker, token) = running_tracker().await;

        let pairs = vec![
            PairedKey::NotionOnly(record("n", SourceKind::Notion)),
            PairedKey::ErpOnly(record("e", SourceKind::Erp)),
        ];
        let verdicts = comparator.compare_all(pairs, &tracker, &token, (35, 90)).await;

        assert!(verdicts
            .iter()
            .all(|v| v.class == VerdictClass::MissingCounterpart));
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancellation_stops_dispatching_new_comparisons() {
        let model = Arc::new(ScriptedModel::new(vec![]));
        let comparator = AiComparator::new(model.clone(), fast_retry(), 1);
        let (tracker, token) = running_tracker().await;
        token.cancel();

        let verdicts = comparator
            .compare_all(vec![matched("a"), matched("b")], &tracker, &token, (35, 90))
            .await;

        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
        assert!(verdicts.iter().all(|v| v.class == VerdictClass::Uncertain));
        assert!(verdicts[0].explanation.contains("cancelled"));
    }

    #[tokio::test]
    async fn progress_stays_inside_the_band() {
        let model = Arc::new(ScriptedModel::new(vec![]));
        let comparator = AiComparator::new(model, fast_retry(), 2);
        let (tracker, token) = running_tracker().await;
        tracker.set_percentage(35).await;

        let pairs: Vec<PairedKey> = (0..5).map(|i| matched(&format!("k{}", i))).collect();
        comparator.compare_all(pairs, &tracker, &token, (35, 90)).await;

        assert_eq!(tracker.snapshot().await.percentage, 90);
    }
}
