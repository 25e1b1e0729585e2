use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::TranslationFault;
use crate::languages::Direction;
use crate::model::{Block, Span, TranslationGroup};
use crate::providers::{RetryPolicy, Sleeper, TokioSleeper, TranslationService, call_with_policy};

/// Drives translation calls for blocks and span groups.
pub struct Translator<S> {
    service: S,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    unit_timeout: Option<Duration>,
}

#[derive(Debug, Serialize)]
struct SpanEntry<'a> {
    index: usize,
    text: &'a str,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct GroupRange {
    start: usize,
    end: usize,
    translation: String,
}

impl<S> Translator<S>
where
    S: TranslationService,
{
    pub fn new(service: S) -> Self {
        Self {
            service,
            policy: RetryPolicy::default(),
            sleeper: Arc::new(TokioSleeper),
            unit_timeout: None,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Bounds each unit's whole retried call. Elapsing counts as a connection failure.
    pub fn with_unit_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.unit_timeout = timeout;
        self
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub async fn translate_text(
        &self,
        text: &str,
        direction: Direction,
    ) -> Result<String, TranslationFault> {
        if text.trim().is_empty() {
            return Ok(String::new());
        }
        self.with_retry("translate", || self.service.translate(text, direction))
            .await
    }

    /// Fills `translated_text` on every block that has none yet. Returns how many were translated.
    pub async fn translate_blocks(
        &self,
        blocks: &mut [Block],
        direction: Direction,
    ) -> Result<usize, TranslationFault> {
        let mut translated = 0usize;
        for block in blocks.iter_mut() {
            if block.translated_text.is_some() {
                continue;
            }
            let result = self.translate_text(&block.text, direction).await?;
            debug!("{}: {} -> {} chars", block.id, block.char_count(), result.chars().count());
            block.translated_text = Some(result);
            translated += 1;
        }
        Ok(translated)
    }

    /// Asks the service to regroup and translate reading-ordered spans.
    /// Malformed replies fall back to one untranslated group per span.
    pub async fn translate_grouped<'a>(
        &self,
        spans: &[&'a Span],
        direction: Direction,
    ) -> Result<Vec<TranslationGroup<'a>>, TranslationFault> {
        if spans.is_empty() {
            return Ok(Vec::new());
        }
        let entries = spans
            .iter()
            .map(|span| SpanEntry {
                index: span.index,
                text: span.text.as_str(),
            })
            .collect::<Vec<_>>();
        let payload = serde_json::to_string(&entries)
            .map_err(|err| TranslationFault::Other(format!("failed to encode spans: {}", err)))?;

        let response = self
            .with_retry("translate_grouped", || {
                self.service.translate_grouped(&payload, direction)
            })
            .await?;

        match parse_group_ranges(&response).and_then(|ranges| build_groups(spans, ranges)) {
            Some(groups) => {
                debug!("{} spans regrouped into {} units", spans.len(), groups.len());
                Ok(groups)
            }
            None => {
                warn!(
                    "malformed grouping response; keeping {} spans untranslated",
                    spans.len()
                );
                Ok(fallback_groups(spans))
            }
        }
    }

    async fn with_retry<F, Fut>(&self, label: &str, op: F) -> Result<String, TranslationFault>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<String, TranslationFault>>,
    {
        let call = call_with_policy(&self.policy, self.sleeper.as_ref(), label, op);
        match self.unit_timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                TranslationFault::ConnectionFailed(format!(
                    "{} timed out after {:.1}s",
                    label,
                    limit.as_secs_f32()
                ))
            })?,
            None => call.await,
        }
    }
}

/// One singleton group per span, translated text equal to the original.
pub fn fallback_groups<'a>(spans: &[&'a Span]) -> Vec<TranslationGroup<'a>> {
    spans.iter().map(|span| TranslationGroup::singleton(span)).collect()
}

/// First JSON array in free-form text that decodes as `{start, end, translation}` ranges.
fn parse_group_ranges(response: &str) -> Option<Vec<GroupRange>> {
    for (offset, _) in response.match_indices('[') {
        let mut stream = serde_json::Deserializer::from_str(&response[offset..]).into_iter::<Value>();
        let Some(Ok(value @ Value::Array(_))) = stream.next() else {
            continue;
        };
        if let Ok(ranges) = serde_json::from_value::<Vec<GroupRange>>(value) {
            return Some(ranges);
        }
    }
    None
}

/// Resolves ranges against the span table. Inverted, overlapping or unknown indices reject the reply.
fn build_groups<'a>(
    spans: &[&'a Span],
    mut ranges: Vec<GroupRange>,
) -> Option<Vec<TranslationGroup<'a>>> {
    let table = spans
        .iter()
        .map(|span| (span.index, *span))
        .collect::<BTreeMap<_, _>>();
    ranges.sort_by_key(|range| range.start);

    let mut groups = Vec::with_capacity(ranges.len());
    let mut previous_end: Option<usize> = None;
    for range in ranges {
        if range.start > range.end {
            return None;
        }
        if previous_end.is_some_and(|end| range.start <= end) {
            return None;
        }
        let mut members = Vec::new();
        for index in range.start..=range.end {
            members.push(*table.get(&index)?);
        }
        previous_end = Some(range.end);
        groups.push(TranslationGroup {
            start_index: range.start,
            end_index: range.end,
            original_text: members.iter().map(|span| span.text.as_str()).collect(),
            translated_text: range.translation,
            spans: members,
        });
    }
    Some(groups)
}
