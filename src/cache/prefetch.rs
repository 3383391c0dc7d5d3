/// Documentation prefetch
///
/// Intent keywords are mapped to cache keys through a static keyword table,
/// and every key that is not already fresh in the cache is fetched through
/// a `DocResolver` and stored. The table is held in an `ArcSwap` so it can be
/// replaced at runtime without blocking concurrent prefetches.

use crate::cache::entry::PrefetchReport;
use crate::cache::store::DocCache;
use anyhow::Result;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};
use tokio_util::sync::CancellationToken;

/// Keyword → cache keys lookup, swapped atomically as a whole
#[derive(Debug)]
pub struct KeywordTable {
    entries: ArcSwap<HashMap<String, Vec<String>>>,
}

/// Common workflow-automation topics and the documentation they need
const DEFAULT_TOPICS: &[(&str, &[&str])] = &[
    ("slack", &["nodes.slack"]),
    ("email", &["nodes.email-send", "nodes.gmail"]),
    ("gmail", &["nodes.gmail"]),
    ("webhook", &["nodes.webhook", "nodes.respond-to-webhook"]),
    ("http", &["nodes.http-request"]),
    ("api", &["nodes.http-request"]),
    ("schedule", &["nodes.schedule-trigger"]),
    ("cron", &["nodes.schedule-trigger"]),
    ("daily", &["nodes.schedule-trigger"]),
    ("postgres", &["nodes.postgres"]),
    ("database", &["nodes.postgres", "nodes.mysql"]),
    ("mysql", &["nodes.mysql"]),
    ("sheets", &["nodes.google-sheets"]),
    ("spreadsheet", &["nodes.google-sheets"]),
    ("google sheets", &["nodes.google-sheets"]),
    ("openai", &["nodes.openai"]),
    ("ai", &["nodes.openai", "nodes.ai-agent"]),
    ("agent", &["nodes.ai-agent"]),
    ("condition", &["nodes.if"]),
    ("filter", &["nodes.filter"]),
    ("code", &["nodes.code"]),
    ("javascript", &["nodes.code"]),
    ("merge", &["nodes.merge"]),
    ("discord", &["nodes.discord"]),
    ("telegram", &["nodes.telegram"]),
    ("github", &["nodes.github"]),
    ("notion", &["nodes.notion"]),
    ("airtable", &["nodes.airtable"]),
    ("alert", &["nodes.slack", "nodes.email-send"]),
    ("alerting", &["nodes.slack", "nodes.email-send"]),
    ("error handling", &["guides.error-handling"]),
    ("retry", &["guides.error-handling"]),
    ("expressions", &["guides.expressions"]),
];

impl KeywordTable {
    pub fn new(entries: HashMap<String, Vec<String>>) -> Self {
        Self {
            entries: ArcSwap::new(Arc::new(normalize_table(entries))),
        }
    }

    /// Replace the whole table atomically
    pub fn replace(&self, entries: HashMap<String, Vec<String>>) {
        self.entries.store(Arc::new(normalize_table(entries)));
        tracing::info!("🔁 Keyword table replaced ({} keywords)", self.entries.load().len());
    }

    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.load().is_empty()
    }

    /// Distinct cache keys for the given intent keywords, in first-seen order
    ///
    /// Each keyword is lowercased and tokenized; the whole phrase and every
    /// token are looked up.
    pub fn resolve(&self, keywords: &[String]) -> Vec<String> {
        let table = self.entries.load();
        let mut seen = HashSet::new();
        let mut resolved = Vec::new();

        for keyword in keywords {
            let tokens = tokenize(keyword);
            if tokens.is_empty() {
                continue;
            }

            let phrase = tokens.join(" ");
            let lookups = std::iter::once(phrase.as_str()).chain(tokens.iter().map(String::as_str));
            for lookup in lookups {
                for cache_key in table.get(lookup).into_iter().flatten() {
                    if seen.insert(cache_key.clone()) {
                        resolved.push(cache_key.clone());
                    }
                }
            }
        }
        resolved
    }
}

impl Default for KeywordTable {
    fn default() -> Self {
        Self::new(
            DEFAULT_TOPICS
                .iter()
                .map(|(keyword, keys)| {
                    (keyword.to_string(), keys.iter().map(|key| key.to_string()).collect())
                })
                .collect(),
        )
    }
}

fn normalize_table(entries: HashMap<String, Vec<String>>) -> HashMap<String, Vec<String>> {
    entries
        .into_iter()
        .map(|(keyword, keys)| (tokenize(&keyword).join(" "), keys))
        .filter(|(keyword, _)| !keyword.is_empty())
        .collect()
}

/// Lowercase and split on anything that is not alphanumeric or `-`
fn tokenize(raw: &str) -> Vec<String> {
    raw.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '-'))
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

/// Source of documentation payloads for cache keys
#[async_trait]
pub trait DocResolver: Send + Sync {
    async fn resolve(&self, cache_key: &str) -> Result<Value>;
}

/// Fetches `GET {base_url}/{cache_key}` and expects a JSON body
#[derive(Debug, Clone)]
pub struct HttpDocResolver {
    client: Client,
    base_url: String,
}

impl HttpDocResolver {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build documentation client: {}", e))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn url_for(&self, cache_key: &str) -> String {
        format!("{}/{}", self.base_url, cache_key)
    }
}

#[async_trait]
impl DocResolver for HttpDocResolver {
    async fn resolve(&self, cache_key: &str) -> Result<Value> {
        let url = self.url_for(cache_key);
        tracing::debug!("🌐 Fetching documentation {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Documentation request failed for {}: {}", cache_key, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow::anyhow!("Documentation for {} returned {}", cache_key, status));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| anyhow::anyhow!("Documentation for {} is not JSON: {}", cache_key, e))
    }
}

/// Resolver used when no documentation source is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledResolver;

#[async_trait]
impl DocResolver for DisabledResolver {
    async fn resolve(&self, cache_key: &str) -> Result<Value> {
        Err(anyhow::anyhow!("No documentation source configured for {}", cache_key))
    }
}

impl DocCache {
    /// Warm the cache for the given intent keywords
    ///
    /// Stops between keys once `cancel` fires and abandons an in-flight
    /// resolve; entries stored before that stay cached.
    pub async fn prefetch(
        &self,
        keywords: &[String],
        resolver: &dyn DocResolver,
        cancel: &CancellationToken,
    ) -> PrefetchReport {
        let cache_keys = self.keywords().resolve(keywords);
        let mut report = PrefetchReport {
            requested: cache_keys.len(),
            ..PrefetchReport::default()
        };

        for cache_key in cache_keys {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            if self.contains_fresh(&cache_key).await {
                report.already_cached += 1;
                continue;
            }

            let resolved = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                resolved = resolver.resolve(&cache_key) => resolved,
            };

            let payload = match resolved {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!("⚠️ Prefetch skipped {}: {}", cache_key, e);
                    report.skipped += 1;
                    continue;
                }
            };

            match self.put(&cache_key, payload).await {
                Ok(()) => report.prefetched += 1,
                Err(e) => {
                    tracing::warn!("⚠️ Prefetch could not cache {}: {}", cache_key, e);
                    report.skipped += 1;
                }
            }
        }

        tracing::info!(
            "📚 Prefetch: {} requested, {} fetched, {} cached, {} skipped{}",
            report.requested,
            report.prefetched,
            report.already_cached,
            report.skipped,
            if report.cancelled { " (cancelled)" } else { "" }
        );
        report
    }
}
