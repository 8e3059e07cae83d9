use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use game_types::WordEntry;

pub const LOCAL_CACHE_SIZE: usize = 1000;
pub const LOCAL_CACHE_TTL: Duration = Duration::from_secs(300);
/// Positive lookups stay in the shared cache for an hour.
pub const HIT_TTL: Duration = Duration::from_secs(3600);
/// Negative lookups are cached briefly to shield the dictionary store.
pub const MISS_TTL: Duration = Duration::from_secs(300);
pub const HINTS_TTL: Duration = Duration::from_secs(600);
pub const COUNT_TTL: Duration = Duration::from_secs(3600);

/// Read-only dictionary backend. The engine treats it as a pure function
/// `word -> entry | none`.
#[async_trait]
pub trait DictionaryStore: Send + Sync {
    async fn find_word(&self, word: &str) -> Result<Option<WordEntry>>;
    async fn words_starting_with(&self, first_char: &str, limit: usize) -> Result<Vec<WordEntry>>;
    async fn count_starting_with(&self, first_char: &str) -> Result<u64>;
    async fn most_frequent(&self, limit: usize) -> Result<Vec<WordEntry>>;
}

/// Shared lookup cache, normally backed by the KV store gateway.
#[async_trait]
pub trait WordCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: &str, ttl: Duration);
}

/// Cache that remembers nothing, for compositions without a KV store.
pub struct NoopWordCache;

#[async_trait]
impl WordCache for NoopWordCache {
    async fn get(&self, _key: &str) -> Option<String> {
        None
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) {}
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedLookup {
    found: bool,
    entry: Option<WordEntry>,
}

struct LocalEntry {
    entry: Option<WordEntry>,
    cached_at: Instant,
}

/// Korean word lookups with a two-level cache: process-local LRU in front of
/// the shared KV cache in front of the store.
pub struct DictionaryService {
    store: Arc<dyn DictionaryStore>,
    cache: Arc<dyn WordCache>,
    local: Mutex<LruCache<String, LocalEntry>>,
}

impl DictionaryService {
    pub fn new(store: Arc<dyn DictionaryStore>, cache: Arc<dyn WordCache>) -> Self {
        let capacity = NonZeroUsize::new(LOCAL_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN);
        Self {
            store,
            cache,
            local: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn cache_key(word: &str) -> String {
        format!("word:cache:{}", word)
    }

    pub async fn lookup(&self, word: &str) -> Result<Option<WordEntry>> {
        let word = word.trim();
        if word.is_empty() {
            return Ok(None);
        }

        {
            let mut local = self.local.lock().await;
            if let Some(hit) = local.get(&word.to_string()) {
                if hit.cached_at.elapsed() < LOCAL_CACHE_TTL {
                    return Ok(hit.entry.clone());
                }
                local.pop(&word.to_string());
            }
        }

        if let Some(raw) = self.cache.get(&Self::cache_key(word)).await {
            if let Ok(cached) = serde_json::from_str::<CachedLookup>(&raw) {
                self.remember_local(word, cached.entry.clone()).await;
                return Ok(cached.entry);
            }
            debug!(word, "discarding unreadable word-cache entry");
        }

        let entry = self.store.find_word(word).await?;
        let cached = CachedLookup {
            found: entry.is_some(),
            entry: entry.clone(),
        };
        let ttl = if cached.found { HIT_TTL } else { MISS_TTL };
        if let Ok(raw) = serde_json::to_string(&cached) {
            self.cache.set(&Self::cache_key(word), &raw, ttl).await;
        }
        self.remember_local(word, entry.clone()).await;
        Ok(entry)
    }

    async fn remember_local(&self, word: &str, entry: Option<WordEntry>) {
        let mut local = self.local.lock().await;
        local.put(
            word.to_string(),
            LocalEntry {
                entry,
                cached_at: Instant::now(),
            },
        );
    }

    /// Up to `count` candidate words starting with `last_char`.
    pub async fn hints(&self, last_char: &str, count: usize) -> Result<Vec<String>> {
        let key = format!("word:hints:{}", last_char);
        if let Some(raw) = self.cache.get(&key).await {
            if let Ok(words) = serde_json::from_str::<Vec<String>>(&raw) {
                return Ok(words.into_iter().take(count).collect());
            }
        }

        let entries = self.store.words_starting_with(last_char, count).await?;
        let words: Vec<String> = entries.into_iter().map(|e| e.word).collect();
        if let Ok(raw) = serde_json::to_string(&words) {
            self.cache.set(&key, &raw, HINTS_TTL).await;
        }
        Ok(words)
    }

    /// How many dictionary words can continue a chain ending in `last_char`.
    pub async fn possible_count(&self, last_char: &str) -> Result<u64> {
        let key = format!("word:count:{}", last_char);
        if let Some(raw) = self.cache.get(&key).await {
            if let Ok(count) = raw.parse::<u64>() {
                return Ok(count);
            }
        }

        let count = self.store.count_starting_with(last_char).await?;
        self.cache.set(&key, &count.to_string(), COUNT_TTL).await;
        Ok(count)
    }

    /// Warm the shared cache with the most frequent words. Returns how many
    /// entries were written.
    pub async fn preload(&self, limit: usize) -> Result<usize> {
        let entries = self.store.most_frequent(limit).await?;
        let count = entries.len();
        for entry in entries {
            let cached = CachedLookup {
                found: true,
                entry: Some(entry.clone()),
            };
            if let Ok(raw) = serde_json::to_string(&cached) {
                self.cache.set(&Self::cache_key(&entry.word), &raw, HIT_TTL).await;
            }
        }
        info!(count, "preloaded dictionary cache");
        Ok(count)
    }
}

/// In-memory dictionary backend loaded from a tab-separated word table:
/// `word<TAB>definition<TAB>difficulty<TAB>frequency`, `#` for comments.
pub struct MemoryDictionary {
    words: HashMap<String, WordEntry>,
    by_first: HashMap<String, Vec<String>>,
}

impl MemoryDictionary {
    pub fn from_tsv(table: &str) -> Result<Self> {
        let mut words = HashMap::new();
        let mut by_first: HashMap<String, Vec<String>> = HashMap::new();

        for (number, line) in table.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split('\t');
            let word = fields
                .next()
                .ok_or_else(|| anyhow!("line {}: missing word", number + 1))?;
            let definition = fields.next().unwrap_or_default();
            let difficulty: u8 = fields
                .next()
                .unwrap_or("1")
                .parse()
                .with_context(|| format!("line {}: bad difficulty", number + 1))?;
            let frequency: u8 = fields
                .next()
                .unwrap_or("50")
                .parse()
                .with_context(|| format!("line {}: bad frequency", number + 1))?;

            let entry = WordEntry::new(word, definition, difficulty, frequency);
            by_first
                .entry(entry.first_char.clone())
                .or_default()
                .push(entry.word.clone());
            words.insert(entry.word.clone(), entry);
        }

        // Hints prefer frequent words first.
        for candidates in by_first.values_mut() {
            candidates.sort_by(|a, b| {
                let fa = words.get(a).map(|e| e.frequency_score).unwrap_or(0);
                let fb = words.get(b).map(|e| e.frequency_score).unwrap_or(0);
                fb.cmp(&fa).then(a.cmp(b))
            });
        }

        Ok(Self { words, by_first })
    }

    /// The embedded seed table, enough for development and tests.
    pub fn seed() -> Self {
        Self::from_tsv(include_str!("data/korean_words.tsv"))
            .unwrap_or_else(|_| Self {
                words: HashMap::new(),
                by_first: HashMap::new(),
            })
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

#[async_trait]
impl DictionaryStore for MemoryDictionary {
    async fn find_word(&self, word: &str) -> Result<Option<WordEntry>> {
        Ok(self.words.get(word).cloned())
    }

    async fn words_starting_with(&self, first_char: &str, limit: usize) -> Result<Vec<WordEntry>> {
        let candidates = match self.by_first.get(first_char) {
            Some(candidates) => candidates,
            None => return Ok(Vec::new()),
        };
        Ok(candidates
            .iter()
            .take(limit)
            .filter_map(|w| self.words.get(w).cloned())
            .collect())
    }

    async fn count_starting_with(&self, first_char: &str) -> Result<u64> {
        Ok(self
            .by_first
            .get(first_char)
            .map(|c| c.len() as u64)
            .unwrap_or(0))
    }

    async fn most_frequent(&self, limit: usize) -> Result<Vec<WordEntry>> {
        let mut entries: Vec<&WordEntry> = self.words.values().collect();
        entries.sort_by(|a, b| b.frequency_score.cmp(&a.frequency_score));
        Ok(entries.into_iter().take(limit).cloned().collect())
    }
}
