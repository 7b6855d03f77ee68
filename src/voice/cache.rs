//! Session cache of synthesized audio
//!
//! Keyed by `voice:chunk-text`, exact match, so a repeated sentence with the
//! same voice never goes back to the remote backend. Bounded LRU by chunk
//! count; a capacity of 0 means unbounded.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;

use super::AudioBuffer;

/// Default number of cached chunks
pub const DEFAULT_CACHE_CAPACITY: usize = 512;

/// Build the cache key for a voice and chunk text
///
/// Case- and whitespace-sensitive.
#[must_use]
pub fn cache_key(voice: &str, text: &str) -> String {
    format!("{voice}:{text}")
}

/// Memoizes decoded audio for the lifetime of a session
pub struct SynthesisCache {
    entries: Mutex<LruCache<String, AudioBuffer>>,
}

impl Default for SynthesisCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl SynthesisCache {
    /// Create a cache holding at most `capacity` chunks (0 = unbounded)
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let entries = NonZeroUsize::new(capacity).map_or_else(LruCache::unbounded, LruCache::new);
        Self {
            entries: Mutex::new(entries),
        }
    }

    /// Look up a buffer, marking it most recently used
    #[must_use]
    pub fn get(&self, key: &str) -> Option<AudioBuffer> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(key).cloned()
    }

    /// Store a buffer, evicting the least recently used entry when full
    pub fn put(&self, key: String, buffer: AudioBuffer) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((evicted, _)) = entries.push(key, buffer) {
            tracing::trace!(key = %evicted, "synthesis cache evicted entry");
        }
    }

    /// Number of cached chunks
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the cache holds nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}
