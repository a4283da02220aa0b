use std::array;
use std::sync::Mutex;
use std::sync::PoisonError;

use crate::lru::LruMap;
use crate::Addr;

use super::SymbolizedFrame;
use super::MAX_INLINE_FRAMES;


/// The frames an address resolved to: the frame for the address itself,
/// preceded by up to [`MAX_INLINE_FRAMES`] inline frames.
#[derive(Debug)]
pub(crate) struct CachedFrames {
    frames: [SymbolizedFrame; 1 + MAX_INLINE_FRAMES],
    count: usize,
}

impl CachedFrames {
    /// The cached frames, in display order.
    #[inline]
    pub fn frames(&self) -> &[SymbolizedFrame] {
        &self.frames[..self.count]
    }
}


/// A cache of symbolization results, keyed by address.
///
/// Every access, including lookups, updates recency information and so
/// requires exclusive access, which is provided by a single lock.
#[derive(Debug)]
pub(crate) struct SymbolCache {
    entries: Mutex<LruMap<Addr, CachedFrames>>,
}

impl SymbolCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(LruMap::with_capacity(capacity)),
        }
    }

    /// Look up the cached frames for `addr`, invoking `f` on them if
    /// present.
    ///
    /// The lock is held for the duration of `f`.
    pub fn with_frames<F, R>(&self, addr: Addr, f: F) -> Option<R>
    where
        F: FnOnce(&[SymbolizedFrame]) -> R,
    {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(&addr).map(|cached| f(cached.frames()))
    }

    /// Check whether a result for `addr` is cached, without affecting
    /// its recency.
    pub fn contains(&self, addr: Addr) -> bool {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.peek(&addr).is_some()
    }

    /// Cache `frames` as the symbolization result of `addr`.
    ///
    /// At most `1 + MAX_INLINE_FRAMES` frames are stored.
    pub fn insert(&self, addr: Addr, frames: &[SymbolizedFrame]) {
        let count = frames.len().min(1 + MAX_INLINE_FRAMES);
        let cached = CachedFrames {
            frames: array::from_fn(|i| frames.get(i).cloned().unwrap_or_default()),
            count,
        };

        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let _evicted = entries.insert(addr, cached);
    }
}
