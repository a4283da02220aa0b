use std::cell::RefCell;
use std::fs::File;
use std::os::unix::io::AsRawFd as _;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::OnceLock;
use std::sync::PoisonError;

use crate::log::debug;
use crate::log::trace;
use crate::lru::LruMap;
use crate::util::fstat;
use crate::ErrorExt as _;
use crate::Result;

use super::ElfFile;
use super::DEFAULT_DEBUG_DIRS;


/// The capacity of the cache returned by [`default_elf_cache`].
pub const DEFAULT_ELF_CACHE_CAPACITY: usize = 500;


/// A source of opened ELF files, as used by the
/// [`Symbolizer`][crate::Symbolizer].
pub trait ElfCacheBase {
    /// Retrieve the ELF file at `path`.
    ///
    /// `None` is returned if the file could not be opened or parsed.
    fn get_file(&self, path: &Path) -> Option<Arc<ElfFile>>;
}


/// File system meta data used for detecting changes to a file.
#[derive(Debug, Eq, PartialEq)]
struct EntryMeta {
    dev: libc::dev_t,
    inode: libc::ino_t,
    size: libc::off_t,
    mtime_sec: libc::time_t,
    mtime_nsec: i64,
}

impl EntryMeta {
    fn new(stat: &libc::stat) -> Self {
        Self {
            dev: stat.st_dev,
            inode: stat.st_ino,
            size: stat.st_size,
            mtime_sec: stat.st_mtime,
            mtime_nsec: stat.st_mtime_nsec,
        }
    }
}


#[derive(Debug)]
struct Entry {
    meta: EntryMeta,
    file: Arc<ElfFile>,
}


/// A bounded cache of opened ELF files, evicting the least recently
/// used file when full.
///
/// Cached files are checked against the file system on each lookup and
/// reopened if they changed. The cache is safe to share between
/// threads, but it takes locks and allocates and so must not be used
/// from within signal handlers. Use a [`SignalSafeElfCache`] there.
#[derive(Debug)]
pub struct ElfCache {
    entries: Mutex<LruMap<PathBuf, Entry>>,
    debug_dirs: Box<[PathBuf]>,
}

impl ElfCache {
    /// Create a new cache holding up to `capacity` files.
    ///
    /// A capacity of zero disables caching: every lookup opens the
    /// file anew.
    pub fn new(capacity: usize) -> Self {
        let debug_dirs = DEFAULT_DEBUG_DIRS
            .iter()
            .map(PathBuf::from)
            .collect::<Vec<_>>();
        Self::with_debug_dirs(capacity, &debug_dirs)
    }

    /// Create a new cache holding up to `capacity` files, with files
    /// searching `debug_dirs` for separate debug information.
    pub fn with_debug_dirs(capacity: usize, debug_dirs: &[PathBuf]) -> Self {
        Self {
            entries: Mutex::new(LruMap::with_capacity(capacity)),
            debug_dirs: debug_dirs.to_vec().into_boxed_slice(),
        }
    }

    fn find_or_open(&self, path: &Path) -> Result<Arc<ElfFile>> {
        let file = File::open(path)
            .with_context(|| format!("failed to open ELF file {}", path.display()))?;
        let meta = EntryMeta::new(&fstat(file.as_raw_fd())?);

        {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = entries.get(path) {
                if entry.meta == meta {
                    trace!("ELF cache hit for {}", path.display());
                    return Ok(Arc::clone(&entry.file))
                }
                debug!("{} changed on disk; reopening", path.display());
            }
        }

        trace!("ELF cache miss for {}", path.display());
        // Parse without holding the lock, so that other lookups can
        // proceed in the mean time.
        let elf = Arc::new(ElfFile::from_file(path, &file, &self.debug_dirs)?);
        let entry = Entry {
            meta,
            file: Arc::clone(&elf),
        };

        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((_evicted, _entry)) = entries.insert(path.to_path_buf(), entry) {
            trace!("evicted {} from ELF cache", _evicted.display());
        }
        Ok(elf)
    }

    /// Retrieve the number of cached files.
    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl ElfCacheBase for ElfCache {
    fn get_file(&self, path: &Path) -> Option<Arc<ElfFile>> {
        match self.find_or_open(path) {
            Ok(file) => Some(file),
            Err(_err) => {
                debug!("{_err:#}");
                None
            }
        }
    }
}


/// A cache of opened ELF files for use from within signal handlers.
///
/// All storage for cache slots is allocated upfront. The cache takes no
/// locks and is meant to be used by a single thread. Once all slots are
/// taken, lookups of new files fail.
///
/// Looking up a file that is cached already does not allocate. Opening
/// and parsing a file the first time does, so the cache should be kept
/// around between uses.
#[derive(Debug)]
pub struct SignalSafeElfCache {
    slots: RefCell<Vec<Arc<ElfFile>>>,
    capacity: usize,
}

impl SignalSafeElfCache {
    /// Create a cache with room for `capacity` files.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: RefCell::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }
}

impl Default for SignalSafeElfCache {
    fn default() -> Self {
        Self::new(DEFAULT_ELF_CACHE_CAPACITY)
    }
}

impl ElfCacheBase for SignalSafeElfCache {
    fn get_file(&self, path: &Path) -> Option<Arc<ElfFile>> {
        // A failure to borrow means we got re-entered, e.g., by a
        // signal arriving while we were busy.
        let mut slots = self.slots.try_borrow_mut().ok()?;
        if let Some(file) = slots.iter().find(|file| file.path() == path) {
            return Some(Arc::clone(file))
        }

        if slots.len() >= self.capacity {
            return None
        }

        let file = Arc::new(ElfFile::from_file(path, &File::open(path).ok()?, &[]).ok()?);
        let () = slots.push(Arc::clone(&file));
        Some(file)
    }
}


/// Retrieve the process wide default [`ElfCache`].
///
/// The cache is created on first use, with a capacity of
/// [`DEFAULT_ELF_CACHE_CAPACITY`], and lives for the remainder of the
/// process.
pub fn default_elf_cache() -> &'static ElfCache {
    static CACHE: OnceLock<ElfCache> = OnceLock::new();

    CACHE.get_or_init(|| ElfCache::new(DEFAULT_ELF_CACHE_CAPACITY))
}


#[cfg(test)]
mod tests {
    use super::*;

    use std::env::current_exe;
    use std::fs;
    use std::fs::copy;
    use std::ptr;
    use std::thread::sleep;
    use std::time::Duration;

    use tempfile::tempdir;
    use test_log::test;


    /// Check that we cache and share opened files.
    #[test]
    fn lookup() {
        let exe = current_exe().unwrap();
        let cache = ElfCache::new(2);
        let first = cache.get_file(&exe).unwrap();
        let second = cache.get_file(&exe).unwrap();
        assert!(ptr::eq(Arc::as_ptr(&first), Arc::as_ptr(&second)));
        assert_eq!(cache.len(), 1);

        assert!(cache.get_file(Path::new("/does/not/exist")).is_none());
        assert_eq!(cache.len(), 1);
    }

    /// Check that we reopen files that changed on disk.
    #[test]
    fn outdated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("exe");
        let _size = copy(current_exe().unwrap(), &path).unwrap();

        let cache = ElfCache::new(2);
        let first = cache.get_file(&path).unwrap();

        // Make sure that the modification time differs.
        let () = sleep(Duration::from_millis(10));
        let data = fs::read(&path).unwrap();
        let () = fs::remove_file(&path).unwrap();
        let () = fs::write(&path, data).unwrap();

        let second = cache.get_file(&path).unwrap();
        assert!(!ptr::eq(Arc::as_ptr(&first), Arc::as_ptr(&second)));

        let third = cache.get_file(&path).unwrap();
        assert!(ptr::eq(Arc::as_ptr(&second), Arc::as_ptr(&third)));
    }

    /// Check that the least recently used file gets evicted.
    #[test]
    fn eviction() {
        let dir = tempdir().unwrap();
        let paths = ["a", "b"].map(|name| {
            let path = dir.path().join(name);
            let _size = copy(current_exe().unwrap(), &path).unwrap();
            path
        });

        let cache = ElfCache::new(1);
        let a1 = cache.get_file(&paths[0]).unwrap();
        let _b = cache.get_file(&paths[1]).unwrap();
        assert_eq!(cache.len(), 1);
        let a2 = cache.get_file(&paths[0]).unwrap();
        assert!(!ptr::eq(Arc::as_ptr(&a1), Arc::as_ptr(&a2)));
    }

    /// Make sure that a zero capacity cache still hands out files.
    #[test]
    fn zero_capacity() {
        let exe = current_exe().unwrap();
        let cache = ElfCache::new(0);
        let first = cache.get_file(&exe).unwrap();
        let second = cache.get_file(&exe).unwrap();
        assert!(!ptr::eq(Arc::as_ptr(&first), Arc::as_ptr(&second)));
        assert_eq!(cache.len(), 0);
    }

    /// Check that the signal safe cache fails lookups once full.
    #[test]
    fn signal_safe_capacity() {
        let dir = tempdir().unwrap();
        let other = dir.path().join("other");
        let _size = copy(current_exe().unwrap(), &other).unwrap();
        let exe = current_exe().unwrap();

        let cache = SignalSafeElfCache::new(1);
        let first = cache.get_file(&exe).unwrap();
        let second = cache.get_file(&exe).unwrap();
        assert!(ptr::eq(Arc::as_ptr(&first), Arc::as_ptr(&second)));
        assert!(cache.get_file(&other).is_none());
        assert!(SignalSafeElfCache::new(0).get_file(&exe).is_none());
    }

    /// Check that files cached by the signal safe cache outlive the
    /// results handed out.
    #[test]
    fn signal_safe_retention() {
        let exe = current_exe().unwrap();
        let cache = SignalSafeElfCache::default();
        let file = cache.get_file(&exe).unwrap();
        assert_eq!(Arc::strong_count(&file), 2);
        let () = drop(file);

        let file = cache.get_file(&exe).unwrap();
        assert_eq!(file.path(), exe);
        assert_eq!(Arc::strong_count(&file), 2);
    }

    /// Check that the default cache is a singleton.
    #[test]
    fn default_cache() {
        assert!(ptr::eq(default_elf_cache(), default_elf_cache()));
    }
}
