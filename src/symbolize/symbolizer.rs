use std::fmt::Debug;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;
use std::mem::take;
use std::path::Path;
use std::sync::Arc;

use crate::elf::default_elf_cache;
use crate::elf::ElfCacheBase;
use crate::elf::ElfFile;
use crate::link_map::LoadedObjects;
use crate::link_map::SelfExe;
use crate::util::bytes_to_os_str;
use crate::Addr;

use super::FrameArray;
use super::LocationInfoMode;
use super::SymbolCache;
use super::SymbolizedFrame;
use super::MAX_INLINE_FRAMES;


/// The ELF file cache used by a [`Symbolizer`].
enum ElfCacheRef<'cache> {
    Borrowed(&'cache dyn ElfCacheBase),
    Owned(Box<dyn ElfCacheBase + 'cache>),
}

impl ElfCacheRef<'_> {
    #[inline]
    fn get(&self) -> &dyn ElfCacheBase {
        match self {
            Self::Borrowed(cache) => *cache,
            Self::Owned(cache) => cache.as_ref(),
        }
    }
}


/// Fill in `frame` with information about `addr`, an address inside of
/// `file`.
///
/// `addr` is the address as seen by the process, `file_addr` the same
/// address with the load bias removed.
fn set_symbolized_frame(
    frame: &mut SymbolizedFrame,
    file: &Arc<ElfFile>,
    addr: Addr,
    file_addr: u64,
    mode: LocationInfoMode,
    inline_frames: &mut [SymbolizedFrame],
) {
    let () = frame.clear();
    frame.found = true;
    frame.addr = addr;

    let sym = if let Some(sym) = file.definition_by_address(file_addr) {
        sym
    } else {
        return
    };

    frame.file = Some(Arc::clone(file));
    frame.name = file.symbol_name(&sym);

    let count = file.find_address(file_addr, mode, &mut frame.location, inline_frames);
    for inline_frame in &mut inline_frames[..count] {
        inline_frame.found = true;
        inline_frame.addr = addr;
        inline_frame.file = Some(Arc::clone(file));
    }
}


/// Count the number of leading frames that were found.
#[inline]
fn count_found(frames: &[SymbolizedFrame]) -> usize {
    frames.iter().take_while(|frame| frame.found).count()
}


/// A builder for configurable construction of [`Symbolizer`] objects.
///
/// By default, the process wide [`default_elf_cache`] is used,
/// source locations are looked up in [`LocationInfoMode::Fast`] mode,
/// and symbolization results are not cached.
pub struct Builder<'cache> {
    /// See [`Builder::set_elf_cache`].
    elf_cache: Option<ElfCacheRef<'cache>>,
    /// See [`Builder::set_mode`].
    mode: LocationInfoMode,
    /// See [`Builder::set_symbol_cache_size`].
    symbol_cache_size: usize,
}

impl<'cache> Builder<'cache> {
    /// Set the cache used for opening ELF files.
    pub fn set_elf_cache(mut self, cache: &'cache dyn ElfCacheBase) -> Self {
        self.elf_cache = Some(ElfCacheRef::Borrowed(cache));
        self
    }

    /// Set the cache used for opening ELF files, transferring ownership
    /// of it to the symbolizer.
    pub fn set_owned_elf_cache<C>(mut self, cache: C) -> Self
    where
        C: ElfCacheBase + 'cache,
    {
        self.elf_cache = Some(ElfCacheRef::Owned(Box::new(cache)));
        self
    }

    /// Set how much source code location information to look up.
    pub fn set_mode(mut self, mode: LocationInfoMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the number of addresses for which to cache symbolization
    /// results.
    ///
    /// A size of zero (the default) disables caching.
    pub fn set_symbol_cache_size(mut self, size: usize) -> Self {
        self.symbol_cache_size = size;
        self
    }

    /// Create the [`Symbolizer`] object.
    pub fn build(self) -> Symbolizer<'cache> {
        let Builder {
            elf_cache,
            mode,
            symbol_cache_size,
        } = self;

        Symbolizer {
            elf_cache: elf_cache.unwrap_or_else(|| ElfCacheRef::Borrowed(default_elf_cache())),
            mode,
            symbol_cache: (symbol_cache_size > 0).then(|| SymbolCache::new(symbol_cache_size)),
        }
    }
}

impl Default for Builder<'_> {
    fn default() -> Self {
        Self {
            elf_cache: None,
            mode: LocationInfoMode::default(),
            symbol_cache_size: 0,
        }
    }
}

impl Debug for Builder<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Builder")
            .field("mode", &self.mode)
            .field("symbol_cache_size", &self.symbol_cache_size)
            .finish()
    }
}


/// A symbolizer for addresses of the running process.
///
/// Addresses are looked up in all ELF objects currently loaded by the
/// dynamic linker. Symbolization never fails as a whole: addresses that
/// cannot be attributed to any object are reported as not found.
pub struct Symbolizer<'cache> {
    elf_cache: ElfCacheRef<'cache>,
    mode: LocationInfoMode,
    symbol_cache: Option<SymbolCache>,
}

impl<'cache> Symbolizer<'cache> {
    /// Create a new [`Symbolizer`] using default settings.
    ///
    /// This method is just a short hand for instantiating a
    /// `Symbolizer` from the default [`Builder`].
    #[inline]
    pub fn new() -> Self {
        Builder::default().build()
    }

    /// Retrieve a [`Builder`] object for configurable construction of a
    /// [`Symbolizer`].
    #[inline]
    pub fn builder() -> Builder<'cache> {
        Builder::default()
    }

    /// Replay the cached symbolization result for `frames[idx]`.
    ///
    /// Returns the number of inline frames inserted, or `None` if there
    /// is no cached result or it does not fit.
    fn replay_cached(
        &self,
        frames: &mut [SymbolizedFrame],
        idx: usize,
        addr_count: usize,
    ) -> Option<usize> {
        let cache = self.symbol_cache.as_ref()?;
        let addr = frames[idx].addr;
        cache
            .with_frames(addr, |cached| {
                // The first cached frame already has its slot at `idx`.
                let inline_count = cached.len().saturating_sub(1);
                if cached.is_empty() || inline_count > frames.len() - addr_count {
                    return None
                }

                // Make room for the inline frames right after `idx`.
                let () = frames[idx + 1..addr_count + inline_count].rotate_right(inline_count);
                let () = frames[idx..=idx + inline_count].clone_from_slice(cached);
                Some(inline_count)
            })
            .flatten()
    }

    /// Symbolize `addrs`, storing the result in `frames`.
    ///
    /// `frames[i]` corresponds to `addrs[i]`. Frames that are marked as
    /// found already are skipped, so that calling this method again on
    /// the same frames is a no-op.
    ///
    /// In [`LocationInfoMode::FullWithInline`] mode, slots in `frames`
    /// past the addresses are used to report inlined functions: the
    /// inline frames of an address are inserted in front of it
    /// (innermost first), shifting all subsequent frames back. If there
    /// is insufficient space, fewer inline frames are reported.
    ///
    /// The number of valid frames, i.e., the number of addresses plus
    /// the number of inline frames reported, is returned.
    pub fn symbolize(&self, addrs: &[Addr], frames: &mut [SymbolizedFrame]) -> usize {
        let mut addr_count = addrs.len().min(frames.len());
        let mut remaining = 0;
        for (frame, addr) in frames.iter_mut().zip(&addrs[..addr_count]) {
            if !frame.found {
                let () = frame.clear();
                frame.addr = *addr;
                remaining += 1;
            }
        }

        if remaining == 0 {
            return addr_count
        }

        let objects = if let Some(objects) = LoadedObjects::new() {
            objects
        } else {
            return addr_count
        };
        let self_exe = SelfExe::read();
        let elf_cache = self.elf_cache.get();

        for object in objects {
            if remaining == 0 {
                break
            }

            // The main executable is reported with an empty name.
            let path = if object.name.is_empty() {
                self_exe.path()
            } else {
                Path::new(bytes_to_os_str(object.name.to_bytes()))
            };

            let file = if let Some(file) = elf_cache.get_file(path) {
                file
            } else {
                continue
            };

            let mut i = 0;
            while i < addr_count && remaining != 0 {
                if frames[i].found {
                    i += 1;
                    continue
                }

                if let Some(inline_count) = self.replay_cached(frames, i, addr_count) {
                    addr_count += inline_count;
                    remaining -= 1;
                    i += inline_count + 1;
                    continue
                }

                let addr = frames[i].addr;
                let file_addr = addr.wrapping_sub(object.bias) as u64;
                if file.section_containing_address(file_addr).is_none() {
                    i += 1;
                    continue
                }

                let mut inline_count = 0;
                // Without scratch space we cannot tell whether any inline
                // frames got dropped.
                let mut truncated = self.mode == LocationInfoMode::FullWithInline;
                if self.mode == LocationInfoMode::FullWithInline && frames.len() > addr_count {
                    let max_inline = MAX_INLINE_FRAMES.min(frames.len() - addr_count);
                    let (head, tail) = frames.split_at_mut(addr_count);
                    let scratch = &mut tail[..max_inline];
                    let () = scratch.iter_mut().for_each(SymbolizedFrame::clear);

                    let () =
                        set_symbolized_frame(&mut head[i], &file, addr, file_addr, self.mode, scratch);
                    inline_count = count_found(scratch);
                    // With all slots used there may have been more inline
                    // frames than we could report.
                    truncated = max_inline < MAX_INLINE_FRAMES && inline_count == max_inline;
                    // Move the inline frames right in front of the frame
                    // they were inlined into.
                    let () = frames[i..addr_count + inline_count].rotate_right(inline_count);
                    addr_count += inline_count;
                } else {
                    let () =
                        set_symbolized_frame(&mut frames[i], &file, addr, file_addr, self.mode, &mut []);
                }
                remaining -= 1;

                // A truncated result must not replace a complete one
                // that merely did not fit.
                if let Some(cache) = &self.symbol_cache {
                    if !truncated && !cache.contains(addr) {
                        let () = cache.insert(addr, &frames[i..=i + inline_count]);
                    }
                }
                i += inline_count + 1;
            }
        }

        addr_count
    }

    /// Symbolize the addresses captured in `frames`.
    ///
    /// The number of valid frames is returned. Please refer to
    /// [`Symbolizer::symbolize`] for details.
    pub fn symbolize_array<const N: usize>(&self, frames: &mut FrameArray<N>) -> usize {
        let FrameArray {
            frame_count,
            addresses,
            frames,
        } = frames;
        self.symbolize(&addresses[..*frame_count], frames)
    }

    /// Symbolize a single address.
    ///
    /// Inlined functions are not reported.
    pub fn symbolize_addr(&self, addr: Addr) -> SymbolizedFrame {
        let mut frames = [SymbolizedFrame::default()];
        let _count = self.symbolize(&[addr], &mut frames);
        take(&mut frames[0])
    }

    /// Retrieve the source code location mode in use.
    #[inline]
    pub fn mode(&self) -> LocationInfoMode {
        self.mode
    }
}

impl Default for Symbolizer<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for Symbolizer<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Symbolizer")
            .field("mode", &self.mode)
            .field("symbol_cache", &self.symbol_cache)
            .finish()
    }
}
