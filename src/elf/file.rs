use std::fmt::Debug;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;
use std::fs::File;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
#[cfg(test)]
use std::sync::atomic::AtomicUsize;
#[cfg(test)]
use std::sync::atomic::Ordering;
#[cfg(feature = "dwarf")]
use std::sync::OnceLock;

#[cfg(feature = "dwarf")]
use crate::dwarf::DwarfResolver;
#[cfg(feature = "dwarf")]
use crate::log::debug;
use crate::symbolize::FrameStr;
use crate::symbolize::LocationInfo;
use crate::symbolize::LocationInfoMode;
use crate::symbolize::SymbolizedFrame;
use crate::ErrorExt as _;
use crate::Result;

use super::parser::ElfParser;
use super::parser::ElfSymbol;
use super::types::Elf64_Shdr;
use super::DEFAULT_DEBUG_DIRS;


/// An opened ELF file, as used for symbolization.
///
/// Objects of this type are shared between caches and symbolized frames
/// via [`Arc`][std::sync::Arc], keeping the data frames refer to alive.
pub struct ElfFile {
    /// The DWARF resolver, created on first use.
    // SAFETY: The resolver references data owned by `parser`. It has to
    //         be listed before it, so that it gets dropped first.
    #[cfg(feature = "dwarf")]
    dwarf: OnceLock<Option<DwarfResolver>>,
    /// The parser for the ELF file.
    parser: ElfParser,
    /// The path the file was opened from.
    path: PathBuf,
    /// The directories to search for separate debug files.
    debug_dirs: Box<[PathBuf]>,
    /// The number of source location lookups performed.
    #[cfg(test)]
    lookups: AtomicUsize,
}

impl ElfFile {
    /// Open the ELF file at `path`.
    ///
    /// Separate debug information files are searched for in the
    /// default debug directories (`/usr/lib/debug` and `/lib/debug`).
    pub fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let debug_dirs = DEFAULT_DEBUG_DIRS
            .iter()
            .map(PathBuf::from)
            .collect::<Vec<_>>();
        Self::open_with_debug_dirs(path, &debug_dirs)
    }

    /// Open the ELF file at `path`, searching `debug_dirs` for separate
    /// debug information files.
    pub fn open_with_debug_dirs<P>(path: P, debug_dirs: &[PathBuf]) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("failed to open ELF file {}", path.display()))?;
        Self::from_file(path, &file, debug_dirs)
    }

    pub(crate) fn from_file(path: &Path, file: &File, debug_dirs: &[PathBuf]) -> Result<Self> {
        let parser = ElfParser::open_file(file)
            .with_context(|| format!("failed to parse ELF file {}", path.display()))?;

        let slf = Self {
            #[cfg(feature = "dwarf")]
            dwarf: OnceLock::new(),
            parser,
            path: path.to_path_buf(),
            debug_dirs: debug_dirs.to_vec().into_boxed_slice(),
            #[cfg(test)]
            lookups: AtomicUsize::new(0),
        };
        Ok(slf)
    }

    /// Retrieve the path the file was opened from.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Find the section occupying `addr` at run time, if any.
    ///
    /// `addr` is an address as used inside the ELF file, i.e., with any
    /// load bias already removed.
    #[inline]
    pub(crate) fn section_containing_address(&self, addr: u64) -> Option<&Elf64_Shdr> {
        self.parser.find_section_containing_addr(addr)
    }

    /// Find the function or variable defined at `addr`.
    #[inline]
    pub(crate) fn definition_by_address(&self, addr: u64) -> Option<ElfSymbol<'_>> {
        self.parser.find_sym(addr)
    }

    /// Retrieve the name of a symbol found by
    /// [`definition_by_address`][Self::definition_by_address].
    ///
    /// The name is not copied but references the mapped file.
    #[inline]
    pub(crate) fn symbol_name<'slf>(
        self: &'slf Arc<Self>,
        sym: &ElfSymbol<'slf>,
    ) -> Option<FrameStr> {
        let name = self.parser.symbol_name(sym)?;
        // SAFETY: Symbol names reside in the memory mapping owned by
        //         `self.parser`.
        Some(unsafe { FrameStr::borrowed(self, name) })
    }

    #[cfg(feature = "dwarf")]
    pub(crate) fn dwarf(&self) -> Option<&DwarfResolver> {
        self.dwarf
            .get_or_init(|| {
                // SAFETY: The resolver is stored in `self` and dropped
                //         before `self.parser`.
                let result = unsafe {
                    DwarfResolver::from_parser(&self.parser, &self.path, &self.debug_dirs)
                };
                match result {
                    Ok(dwarf) => dwarf,
                    Err(_err) => {
                        debug!(
                            "failed to load DWARF information of {}: {_err:#}",
                            self.path.display()
                        );
                        None
                    }
                }
            })
            .as_ref()
    }

    /// Look up source location information for `addr`.
    ///
    /// The number of inline frames written to `inline_frames` is
    /// returned. Only names and locations of those frames are set.
    pub(crate) fn find_address(
        self: &Arc<Self>,
        addr: u64,
        mode: LocationInfoMode,
        location: &mut LocationInfo,
        inline_frames: &mut [SymbolizedFrame],
    ) -> usize {
        #[cfg(test)]
        let _count = self.lookups.fetch_add(1, Ordering::Relaxed);

        if mode == LocationInfoMode::Disabled {
            return 0
        }

        #[cfg(feature = "dwarf")]
        {
            let dwarf = if let Some(dwarf) = self.dwarf() {
                dwarf
            } else {
                return 0
            };

            match dwarf.find_address(self, addr, mode, location, inline_frames) {
                Ok(count) => count,
                Err(_err) => {
                    debug!(
                        "failed to look up {addr:#x} in {}: {_err:#}",
                        self.path.display()
                    );
                    0
                }
            }
        }

        #[cfg(not(feature = "dwarf"))]
        {
            let _unused = (addr, location, inline_frames);
            0
        }
    }

    /// Find the address of the first symbol whose (possibly mangled)
    /// name contains `name`.
    #[cfg(test)]
    pub(crate) fn find_sym_addr(&self, name: &str) -> Option<u64> {
        self.parser.find_sym_addr(name)
    }

    /// Retrieve the number of source location lookups performed so far.
    #[cfg(test)]
    pub(crate) fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }
}

impl Debug for ElfFile {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("ElfFile")
            .field("path", &self.path)
            .finish()
    }
}
