mod cache;
mod file;
mod parser;
#[allow(non_camel_case_types)]
mod types;

pub use self::cache::default_elf_cache;
pub use self::cache::ElfCache;
pub use self::cache::ElfCacheBase;
pub use self::cache::SignalSafeElfCache;
pub use self::cache::DEFAULT_ELF_CACHE_CAPACITY;
pub use self::file::ElfFile;
#[cfg(feature = "dwarf")]
pub(crate) use self::parser::ElfParser;
#[cfg(test)]
pub(crate) use self::parser::tests as test_elf;

/// The default directories searched for separate debug information
/// files.
pub(crate) const DEFAULT_DEBUG_DIRS: &[&str] = &["/usr/lib/debug", "/lib/debug"];
