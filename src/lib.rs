//! **crashsym** is a library for symbolizing stack traces of the
//! running process, designed to be usable from within fatal signal
//! handlers.
//!
//! Given a sequence of raw return addresses, the [`Symbolizer`] walks
//! the list of objects loaded by the dynamic linker, maps each address
//! into the object containing it, and resolves it to a function name as
//! well as (with the `dwarf` feature) source file, line number, and
//! chains of inlined function calls. Resolved frames can be rendered via
//! one of the [`print`] sinks.
//!
//! The [`trace`] module ties everything together:
//! - [`SafeStackTracePrinter`][trace::SafeStackTracePrinter] captures
//!   and prints the current stack without heap allocation on the
//!   capture path, for use from signal handlers
//! - [`UnsafeSelfAllocateStackTracePrinter`][trace::UnsafeSelfAllocateStackTracePrinter]
//!   additionally moves symbolization onto a freshly mapped, guard
//!   paged stack, so that stack overflows can be reported
//! - [`FastStackTracePrinter`][trace::FastStackTracePrinter] trades
//!   signal safety for caching, for repeated diagnostic dumps
//!
//! ```no_run
//! use crashsym::trace::SafeStackTracePrinter;
//!
//! let mut printer = SafeStackTracePrinter::new(libc::STDERR_FILENO);
//! let () = printer.print_stack_trace(true);
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(not(target_os = "linux"), allow(dead_code, unused_imports))]


mod demangle;
#[cfg(feature = "dwarf")]
mod dwarf;
mod elf;
mod error;
mod link_map;
mod lru;
mod mmap;
pub mod print;
pub mod symbolize;
pub mod trace;
mod util;

pub use crate::elf::default_elf_cache;
pub use crate::elf::ElfCache;
pub use crate::elf::ElfCacheBase;
pub use crate::elf::ElfFile;
pub use crate::elf::SignalSafeElfCache;
pub use crate::elf::DEFAULT_ELF_CACHE_CAPACITY;
pub use crate::error::Error;
pub use crate::error::ErrorExt;
pub use crate::error::ErrorKind;
pub use crate::error::IntoError;
pub use crate::link_map::count_loaded_elf_files;
pub use crate::symbolize::Symbolizer;

/// A result type using our [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A type representing addresses.
pub type Addr = usize;


#[cfg(feature = "tracing")]
#[macro_use]
#[allow(unused_imports)]
mod log {
    pub(crate) use tracing::debug;
    pub(crate) use tracing::error;
    pub(crate) use tracing::info;
    pub(crate) use tracing::instrument;
    pub(crate) use tracing::trace;
    pub(crate) use tracing::warn;
}

#[cfg(not(feature = "tracing"))]
#[macro_use]
#[allow(unused_imports)]
mod log {
    macro_rules! debug {
        ($($args:tt)*) => {{
          if false {
            // Make sure to use `args` to prevent any warnings about
            // unused variables.
            let _args = format_args!($($args)*);
          }
        }};
    }
    pub(crate) use debug;
    pub(crate) use debug as error;
    pub(crate) use debug as info;
    pub(crate) use debug as trace;
    pub(crate) use debug as warn;
}
