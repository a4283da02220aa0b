//! Functionality for symbolizing addresses.
//!
//! This module contains functionality for symbolizing addresses of the
//! running process, i.e., finding symbol names and source code
//! locations based on "raw" addresses.
//!
//! For example, here we symbolize the calling function's own address:
//! ```no_run
//! use crashsym::symbolize::LocationInfoMode;
//! use crashsym::symbolize::SymbolizedFrame;
//! use crashsym::Addr;
//! use crashsym::Symbolizer;
//!
//! let addrs = [main as Addr];
//! let mut frames = [SymbolizedFrame::default()];
//!
//! let symbolizer = Symbolizer::builder()
//!     .set_mode(LocationInfoMode::Full)
//!     .build();
//! let count = symbolizer.symbolize(&addrs, &mut frames);
//!
//! for frame in &frames[..count] {
//!     match (frame.found, frame.name(), frame.location.file.as_deref()) {
//!         (true, Some(name), Some(file)) => {
//!             println!("{:#x}: {name} at {file}:{}", frame.addr, frame.location.line)
//!         }
//!         (true, Some(name), None) => println!("{:#x}: {name}", frame.addr),
//!         _ => println!("{:#x}: <no-symbol>", frame.addr),
//!     }
//! }
//! ```

mod cache;
mod symbolizer;
mod text;

use std::array;
use std::sync::Arc;

pub use symbolizer::Builder;
pub use symbolizer::Symbolizer;
pub use text::FrameStr;

pub(crate) use cache::SymbolCache;

use crate::Addr;
use crate::ElfFile;


/// The maximum number of inline frames reported per address.
pub const MAX_INLINE_FRAMES: usize = 10;


/// How much source code location information to look up.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum LocationInfoMode {
    /// Report symbol names only.
    Disabled,
    /// Report the file and line of an address, without considering
    /// inlined functions.
    #[default]
    Fast,
    /// Like [`Fast`][Self::Fast], but additionally report the
    /// compilation unit's main file.
    Full,
    /// Like [`Full`][Self::Full], but additionally expand inlined
    /// functions into separate frames. The frame of the outermost
    /// function then reports the call site of the inlined code.
    FullWithInline,
}


/// Source code location information of a frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LocationInfo {
    /// The source file, if known.
    pub file: Option<FrameStr>,
    /// The line number in `file`; only meaningful if `file` is set.
    pub line: u32,
    /// The primary source file of the compilation unit the frame
    /// belongs to.
    pub main_file: Option<FrameStr>,
}

impl LocationInfo {
    /// Check whether source file and line are available.
    #[inline]
    pub fn has_file_and_line(&self) -> bool {
        self.file.is_some()
    }

    /// Check whether the compilation unit's main file is available.
    #[inline]
    pub fn has_main_file(&self) -> bool {
        self.main_file.is_some()
    }
}


/// A symbolized frame.
///
/// A frame that was not found only carries its address.
#[derive(Clone, Debug, Default)]
pub struct SymbolizedFrame {
    /// Whether the address was found in one of the loaded objects.
    pub found: bool,
    /// The address, as seen by the running process.
    pub addr: Addr,
    /// The object the address belongs to.
    pub file: Option<Arc<ElfFile>>,
    /// The (possibly mangled) name of the function.
    pub name: Option<FrameStr>,
    /// Source code location information.
    pub location: LocationInfo,
}

impl SymbolizedFrame {
    /// Reset the frame to its default (not found) state.
    #[inline]
    pub fn clear(&mut self) {
        *self = Self::default()
    }

    /// Retrieve the function's name, if known.
    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}


/// A fixed capacity array of addresses and their symbolized frames.
///
/// The array does not allocate, so that it can be filled from within a
/// signal handler.
#[derive(Debug)]
pub struct FrameArray<const N: usize> {
    /// The number of valid entries in `addresses` and `frames`.
    pub frame_count: usize,
    /// The captured addresses.
    pub addresses: [Addr; N],
    /// The symbolized frames, corresponding to `addresses`.
    pub frames: [SymbolizedFrame; N],
}

impl<const N: usize> FrameArray<N> {
    /// The capacity of the array.
    pub const CAPACITY: usize = N;

    /// Retrieve the valid frames.
    #[inline]
    pub fn frames(&self) -> &[SymbolizedFrame] {
        &self.frames[..self.frame_count]
    }
}

impl<const N: usize> Default for FrameArray<N> {
    fn default() -> Self {
        Self {
            frame_count: 0,
            addresses: [0; N],
            frames: array::from_fn(|_| SymbolizedFrame::default()),
        }
    }
}
