use std::borrow::Borrow;
use std::fmt::Debug;
use std::fmt::Display;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;
use std::hash::Hash;
use std::hash::Hasher;
use std::ops::Deref;
use std::sync::Arc;

use crate::ElfFile;


/// A string reported as part of a [`SymbolizedFrame`][super::SymbolizedFrame],
/// such as a function or file name.
///
/// Strings read from an ELF file or its debug information are not
/// copied. Rather, they share ownership of the [`ElfFile`] they were
/// read from, keeping it alive for as long as they are around. Creating
/// and cloning them hence does not allocate.
#[derive(Clone)]
pub struct FrameStr {
    /// The string data.
    // SAFETY: Unless `_owner` is `None`, the string is not actually
    //         static but lives as long as `_owner`. It must never be
    //         handed out with a lifetime exceeding that of `self`.
    text: &'static str,
    /// The file owning the data `text` refers to.
    _owner: Option<Arc<ElfFile>>,
}

impl FrameStr {
    /// Create a `FrameStr` referencing `text`, which is owned by `file`.
    ///
    /// # Safety
    /// `text` has to point into data owned by `file` that stays in place
    /// for as long as `file` is alive.
    pub(crate) unsafe fn borrowed(file: &Arc<ElfFile>, text: &str) -> Self {
        // SAFETY: Keeping a reference to `file` keeps `text` alive, as
        //         guaranteed by the caller.
        let text = unsafe { &*(text as *const str) };
        Self {
            text,
            _owner: Some(Arc::clone(file)),
        }
    }

    /// Retrieve the string.
    #[inline]
    pub fn as_str(&self) -> &str {
        self.text
    }
}

impl From<&'static str> for FrameStr {
    #[inline]
    fn from(text: &'static str) -> Self {
        Self { text, _owner: None }
    }
}

impl Deref for FrameStr {
    type Target = str;

    #[inline]
    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}

impl AsRef<str> for FrameStr {
    #[inline]
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Borrow<str> for FrameStr {
    #[inline]
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

impl PartialEq for FrameStr {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for FrameStr {}

impl PartialEq<str> for FrameStr {
    #[inline]
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for FrameStr {
    #[inline]
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl Hash for FrameStr {
    fn hash<H>(&self, state: &mut H)
    where
        H: Hasher,
    {
        self.as_str().hash(state)
    }
}

impl Debug for FrameStr {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        Debug::fmt(self.as_str(), f)
    }
}

impl Display for FrameStr {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        Display::fmt(self.as_str(), f)
    }
}
