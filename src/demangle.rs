//! Symbol name demangling into caller provided storage.

use std::mem::MaybeUninit;

#[cfg(feature = "demangle")]
use std::fmt::Write as _;

#[cfg(feature = "demangle")]
use crate::util::StackWriter;


/// Demangle a Rust symbol name, if it is one.
#[cfg(feature = "demangle")]
fn demangle_rust<'buf>(name: &str, buffer: &'buf mut [MaybeUninit<u8>]) -> Option<&'buf str> {
    let demangled = rustc_demangle::try_demangle(name).ok()?;
    let mut writer = StackWriter::new(buffer);
    // The alternate format omits the trailing hash.
    let () = write!(writer, "{demangled:#}").ok()?;
    Some(writer.into_str())
}

/// Demangle an Itanium C++ ABI symbol name, if it is one.
#[cfg(feature = "demangle")]
fn demangle_cpp<'buf>(name: &str, buffer: &'buf mut [MaybeUninit<u8>]) -> Option<&'buf str> {
    // Bare type encodings such as `i` would be accepted otherwise.
    if !name.starts_with("_Z") {
        return None
    }

    let symbol = cpp_demangle::Symbol::new(name.as_bytes()).ok()?;
    let mut writer = StackWriter::new(buffer);
    let () = write!(writer, "{symbol}").ok()?;
    Some(writer.into_str())
}


/// Demangle `name` into `buffer`.
///
/// Output that does not fit is truncated. An empty string is returned if
/// `name` is not a mangled Rust or C++ name, or if demangling support
/// is compiled out.
pub(crate) fn demangle<'buf>(name: &str, buffer: &'buf mut [MaybeUninit<u8>]) -> &'buf str {
    #[cfg(feature = "demangle")]
    {
        // Legacy Rust names are valid C++ names as well, so Rust has to
        // come first.
        if rustc_demangle::try_demangle(name).is_ok() {
            return demangle_rust(name, buffer).unwrap_or_default()
        }
        demangle_cpp(name, buffer).unwrap_or_default()
    }

    #[cfg(not(feature = "demangle"))]
    {
        let _unused = (name, buffer);
        ""
    }
}
