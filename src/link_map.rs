//! Enumeration of the ELF objects loaded into the process, as
//! maintained by the dynamic linker.
//!
//! glibc exposes its list of loaded objects via the `_r_debug` structure
//! (see `<link.h>`), which debuggers use as well. Walking it does not
//! allocate and does not take any locks, which makes it usable from
//! within signal handlers.

use std::ffi::CStr;
use std::marker::PhantomData;
use std::path::Path;
use std::ptr::addr_of;

use crate::util::bytes_to_os_str;
use crate::Addr;


#[cfg(all(target_os = "linux", target_env = "gnu"))]
mod sys {
    use std::ffi::c_char;
    use std::ffi::c_int;
    use std::ffi::c_void;

    #[repr(C)]
    pub(super) struct LinkMap {
        /// Difference between the address in the ELF file and the
        /// address in memory.
        pub l_addr: usize,
        /// Absolute file name the object was found in.
        pub l_name: *const c_char,
        /// Dynamic section of the shared object.
        pub l_ld: *const c_void,
        pub l_next: *const LinkMap,
        pub l_prev: *const LinkMap,
    }

    #[repr(C)]
    pub(super) struct RDebug {
        /// Version number of this protocol.
        pub r_version: c_int,
        /// Head of the chain of loaded objects.
        pub r_map: *const LinkMap,
        pub r_brk: usize,
        pub r_state: c_int,
        pub r_ldbase: usize,
    }

    extern "C" {
        pub(super) static _r_debug: RDebug;
    }
}


/// An object loaded by the dynamic linker.
#[derive(Clone, Copy, Debug)]
pub(crate) struct LoadedObject<'map> {
    /// The object's path. The main executable has an empty name.
    pub name: &'map CStr,
    /// The load bias, to be subtracted from run time addresses to get
    /// addresses as used inside the ELF file.
    pub bias: Addr,
}


/// An iterator over the objects currently loaded into the process.
pub(crate) struct LoadedObjects<'map> {
    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    next: *const sys::LinkMap,
    _phantom: PhantomData<&'map ()>,
}

impl LoadedObjects<'_> {
    /// Start iterating over the dynamic linker's object list.
    ///
    /// `None` is returned if the list is unavailable or uses a protocol
    /// version we do not know.
    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    pub fn new() -> Option<Self> {
        // SAFETY: `_r_debug` is provided by the dynamic linker and
        //         lives for the remainder of the process.
        let debug = unsafe { &*addr_of!(sys::_r_debug) };
        if !matches!(debug.r_version, 1 | 2) {
            return None
        }

        Some(Self {
            next: debug.r_map,
            _phantom: PhantomData,
        })
    }

    #[cfg(not(all(target_os = "linux", target_env = "gnu")))]
    pub fn new() -> Option<Self> {
        None
    }
}

impl<'map> Iterator for LoadedObjects<'map> {
    type Item = LoadedObject<'map>;

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    fn next(&mut self) -> Option<Self::Item> {
        // SAFETY: The dynamic linker maintains a well formed, null
        //         terminated list of valid entries.
        let map = unsafe { self.next.as_ref()? };
        self.next = map.l_next;

        let name = if map.l_name.is_null() {
            c""
        } else {
            // SAFETY: `l_name` is a NUL terminated string owned by the
            //         dynamic linker.
            unsafe { CStr::from_ptr(map.l_name) }
        };

        Some(LoadedObject {
            name,
            bias: map.l_addr,
        })
    }

    #[cfg(not(all(target_os = "linux", target_env = "gnu")))]
    fn next(&mut self) -> Option<Self::Item> {
        None
    }
}


/// The path of the running executable.
///
/// The path is read into a fixed size buffer, without heap allocation.
pub(crate) struct SelfExe {
    buffer: [u8; libc::PATH_MAX as usize + 1],
    len: usize,
}

impl SelfExe {
    pub fn read() -> Self {
        let mut slf = Self {
            buffer: [0; libc::PATH_MAX as usize + 1],
            len: 0,
        };

        let rc = unsafe {
            libc::readlink(
                c"/proc/self/exe".as_ptr(),
                slf.buffer.as_mut_ptr().cast(),
                slf.buffer.len() - 1,
            )
        };
        // On failure we report an empty path, which will fail to open
        // and cause the executable to be skipped.
        if rc > 0 {
            slf.len = rc as usize;
        }
        slf
    }

    #[inline]
    pub fn path(&self) -> &Path {
        Path::new(bytes_to_os_str(&self.buffer[..self.len]))
    }
}


/// Count the number of ELF objects currently loaded into the process.
pub fn count_loaded_elf_files() -> usize {
    LoadedObjects::new().map(Iterator::count).unwrap_or(0)
}
