use std::cmp::min;
use std::env;
use std::ffi::CStr;
use std::ffi::OsStr;
use std::fmt;
use std::io::Error;
use std::mem::align_of;
use std::mem::size_of;
use std::mem::MaybeUninit;
use std::os::unix::ffi::OsStrExt as _;
use std::os::unix::io::RawFd;
use std::slice;
use std::str;


pub(crate) fn fstat(fd: RawFd) -> Result<libc::stat, Error> {
    let mut dst = MaybeUninit::uninit();
    let rc = unsafe { libc::fstat(fd, dst.as_mut_ptr()) };
    if rc < 0 {
        return Err(Error::last_os_error())
    }

    // SAFETY: The object is initialized on success of `fstat`.
    Ok(unsafe { dst.assume_init() })
}


/// Write all of `data` to the file descriptor `fd`, retrying on
/// partial writes and interruptions.
///
/// Only async-signal-safe functions are used. On error the remaining
/// data are dropped, as there is nobody left to report to.
pub(crate) fn write_all_fd(fd: RawFd, mut data: &[u8]) -> bool {
    while !data.is_empty() {
        let rc = unsafe { libc::write(fd, data.as_ptr().cast(), data.len()) };
        if rc < 0 {
            if Error::last_os_error().raw_os_error() == Some(libc::EINTR) {
                continue
            }
            return false
        }
        if rc == 0 {
            return false
        }
        data = &data[rc as usize..];
    }
    true
}

/// `fsync` the given file descriptor, retrying on interruption.
pub(crate) fn fsync_fd(fd: RawFd) {
    loop {
        let rc = unsafe { libc::fsync(fd) };
        if rc == 0 || Error::last_os_error().raw_os_error() != Some(libc::EINTR) {
            break
        }
    }
}

/// Check whether `fd` refers to a terminal with a `TERM` that is known
/// to understand ANSI escape sequences.
pub(crate) fn is_colorful_terminal(fd: RawFd) -> bool {
    if fd < 0 || unsafe { libc::isatty(fd) } == 0 {
        return false
    }

    match env::var_os("TERM") {
        None => false,
        Some(term) => !term.is_empty() && term != "dumb",
    }
}


#[inline]
pub(crate) fn bytes_to_os_str(bytes: &[u8]) -> &OsStr {
    OsStr::from_bytes(bytes)
}


/// See `find_match_or_lower_bound`, but allow the user to pass in a comparison
/// function for increased flexibility.
pub(crate) fn find_match_or_lower_bound_by<T, U, F>(slice: &[T], item: U, mut f: F) -> Option<usize>
where
    U: Ord,
    F: FnMut(&T) -> U,
{
    let idx = slice.partition_point(|e| f(e) < item);

    // At this point `idx` references the first item greater or equal to the one
    // we are looking for.

    if let Some(e) = slice.get(idx) {
        // If the item at `idx` is equal to what we were looking for, we are
        // trivially done, as it's guaranteed to be the first one to match.
        if f(e) == item {
            return Some(idx)
        }
    }

    // Otherwise `idx` points to a "greater" item. Hence, we pick the previous
    // one, but then have to scan backwards for as long as we see this one item,
    // so that we end up reporting the index of the first of all equal ones.
    let idx = idx.checked_sub(1)?;
    let cmp_e = f(slice.get(idx)?);

    for i in (0..idx).rev() {
        let e = slice.get(i)?;
        if f(e) != cmp_e {
            return Some(i + 1)
        }
    }
    Some(idx)
}

/// Perform a binary search on a slice, returning the index of the match (if
/// found) or the one of the previous item (if any), taking into account
/// duplicates.
///
/// This functionality is useful for cases where we compare elements with a
/// size, such as ranges, and an address to search for can be covered by a range
/// whose start is before the item to search for.
#[cfg(test)]
pub(crate) fn find_match_or_lower_bound<T>(slice: &[T], item: T) -> Option<usize>
where
    T: Copy + Ord,
{
    find_match_or_lower_bound_by(slice, item, |e| *e)
}


/// A type implementing `fmt::Write` for a fixed, caller provided slice of
/// memory. Output exceeding the buffer is silently truncated (at a
/// character boundary).
pub(crate) struct StackWriter<'buf> {
    /// The underlying buffer.
    buffer: &'buf mut [MaybeUninit<u8>],
    /// The total number of bytes written to `buffer`.
    written: usize,
}

impl<'buf> StackWriter<'buf> {
    #[inline]
    pub(crate) fn new(buffer: &'buf mut [MaybeUninit<u8>]) -> Self {
        Self { buffer, written: 0 }
    }

    /// Retrieve the text written so far.
    #[inline]
    pub(crate) fn into_str(self) -> &'buf str {
        let slice = &self.buffer[0..self.written];
        // SAFETY: This type guarantees that `written` bytes have been
        //         initialized in the buffer.
        let bytes = unsafe { &*(slice as *const [MaybeUninit<u8>] as *const [u8]) };
        // We only ever copy complete characters, so this conversion is
        // not expected to fail.
        str::from_utf8(bytes).unwrap_or_default()
    }
}

impl fmt::Write for StackWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let mut len = min(s.len(), self.buffer.len() - self.written);
        while !s.is_char_boundary(len) {
            len -= 1;
        }

        let ptr = self.buffer[self.written..].as_mut_ptr().cast::<u8>();
        // SAFETY: Both source and destination are valid for reads and are
        //         properly aligned as they originate from references. They
        //         cannot overlap because this method has exclusive access
        //         to the buffer we write to.
        let () = unsafe { ptr.copy_from_nonoverlapping(s.as_ptr(), len) };

        self.written += len;
        Ok(())
    }
}


/// A marker trait for "plain old data" data types.
///
/// # Safety
/// Only safe to implement for types that are valid for any bit pattern.
pub(crate) unsafe trait Pod {}

unsafe impl Pod for u8 {}
unsafe impl Pod for u16 {}
unsafe impl Pod for u32 {}
unsafe impl Pod for u64 {}

/// An trait providing utility functions for reading data from a byte buffer.
pub(crate) trait ReadRaw<'data> {
    /// Ensure that `len` bytes are available for consumption.
    fn ensure(&self, len: usize) -> Option<()>;

    /// Consume and return `len` bytes.
    fn read_slice(&mut self, len: usize) -> Option<&'data [u8]>;

    /// Read a NUL terminated string.
    fn read_cstr(&mut self) -> Option<&'data CStr>;

    /// Advance the read pointer by `cnt` bytes.
    #[inline]
    fn advance(&mut self, cnt: usize) -> Option<()> {
        let _slice = self.read_slice(cnt)?;
        Some(())
    }

    /// Read anything implementing `Pod`.
    #[inline]
    fn read_pod<T>(&mut self) -> Option<T>
    where
        T: Pod,
    {
        let data = self.read_slice(size_of::<T>())?;
        // SAFETY: `T` is `Pod` and hence valid for any bit pattern. The pointer
        //         is guaranteed to be valid and to point to memory of at least
        //         `sizeof(T)` bytes.
        let value = unsafe { data.as_ptr().cast::<T>().read_unaligned() };
        Some(value)
    }

    /// Read a reference to something implementing `Pod`.
    #[inline]
    fn read_pod_ref<T>(&mut self) -> Option<&'data T>
    where
        T: Pod,
    {
        let data = self.read_slice(size_of::<T>())?;
        let ptr = data.as_ptr();

        if ptr.align_offset(align_of::<T>()) == 0 {
            // SAFETY: `T` is `Pod` and hence valid for any bit pattern. The pointer
            //         is guaranteed to be valid and to point to memory of at least
            //         `sizeof(T)` bytes. We know it is properly aligned
            //         because we checked that.
            unsafe { ptr.cast::<T>().as_ref() }
        } else {
            None
        }
    }

    /// Read a reference to something implementing `Pod`.
    #[inline]
    fn read_pod_slice_ref<T>(&mut self, count: usize) -> Option<&'data [T]>
    where
        T: Pod,
    {
        let data = self.read_slice(size_of::<T>().checked_mul(count)?)?;
        let ptr = data.as_ptr();

        if ptr.align_offset(align_of::<T>()) == 0 {
            // SAFETY: `T` is `Pod` and hence valid for any bit pattern. The pointer
            //         is guaranteed to be valid and to point to memory of at least
            //         `sizeof(T)` bytes. We know it is properly aligned
            //         because we checked that.
            Some(unsafe { slice::from_raw_parts(ptr.cast::<T>(), count) })
        } else {
            None
        }
    }

    /// Read a `u32` value.
    #[inline]
    fn read_u32(&mut self) -> Option<u32> {
        self.read_pod::<u32>()
    }

    /// Read a `u64` value.
    #[inline]
    fn read_u64(&mut self) -> Option<u64> {
        self.read_pod::<u64>()
    }
}

impl<'data> ReadRaw<'data> for &'data [u8] {
    #[inline]
    fn ensure(&self, len: usize) -> Option<()> {
        if len > self.len() {
            return None
        }
        Some(())
    }

    #[inline]
    fn read_slice(&mut self, len: usize) -> Option<&'data [u8]> {
        self.ensure(len)?;
        let (a, b) = self.split_at(len);
        *self = b;
        Some(a)
    }

    #[inline]
    fn read_cstr(&mut self) -> Option<&'data CStr> {
        let idx = self.iter().position(|byte| *byte == b'\0')?;
        CStr::from_bytes_with_nul(self.read_slice(idx + 1)?).ok()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    use std::fmt::Write as _;
    use std::os::unix::io::AsRawFd as _;

    use tempfile::tempfile;
    use test_log::test;


    /// Make sure that `[u8]::ensure` works as expected.
    #[test]
    fn u8_slice_len_ensurance() {
        let slice = [0u8; 0].as_slice();
        assert_eq!(slice.ensure(0), Some(()));
        assert_eq!(slice.ensure(1), None);

        let slice = [1u8].as_slice();
        assert_eq!(slice.ensure(0), Some(()));
        assert_eq!(slice.ensure(1), Some(()));
        assert_eq!(slice.ensure(2), None);
    }

    /// Check that we can read integers from a slice.
    #[test]
    fn pod_reading() {
        let mut data = Vec::new();
        let () = data.extend_from_slice(&u32::MAX.to_ne_bytes());
        let () = data.extend_from_slice(&1u64.to_ne_bytes());

        let mut raw = data.as_slice();
        assert_eq!(raw.read_u32().unwrap(), u32::MAX);
        assert_eq!(raw.read_u64().unwrap(), 1);
        assert_eq!(raw.read_u32(), None);
    }

    /// Check that we can read references to `Pod`s.
    #[test]
    fn pod_ref_reading() {
        // This test assumes that `u64`'s required alignment is greater
        // than 1.
        assert!(align_of::<u64>() > 1, "{}", align_of::<u64>());

        let mut buffer = [0u8; 64];
        let ptr = buffer.as_mut_ptr();

        let aligned_ptr = match ptr.align_offset(align_of::<u64>()) {
            offset if offset < size_of::<u64>() => unsafe { ptr.add(offset) },
            _ => unreachable!(),
        };

        // Write some data at the aligned location so that we can read
        // it back.
        let () = unsafe { aligned_ptr.cast::<u64>().write(1337) };

        let mut slice = unsafe { slice::from_raw_parts(aligned_ptr, 16) };
        assert_eq!(slice.read_pod_ref::<u64>(), Some(&1337));

        // Make sure that we fail if there is insufficient space.
        let mut slice = unsafe { slice::from_raw_parts(aligned_ptr, 4) };
        assert_eq!(slice.read_pod_ref::<u64>(), None);

        // Now also try with an unaligned pointer. It is guaranteed to
        // be unaligned if we add a one byte offset.
        let mut slice = unsafe { slice::from_raw_parts(aligned_ptr.add(1), 15) };
        assert_eq!(slice.read_pod_ref::<u64>(), None);
    }

    /// Check that we can read a NUL terminated string from a slice.
    #[test]
    fn cstr_reading() {
        let mut slice = b"abc\x001234".as_slice();

        let cstr = slice.read_cstr().unwrap();
        assert_eq!(cstr, CStr::from_bytes_with_nul(b"abc\0").unwrap());
        assert_eq!(slice, b"1234");

        // No terminating NUL byte.
        let mut slice = b"abc".as_slice();
        assert_eq!(slice.read_cstr(), None);
    }

    /// Test that we correctly binary search for a lower bound.
    #[test]
    fn search_lower_bound() {
        let data = [];
        assert_eq!(find_match_or_lower_bound(&data, &0), None);

        let data = [5];
        assert_eq!(find_match_or_lower_bound(&data, 0), None);
        assert_eq!(find_match_or_lower_bound(&data, 4), None);
        assert_eq!(find_match_or_lower_bound(&data, 5), Some(0));
        assert_eq!(find_match_or_lower_bound(&data, 6), Some(0));

        let data = [5, 5, 5];
        assert_eq!(find_match_or_lower_bound(&data, 5), Some(0));

        let data = [4, 5, 5, 5, 5];
        assert_eq!(find_match_or_lower_bound(&data, 5), Some(1));

        let data = [1, 4, 42, 43, 99];
        assert_eq!(find_match_or_lower_bound(&data, 0), None);
        assert_eq!(find_match_or_lower_bound(&data, 1), Some(0));
        assert_eq!(find_match_or_lower_bound(&data, 41), Some(1));
        assert_eq!(find_match_or_lower_bound(&data, 99), Some(4));
        assert_eq!(find_match_or_lower_bound(&data, 1337), Some(4));
    }

    /// Check that `StackWriter` truncates output at character
    /// boundaries.
    #[test]
    fn stack_writer_truncation() {
        let mut buffer = [MaybeUninit::uninit(); 8];
        let mut writer = StackWriter::new(&mut buffer);
        let () = write!(writer, "{}-{}", "abc", 42).unwrap();
        assert_eq!(writer.into_str(), "abc-42");

        let mut buffer = [MaybeUninit::uninit(); 4];
        let mut writer = StackWriter::new(&mut buffer);
        // 'ä' is two bytes wide and does not fit entirely.
        let () = writer.write_str("abcä").unwrap();
        assert_eq!(writer.into_str(), "abc");
    }

    /// Make sure that `write_all_fd` writes everything it is handed.
    #[test]
    fn fd_writing() {
        use std::io::Read as _;
        use std::io::Seek as _;
        use std::io::SeekFrom;

        let mut file = tempfile().unwrap();
        assert!(write_all_fd(file.as_raw_fd(), b"hello "));
        assert!(write_all_fd(file.as_raw_fd(), b"world"));
        let () = fsync_fd(file.as_raw_fd());

        let _pos = file.seek(SeekFrom::Start(0)).unwrap();
        let mut content = String::new();
        let _cnt = file.read_to_string(&mut content).unwrap();
        assert_eq!(content, "hello world");

        assert!(!write_all_fd(-1, b"nope"));
    }

    /// A regular file is never a colorful terminal.
    #[test]
    fn regular_file_not_a_terminal() {
        let file = tempfile().unwrap();
        assert!(!is_colorful_terminal(file.as_raw_fd()));
        assert!(!is_colorful_terminal(-1));
    }
}
