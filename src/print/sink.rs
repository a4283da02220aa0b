use std::fmt::Debug;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;
use std::io;
use std::mem;
use std::os::unix::io::RawFd;

use crate::util::fsync_fd;
use crate::util::write_all_fd;


/// A destination for rendered text.
///
/// Sinks are infallible: output that cannot be written is dropped, as
/// there is commonly nobody left to report errors to when printing a
/// stack trace.
pub trait Sink {
    /// Write `text` to the sink.
    fn write_str(&mut self, text: &str);

    /// Flush any buffered output.
    fn flush(&mut self) {}

    /// Retrieve the file descriptor backing the sink, if any.
    ///
    /// The file descriptor is used for deciding whether to emit colors
    /// in [`ColorMode::IfTty`][super::ColorMode::IfTty] mode.
    fn fd(&self) -> Option<RawFd> {
        None
    }
}


/// A sink writing to an [`io::Write`] implementation.
#[derive(Debug)]
pub struct StreamSink<W> {
    writer: W,
}

impl<W> StreamSink<W>
where
    W: io::Write,
{
    /// Create a new [`StreamSink`] writing to `writer`.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Retrieve the wrapped writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W> Sink for StreamSink<W>
where
    W: io::Write,
{
    fn write_str(&mut self, text: &str) {
        let _result = self.writer.write_all(text.as_bytes());
    }

    fn flush(&mut self) {
        let _result = self.writer.flush();
    }
}


/// A sink writing to a file descriptor, optionally through a fixed
/// size buffer.
///
/// Only async-signal-safe functions are used for writing. Buffered
/// output is flushed when the buffer is full, when
/// [`flush`][Sink::flush] is called, and when the sink is dropped.
pub struct FdSink {
    fd: RawFd,
    buffer: Box<[u8]>,
    len: usize,
}

impl FdSink {
    /// Create a new unbuffered [`FdSink`] writing to `fd`.
    pub fn new(fd: RawFd) -> Self {
        Self::with_buffer_size(fd, 0)
    }

    /// Create a new [`FdSink`] writing to `fd`, buffering up to
    /// `buffer_size` bytes.
    ///
    /// The buffer is allocated here, so that no allocation happens
    /// while printing.
    pub fn with_buffer_size(fd: RawFd, buffer_size: usize) -> Self {
        Self {
            fd,
            buffer: vec![0; buffer_size].into_boxed_slice(),
            len: 0,
        }
    }

    /// `fsync` the file descriptor.
    pub fn sync(&self) {
        fsync_fd(self.fd)
    }
}

impl Sink for FdSink {
    fn write_str(&mut self, text: &str) {
        let text = text.as_bytes();
        if text.len() > self.buffer.len() - self.len {
            let () = self.flush();
            let _written = write_all_fd(self.fd, text);
        } else {
            let () = self.buffer[self.len..self.len + text.len()].copy_from_slice(text);
            self.len += text.len();
        }
    }

    fn flush(&mut self) {
        if self.len > 0 {
            let _written = write_all_fd(self.fd, &self.buffer[..self.len]);
            self.len = 0;
        }
    }

    fn fd(&self) -> Option<RawFd> {
        Some(self.fd)
    }
}

impl Drop for FdSink {
    fn drop(&mut self) {
        let () = self.flush();
    }
}

impl Debug for FdSink {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("FdSink")
            .field("fd", &self.fd)
            .field("capacity", &self.buffer.len())
            .field("len", &self.len)
            .finish()
    }
}


/// A sink writing to a C `FILE` stream.
#[derive(Debug)]
pub struct FileSink {
    file: *mut libc::FILE,
}

impl FileSink {
    /// Create a new [`FileSink`] writing to `file`.
    ///
    /// # Safety
    /// `file` has to be a valid and open `FILE` stream for the lifetime
    /// of the sink.
    pub unsafe fn new(file: *mut libc::FILE) -> Self {
        Self { file }
    }
}

impl Sink for FileSink {
    fn write_str(&mut self, text: &str) {
        // SAFETY: `file` is valid per the contract of `FileSink::new`.
        let _count = unsafe { libc::fwrite(text.as_ptr().cast(), 1, text.len(), self.file) };
    }

    fn flush(&mut self) {
        // SAFETY: `file` is valid per the contract of `FileSink::new`.
        let _rc = unsafe { libc::fflush(self.file) };
    }

    fn fd(&self) -> Option<RawFd> {
        // SAFETY: `file` is valid per the contract of `FileSink::new`.
        let fd = unsafe { libc::fileno(self.file) };
        (fd >= 0).then_some(fd)
    }
}


/// A sink accumulating all text in a [`String`].
#[derive(Debug, Default)]
pub struct StringSink {
    buffer: String,
}

impl StringSink {
    /// Create a new, empty [`StringSink`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Retrieve the text written so far.
    pub fn as_str(&self) -> &str {
        &self.buffer
    }

    /// Retrieve and reset the text written so far.
    pub fn take(&mut self) -> String {
        mem::take(&mut self.buffer)
    }
}

impl Sink for StringSink {
    fn write_str(&mut self, text: &str) {
        let () = self.buffer.push_str(text);
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    use std::fs::File;
    use std::io::Read as _;
    use std::io::Seek as _;
    use std::io::SeekFrom;
    use std::os::unix::io::AsRawFd as _;

    use tempfile::tempfile;
    use test_log::test;


    fn read_back(file: &mut File) -> String {
        let mut content = String::new();
        let _pos = file.seek(SeekFrom::Start(0)).unwrap();
        let _count = file.read_to_string(&mut content).unwrap();
        content
    }

    /// Check that buffered output only shows up once flushed.
    #[test]
    fn fd_sink_buffering() {
        let mut file = tempfile().unwrap();
        let mut sink = FdSink::with_buffer_size(file.as_raw_fd(), 8);
        assert_eq!(sink.fd(), Some(file.as_raw_fd()));
        let () = sink.write_str("abc");
        assert_eq!(read_back(&mut file), "");

        // Exceeding the buffer flushes it and writes directly.
        let () = sink.write_str("defghijkl");
        assert_eq!(read_back(&mut file), "abcdefghijkl");

        let () = sink.write_str("xyz");
        let () = sink.flush();
        assert_eq!(read_back(&mut file), "abcdefghijklxyz");
        assert_ne!(format!("{sink:?}"), "");
    }

    /// Make sure that buffered data get flushed on drop.
    #[test]
    fn fd_sink_drop() {
        let mut file = tempfile().unwrap();
        {
            let mut sink = FdSink::with_buffer_size(file.as_raw_fd(), 64);
            let () = sink.write_str("buffered");
            let () = sink.sync();
        }
        assert_eq!(read_back(&mut file), "buffered");

        let mut sink = FdSink::new(file.as_raw_fd());
        let () = sink.write_str("!");
        assert_eq!(read_back(&mut file), "buffered!");
    }

    /// Check that `StreamSink` and `StringSink` collect output.
    #[test]
    fn stream_and_string_sinks() {
        let mut sink = StreamSink::new(Vec::new());
        let () = sink.write_str("foo");
        let () = sink.flush();
        assert_eq!(sink.fd(), None);
        assert_eq!(sink.into_inner(), b"foo");

        let mut sink = StringSink::new();
        let () = sink.write_str("foo");
        let () = sink.write_str("bar");
        assert_eq!(sink.as_str(), "foobar");
        assert_eq!(sink.take(), "foobar");
        assert_eq!(sink.as_str(), "");
    }

    /// Check that `FileSink` writes through the C stream.
    #[test]
    fn file_sink() {
        let mut file = tempfile().unwrap();
        let fd = unsafe { libc::dup(file.as_raw_fd()) };
        assert!(fd >= 0);
        let stream = unsafe { libc::fdopen(fd, c"w".as_ptr()) };
        assert!(!stream.is_null());
        let _guard = scopeguard::guard(stream, |stream| {
            let _rc = unsafe { libc::fclose(stream) };
        });

        let mut sink = unsafe { FileSink::new(stream) };
        assert_eq!(sink.fd(), Some(fd));
        let () = sink.write_str("through stdio");
        let () = sink.flush();
        assert_eq!(read_back(&mut file), "through stdio");
    }
}
