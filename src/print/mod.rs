//! Rendering of symbolized frames as text.
//!
//! A [`Printer`] renders [`SymbolizedFrame`] objects, optionally
//! colored, into one of several [`Sink`]s:
//! - [`StreamSink`] writes to any [`io::Write`][std::io::Write]
//!   implementation
//! - [`FdSink`] writes to a file descriptor through a fixed size
//!   buffer, using only async-signal-safe functions
//! - [`FileSink`] writes to a C `FILE` stream
//! - [`StringSink`] accumulates output in memory
//!
//! ```
//! use crashsym::print::PrintOpts;
//! use crashsym::print::StringPrinter;
//! use crashsym::print::SymbolizePrinter as _;
//! use crashsym::symbolize::SymbolizedFrame;
//!
//! let mut printer = StringPrinter::new(PrintOpts::default());
//! let () = printer.println_frame(&SymbolizedFrame::default());
//! assert!(printer.sink().as_str().ends_with(" (not found)\n"));
//! ```

mod format;
mod sink;

use std::fmt::Write as _;
use std::io;
use std::mem::size_of;
use std::mem::MaybeUninit;
use std::os::unix::io::RawFd;
use std::str;

pub use format::AddressFormatter;
pub use sink::FdSink;
pub use sink::FileSink;
pub use sink::Sink;
pub use sink::StreamSink;
pub use sink::StringSink;

use crate::demangle::demangle;
use crate::symbolize::SymbolizedFrame;
use crate::util::is_colorful_terminal;
use crate::util::StackWriter;
use crate::Addr;

use self::format::write_hex;


/// The size of the buffer used for demangling symbol names.
const DEMANGLE_BUFFER_SIZE: usize = 2048;
const PADDING: &str = "                       ";
/// The width of the indentation of continuation lines, lining them up
/// with function names.
const PAD_WIDTH: usize = PADDING.len() - (16 - 2 * size_of::<Addr>());

const ADDRESS_COLOR: Color = Color::Blue;
const FUNCTION_COLOR: Color = Color::Purple;
const FILE_COLOR: Color = Color::Default;


/// Terminal colors, as ANSI escape sequences.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Color {
    /// Reset to the terminal's default.
    Default,
    /// Red.
    Red,
    /// Green.
    Green,
    /// Yellow.
    Yellow,
    /// Blue.
    Blue,
    /// Cyan.
    Cyan,
    /// White.
    White,
    /// Purple (magenta).
    Purple,
}

impl Color {
    /// Retrieve the escape sequence selecting the color.
    pub fn escape_sequence(self) -> &'static str {
        match self {
            Self::Default => "\x1B[0m",
            Self::Red => "\x1B[31m",
            Self::Green => "\x1B[32m",
            Self::Yellow => "\x1B[33m",
            Self::Blue => "\x1B[34m",
            Self::Cyan => "\x1B[36m",
            Self::White => "\x1B[37m",
            Self::Purple => "\x1B[35m",
        }
    }
}


/// When to emit colors.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ColorMode {
    /// Never emit colors.
    #[default]
    Never,
    /// Always emit colors (unless printing tersely).
    Always,
    /// Emit colors if the output is an interactive terminal that
    /// supports them.
    IfTty,
}


/// Options influencing how frames are printed.
#[derive(Clone, Debug, PartialEq)]
pub struct PrintOpts {
    /// Print only the (demangled) function name, or the address if
    /// there is none, without a trailing newline.
    pub terse: bool,
    /// When to emit colors.
    pub color: ColorMode,
    /// Whether to print the frame's address.
    pub frame_address: bool,
    /// Whether to print source file and line information.
    pub file_and_line: bool,
    /// Print only `file:line` (or `(unknown)`), without address or
    /// function name.
    pub terse_file_and_line: bool,
    /// The struct is non-exhaustive and open to extension.
    #[doc(hidden)]
    pub(crate) _non_exhaustive: (),
}

impl Default for PrintOpts {
    fn default() -> Self {
        Self {
            terse: false,
            color: ColorMode::default(),
            frame_address: true,
            file_and_line: true,
            terse_file_and_line: false,
            _non_exhaustive: (),
        }
    }
}


/// An object-safe interface for printing frames, abstracting over the
/// sink in use.
pub trait SymbolizePrinter {
    /// Print raw `text`.
    fn print(&mut self, text: &str);

    /// Print a single frame.
    fn print_frame(&mut self, frame: &SymbolizedFrame);

    /// Print a single frame, followed by a newline.
    fn println_frame(&mut self, frame: &SymbolizedFrame) {
        let () = self.print_frame(frame);
        let () = self.print("\n");
    }

    /// Print `frames`, one per line, skipping the first `skip` ones.
    fn println_frames(&mut self, frames: &[SymbolizedFrame], skip: usize) {
        for frame in frames.iter().skip(skip) {
            let () = self.println_frame(frame);
        }
    }

    /// Flush buffered output.
    fn flush(&mut self);
}


/// A printer rendering frames into a [`Sink`].
#[derive(Debug)]
pub struct Printer<S> {
    sink: S,
    opts: PrintOpts,
    colorize: bool,
}

/// A printer writing to an [`io::Write`][std::io::Write] implementation.
pub type StreamPrinter<W> = Printer<StreamSink<W>>;
/// A printer writing to a (buffered) file descriptor.
pub type FdPrinter = Printer<FdSink>;
/// A printer writing to a C `FILE` stream.
pub type FilePrinter = Printer<FileSink>;
/// A printer accumulating output in a [`String`].
pub type StringPrinter = Printer<StringSink>;

impl<S> Printer<S>
where
    S: Sink,
{
    /// Create a new [`Printer`] writing to `sink`.
    pub fn with_sink(sink: S, opts: PrintOpts) -> Self {
        let colorize = match opts.color {
            ColorMode::Never => false,
            ColorMode::Always => true,
            ColorMode::IfTty => !opts.terse && sink.fd().is_some_and(is_colorful_terminal),
        };

        Self {
            sink,
            opts,
            colorize,
        }
    }

    /// Retrieve the options in use.
    #[inline]
    pub fn opts(&self) -> &PrintOpts {
        &self.opts
    }

    /// Retrieve the underlying sink.
    #[inline]
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Retrieve the underlying sink.
    #[inline]
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Destroy the printer, returning the underlying sink.
    pub fn into_sink(self) -> S {
        self.sink
    }

    fn set_color(&mut self, color: Color) {
        if self.colorize {
            let () = self.sink.write_str(color.escape_sequence());
        }
    }

    fn print_name(&mut self, name: &str) {
        let mut buffer = [MaybeUninit::<u8>::uninit(); DEMANGLE_BUFFER_SIZE];
        let demangled = demangle(name, &mut buffer);
        let name = if demangled.is_empty() { name } else { demangled };
        let () = self.sink.write_str(name);
    }

    fn print_terse(&mut self, frame: &SymbolizedFrame) {
        match frame.name() {
            Some(name) if frame.found && !name.is_empty() => self.print_name(name),
            _ => {
                let mut buffer = [b'0'; 2 + 2 * size_of::<Addr>()];
                let (prefix, digits) = buffer.split_at_mut(2);
                let () = prefix.copy_from_slice(b"0x");
                let () = write_hex(frame.addr, digits);
                let () = self
                    .sink
                    .write_str(str::from_utf8(&buffer).unwrap_or_default());
            }
        }
    }

    fn print_location(&mut self, frame: &SymbolizedFrame) {
        let terse = self.opts.terse_file_and_line;
        let location = &frame.location;

        let () = self.set_color(FILE_COLOR);
        if let Some(file) = &location.file {
            if !terse {
                let () = self.sink.write_str("\n");
                let () = self.sink.write_str(&PADDING[..PAD_WIDTH]);
            }
            let () = self.sink.write_str(file);

            let mut buffer = [MaybeUninit::<u8>::uninit(); 16];
            let mut writer = StackWriter::new(&mut buffer);
            let _result = write!(writer, ":{}", location.line);
            let () = self.sink.write_str(writer.into_str());
        } else if terse {
            let () = self.sink.write_str("(unknown)");
        }

        if let Some(main_file) = &location.main_file {
            if !terse && location.file.as_ref() != Some(main_file) {
                let () = self.sink.write_str("\n");
                let () = self.sink.write_str(&PADDING[..PAD_WIDTH]);
                let () = self.sink.write_str("-> ");
                let () = self.sink.write_str(main_file);
            }
        }
    }

    fn print_verbose(&mut self, frame: &SymbolizedFrame) {
        if self.opts.frame_address && !self.opts.terse_file_and_line {
            let () = self.set_color(ADDRESS_COLOR);
            let mut formatter = AddressFormatter::new();
            let () = self.sink.write_str(formatter.format(frame.addr));
        }

        let () = self.set_color(FUNCTION_COLOR);
        if !frame.found {
            let () = self.sink.write_str(" (not found)");
            return
        }

        if !self.opts.terse_file_and_line {
            match frame.name() {
                Some(name) if !name.is_empty() => {
                    let () = self.sink.write_str(" ");
                    let () = self.print_name(name);
                }
                _ => self.sink.write_str(" (unknown)"),
            }
        }

        if self.opts.file_and_line {
            let () = self.print_location(frame);
        }
    }
}

impl<S> SymbolizePrinter for Printer<S>
where
    S: Sink,
{
    fn print(&mut self, text: &str) {
        let () = self.sink.write_str(text);
    }

    fn print_frame(&mut self, frame: &SymbolizedFrame) {
        if self.opts.terse {
            return self.print_terse(frame)
        }

        let () = self.print_verbose(frame);
        let () = self.set_color(Color::Default);
    }

    fn flush(&mut self) {
        let () = self.sink.flush();
    }
}

impl<W> StreamPrinter<W>
where
    W: io::Write,
{
    /// Create a new [`StreamPrinter`] writing to `writer`.
    pub fn new(writer: W, opts: PrintOpts) -> Self {
        Self::with_sink(StreamSink::new(writer), opts)
    }
}

impl FdPrinter {
    /// Create a new [`FdPrinter`] writing to `fd`, buffering up to
    /// `buffer_size` bytes.
    pub fn new(fd: RawFd, opts: PrintOpts, buffer_size: usize) -> Self {
        Self::with_sink(FdSink::with_buffer_size(fd, buffer_size), opts)
    }
}

impl FilePrinter {
    /// Create a new [`FilePrinter`] writing to `file`.
    ///
    /// # Safety
    /// `file` has to be a valid and open `FILE` stream for the lifetime
    /// of the printer.
    pub unsafe fn new(file: *mut libc::FILE, opts: PrintOpts) -> Self {
        // SAFETY: The caller upholds the contract.
        Self::with_sink(unsafe { FileSink::new(file) }, opts)
    }
}

impl StringPrinter {
    /// Create a new [`StringPrinter`].
    pub fn new(opts: PrintOpts) -> Self {
        Self::with_sink(StringSink::new(), opts)
    }
}
