use std::os::unix::io::RawFd;

use crate::elf::SignalSafeElfCache;
use crate::print::ColorMode;
use crate::print::FdPrinter;
use crate::print::PrintOpts;
use crate::print::SymbolizePrinter as _;
use crate::symbolize::FrameArray;
use crate::symbolize::LocationInfoMode;
use crate::Symbolizer;

use super::get_stack_trace_safe;
use super::print_addresses;
use super::CAPTURE_ERROR;
use super::MAX_STACK_TRACE_DEPTH;
use super::SKIP_FRAMES;


/// The size of the output buffer.
const BUFFER_SIZE: usize = 64 * 1024;


/// A stack trace printer usable from within signal handlers.
///
/// All memory required for capturing and printing is allocated when the
/// printer is created. Output is written to a file descriptor, colored
/// if it refers to a terminal.
///
/// ELF files are opened on first use and kept open for the lifetime of
/// the printer, so only the first stack trace printed allocates, for
/// parsing the files involved.
///
/// ```no_run
/// use crashsym::trace::SafeStackTracePrinter;
///
/// // Create the printer ahead of time, e.g., when installing a signal
/// // handler...
/// let mut printer = SafeStackTracePrinter::new(libc::STDERR_FILENO);
/// // ... and use it when things go south.
/// let () = printer.print_stack_trace(true);
/// ```
#[derive(Debug)]
pub struct SafeStackTracePrinter {
    printer: FdPrinter,
    frames: Box<FrameArray<MAX_STACK_TRACE_DEPTH>>,
    elf_cache: SignalSafeElfCache,
}

impl SafeStackTracePrinter {
    /// Create a new [`SafeStackTracePrinter`] writing to `fd`.
    pub fn new(fd: RawFd) -> Self {
        let opts = PrintOpts {
            color: ColorMode::IfTty,
            ..Default::default()
        };

        Self {
            printer: FdPrinter::new(fd, opts, BUFFER_SIZE),
            frames: Box::default(),
            elf_cache: SignalSafeElfCache::default(),
        }
    }

    /// Symbolize and print the previously captured frames.
    ///
    /// This method may run on an alternate stack and so must not capture
    /// anything itself.
    pub(super) fn print_symbolized_stack_trace(&mut self) {
        let symbolizer = Symbolizer::builder()
            .set_elf_cache(&self.elf_cache)
            .set_mode(LocationInfoMode::Full)
            .build();
        let _count = symbolizer.symbolize_array(&mut *self.frames);
        let () = self.printer.println_frames(self.frames.frames(), SKIP_FRAMES);
    }

    /// Print the addresses of previously captured frames, without
    /// symbolizing them.
    pub(super) fn print_unsymbolized_stack_trace(&mut self) {
        let frames = &self.frames;
        let () = print_addresses(&mut self.printer, &frames.addresses[..frames.frame_count]);
    }

    /// Retrieve the buffer to capture frames into.
    #[inline]
    pub(super) fn frames_mut(&mut self) -> &mut FrameArray<MAX_STACK_TRACE_DEPTH> {
        &mut self.frames
    }

    /// Print the current thread's stack trace.
    ///
    /// If `symbolize` is `false`, only raw addresses are printed. Output
    /// is flushed and synced to disk before returning.
    #[inline(never)]
    pub fn print_stack_trace(&mut self, symbolize: bool) {
        if !get_stack_trace_safe(&mut *self.frames) {
            let () = self.print(CAPTURE_ERROR);
        } else if symbolize {
            let () = self.print_symbolized_stack_trace();
        } else {
            let () = self.print_unsymbolized_stack_trace();
        }
        let () = self.flush();
    }

    /// Print raw `text`.
    pub fn print(&mut self, text: &str) {
        let () = self.printer.print(text);
    }

    /// Flush buffered output and sync it to disk.
    pub fn flush(&mut self) {
        let () = self.printer.flush();
        let () = self.printer.sink().sync();
    }
}
