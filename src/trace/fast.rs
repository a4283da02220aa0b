use std::fmt::Debug;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;

use crate::count_loaded_elf_files;
use crate::print::SymbolizePrinter;
use crate::symbolize::FrameArray;
use crate::symbolize::LocationInfoMode;
use crate::ElfCache;
use crate::Symbolizer;

use super::get_stack_trace_safe;
use super::print_addresses;
use super::CAPTURE_ERROR;
use super::MAX_STACK_TRACE_DEPTH;
use super::SKIP_FRAMES;


/// The default number of addresses for which symbolization results are
/// cached by a [`FastStackTracePrinter`].
pub const DEFAULT_SYMBOL_CACHE_SIZE: usize = 10000;


/// A stack trace printer caching opened files and symbolization
/// results, for repeatedly printing stack traces.
///
/// The printer may allocate and take locks, making it unsuitable for
/// use from within signal handlers.
pub struct FastStackTracePrinter {
    printer: Box<dyn SymbolizePrinter>,
    symbolizer: Symbolizer<'static>,
}

impl FastStackTracePrinter {
    /// Create a new [`FastStackTracePrinter`] printing via `printer`,
    /// using the process wide ELF file cache and a symbol cache of
    /// [`DEFAULT_SYMBOL_CACHE_SIZE`] entries.
    pub fn new(printer: Box<dyn SymbolizePrinter>) -> Self {
        Self::with_cache_sizes(printer, 0, DEFAULT_SYMBOL_CACHE_SIZE)
    }

    /// Create a new [`FastStackTracePrinter`] printing via `printer`.
    ///
    /// If `elf_cache_size` is zero, the process wide ELF file cache is
    /// used. Otherwise the printer gets its own cache, large enough for
    /// at least all currently loaded objects.
    pub fn with_cache_sizes(
        printer: Box<dyn SymbolizePrinter>,
        elf_cache_size: usize,
        symbol_cache_size: usize,
    ) -> Self {
        let builder = Symbolizer::builder()
            .set_mode(LocationInfoMode::Full)
            .set_symbol_cache_size(symbol_cache_size);
        let builder = if elf_cache_size == 0 {
            builder
        } else {
            let capacity = count_loaded_elf_files().max(elf_cache_size);
            builder.set_owned_elf_cache(ElfCache::new(capacity))
        };

        Self {
            printer,
            symbolizer: builder.build(),
        }
    }

    /// Print the current thread's stack trace.
    ///
    /// If `symbolize` is `false`, only raw addresses are printed.
    #[inline(never)]
    pub fn print_stack_trace(&mut self, symbolize: bool) {
        let mut frames = FrameArray::<MAX_STACK_TRACE_DEPTH>::default();
        if !get_stack_trace_safe(&mut frames) {
            let () = self.printer.print(CAPTURE_ERROR);
        } else if symbolize {
            let _count = self.symbolizer.symbolize_array(&mut frames);
            let () = self.printer.println_frames(frames.frames(), SKIP_FRAMES);
        } else {
            let () = print_addresses(
                self.printer.as_mut(),
                &frames.addresses[..frames.frame_count],
            );
        }
        let () = self.flush();
    }

    /// Flush buffered output.
    pub fn flush(&mut self) {
        let () = self.printer.flush();
    }
}

impl Debug for FastStackTracePrinter {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("FastStackTracePrinter")
            .field("symbolizer", &self.symbolizer)
            .finish()
    }
}
