//! Capturing and printing stack traces of the current thread.
//!
//! Three printers of increasing robustness are provided:
//! - [`FastStackTracePrinter`] caches aggressively and is meant for
//!   repeated diagnostic output during regular operation
//! - [`SafeStackTracePrinter`] performs no locking and is usable from
//!   within fatal signal handlers
//! - [`UnsafeSelfAllocateStackTracePrinter`] additionally symbolizes on a
//!   separately mapped stack, so that even stack overflows can be
//!   reported

mod alt_stack;
mod fast;
mod safe;

use std::ptr::addr_of;

pub use alt_stack::UnsafeSelfAllocateStackTracePrinter;
pub use fast::FastStackTracePrinter;
pub use fast::DEFAULT_SYMBOL_CACHE_SIZE;
pub use safe::SafeStackTracePrinter;

use crate::print::AddressFormatter;
use crate::print::SymbolizePrinter;
use crate::symbolize::FrameArray;
use crate::Addr;


/// The maximum number of frames captured by the stack trace printers.
pub const MAX_STACK_TRACE_DEPTH: usize = 100;

/// The number of frames belonging to the capturing machinery: the
/// frame of [`get_stack_trace_safe`] and that of the printer's
/// `print_stack_trace` method.
const SKIP_FRAMES: usize = 2;

const CAPTURE_ERROR: &str = "(error retrieving stack trace)\n";
const SAFE_MODE_NOTICE: &str = "(safe mode, symbolizer not available)\n";


/// Capture the addresses of the current thread's stack into `frames`.
///
/// The first captured frame is the one of this function itself. At
/// most `N` frames are captured. Return addresses are adjusted to point
/// into the call instruction, so that they symbolize to the call site.
///
/// The function neither allocates nor takes locks and may be used from
/// within signal handlers. `false` is returned if no frame could be
/// captured.
#[inline(never)]
pub fn get_stack_trace_safe<const N: usize>(frames: &mut FrameArray<N>) -> bool {
    let marker = 0u8;
    let marker = addr_of!(marker) as usize;
    let mut count = 0;

    let callback = |frame: &backtrace::Frame| {
        if count >= N {
            return false
        }

        // Frames of the unwinder itself live below our own.
        let sp = frame.sp() as usize;
        if !frame.sp().is_null() && sp <= marker {
            return true
        }

        let ip = frame.ip() as Addr;
        if ip == 0 {
            return false
        }
        frames.addresses[count] = ip - 1;
        count += 1;
        true
    };

    // SAFETY: The unwinder backend used on our targets does not require
    //         synchronization.
    let () = unsafe { backtrace::trace_unsynchronized(callback) };

    // Results of an earlier capture must not be taken for those of the
    // new addresses.
    let () = frames.frames[..count]
        .iter_mut()
        .for_each(|frame| frame.found = false);
    frames.frame_count = count;
    count > 0
}


/// Print `addrs` in their raw form, one per line.
fn print_addresses(printer: &mut dyn SymbolizePrinter, addrs: &[Addr]) {
    let () = printer.print(SAFE_MODE_NOTICE);
    let mut formatter = AddressFormatter::new();
    for addr in addrs {
        let () = printer.print(formatter.format(*addr));
        let () = printer.print("\n");
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    use std::hint::black_box;

    use test_log::test;

    use crate::symbolize::SymbolizedFrame;
    use crate::Symbolizer;


    #[inline(never)]
    fn capture_in_callee(frames: &mut FrameArray<MAX_STACK_TRACE_DEPTH>) -> bool {
        get_stack_trace_safe(frames)
    }

    #[inline(never)]
    fn capture_in_other_callee(frames: &mut FrameArray<MAX_STACK_TRACE_DEPTH>) -> bool {
        let captured = get_stack_trace_safe(frames);
        captured && black_box(frames.frame_count) > 0
    }

    fn frame_names(frames: &[SymbolizedFrame]) -> Vec<String> {
        frames
            .iter()
            .map(|frame| frame.name().unwrap_or_default().to_string())
            .collect()
    }

    /// Check that a captured stack trace starts in the capturing
    /// function and continues with its callers.
    #[test]
    fn capture() {
        let mut frames = Box::<FrameArray<MAX_STACK_TRACE_DEPTH>>::default();
        assert!(capture_in_callee(&mut frames));
        assert!(frames.frame_count > 2);

        let symbolizer = Symbolizer::new();
        let count = symbolizer.symbolize_array(&mut *frames);
        assert_eq!(count, frames.frame_count);

        let names = frame_names(frames.frames());
        assert!(names[0].contains("get_stack_trace_safe"), "{names:?}");
        assert!(names[1].contains("capture_in_callee"), "{names:?}");
        assert!(names[2].contains("capture"), "{names:?}");
    }

    /// Check that an array can be reused for capturing, without
    /// symbolization results of the earlier capture leaking into the
    /// later one.
    #[test]
    fn capture_reuse() {
        let symbolizer = Symbolizer::new();
        let mut frames = Box::<FrameArray<MAX_STACK_TRACE_DEPTH>>::default();
        assert!(capture_in_callee(&mut frames));
        let _count = symbolizer.symbolize_array(&mut *frames);
        assert!(frames.frames()[1].found);

        assert!(capture_in_other_callee(&mut frames));
        assert!(frames.frames().iter().all(|frame| !frame.found));

        let count = symbolizer.symbolize_array(&mut *frames);
        assert_eq!(count, frames.frame_count);
        for (frame, addr) in frames.frames().iter().zip(&frames.addresses) {
            assert_eq!(frame.addr, *addr);
        }
        let names = frame_names(frames.frames());
        assert!(names[1].contains("capture_in_other_callee"), "{names:?}");
    }

    /// Check that capturing respects the capacity of the array.
    #[test]
    fn capture_truncation() {
        let mut frames = FrameArray::<1>::default();
        assert!(get_stack_trace_safe(&mut frames));
        assert_eq!(frames.frame_count, 1);
    }
}
