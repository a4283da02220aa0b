use std::os::unix::io::RawFd;

use super::get_stack_trace_safe;
use super::SafeStackTracePrinter;
use super::CAPTURE_ERROR;


/// The size of the alternate stack, including guard pages.
const STACK_SIZE: usize = 1 << 20;


#[cfg(all(target_os = "linux", target_env = "gnu", target_arch = "x86_64"))]
mod sys {
    use std::ffi::c_int;
    use std::ffi::c_void;
    use std::mem::transmute;
    use std::mem::MaybeUninit;
    use std::ptr;

    use super::SafeStackTracePrinter;


    /// An anonymous memory mapping usable as stack, with inaccessible
    /// guard pages at both ends.
    pub(super) struct StackMapping {
        addr: *mut c_void,
        size: usize,
        page_size: usize,
        upper: usize,
    }

    impl StackMapping {
        pub fn new(size: usize, page_size: usize) -> Option<Self> {
            if page_size == 0 || page_size.checked_mul(2)? >= size {
                return None
            }

            let addr = unsafe {
                libc::mmap(
                    ptr::null_mut(),
                    size,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_STACK,
                    -1,
                    0,
                )
            };
            if addr == libc::MAP_FAILED {
                return None
            }

            // From here on the mapping is released on every return.
            let mapping = Self {
                addr,
                size,
                page_size,
                upper: ((size - 1) / page_size) * page_size,
            };

            let rc = unsafe { libc::mprotect(mapping.addr, page_size, libc::PROT_NONE) };
            if rc != 0 {
                return None
            }

            let rc = unsafe {
                libc::mprotect(
                    mapping.addr.cast::<u8>().add(mapping.upper).cast(),
                    size - mapping.upper,
                    libc::PROT_NONE,
                )
            };
            if rc != 0 {
                return None
            }
            Some(mapping)
        }

        /// The usable part of the mapping, between the guard pages.
        pub fn stack(&self) -> (*mut c_void, usize) {
            let base = unsafe { self.addr.cast::<u8>().add(self.page_size) };
            (base.cast(), self.upper - self.page_size)
        }
    }

    impl Drop for StackMapping {
        fn drop(&mut self) {
            let _rc = unsafe { libc::munmap(self.addr, self.size) };
        }
    }


    extern "C" fn alt_stack_entry(hi: c_int, lo: c_int) {
        let addr = ((hi as u32 as u64) << 32) | (lo as u32 as u64);
        let printer = addr as usize as *mut SafeStackTracePrinter;
        // SAFETY: The pointer was created from a mutable reference in
        //         `run_on_alt_stack`, which is blocked until we return.
        let printer = unsafe { &mut *printer };
        let () = printer.print_symbolized_stack_trace();
    }

    /// Symbolize and print the frames captured in `printer` on a freshly
    /// mapped stack.
    ///
    /// Nothing is printed if the stack could not be set up.
    pub(super) fn run_on_alt_stack(printer: &mut SafeStackTracePrinter, page_size: usize) {
        let mut cur = MaybeUninit::<libc::ucontext_t>::zeroed();
        let mut alt = MaybeUninit::<libc::ucontext_t>::zeroed();
        if unsafe { libc::getcontext(alt.as_mut_ptr()) } != 0 {
            return
        }

        let mapping = if let Some(mapping) = StackMapping::new(super::STACK_SIZE, page_size) {
            mapping
        } else {
            return
        };

        // SAFETY: `getcontext` initialized the context.
        let alt = unsafe { alt.assume_init_mut() };
        let (stack, stack_size) = mapping.stack();
        alt.uc_link = cur.as_mut_ptr();
        alt.uc_stack.ss_sp = stack;
        alt.uc_stack.ss_size = stack_size;
        alt.uc_stack.ss_flags = 0;

        // `makecontext` only passes `int` arguments, so the pointer is
        // split into two halves.
        let addr = printer as *mut SafeStackTracePrinter as usize as u64;
        let hi = (addr >> 32) as u32 as c_int;
        let lo = addr as u32 as c_int;
        let entry = alt_stack_entry as extern "C" fn(c_int, c_int);

        // SAFETY: `alt` is initialized and refers to a valid stack, and
        //         the entry point consumes exactly the two arguments
        //         passed.
        let () = unsafe {
            libc::makecontext(
                alt,
                transmute::<extern "C" fn(c_int, c_int), extern "C" fn()>(entry),
                2,
                hi,
                lo,
            )
        };
        // Once the entry point returns we continue at `uc_link`, i.e.,
        // right here.
        let _rc = unsafe { libc::swapcontext(cur.as_mut_ptr(), alt) };
    }
}


/// A stack trace printer symbolizing on a separately allocated stack.
///
/// Symbolization requires a fair amount of stack space. If a stack trace
/// is to be printed because of a stack overflow, this space may not be
/// available. This printer captures the stack trace in place but then
/// switches to a 1 MiB stack mapped for the occasion, protected by guard
/// pages, before symbolizing and printing. If the stack cannot be set
/// up, nothing is printed.
///
/// On targets without support for switching stacks, symbolization
/// happens in place.
#[derive(Debug)]
pub struct UnsafeSelfAllocateStackTracePrinter {
    inner: SafeStackTracePrinter,
    page_size: usize,
}

impl UnsafeSelfAllocateStackTracePrinter {
    /// Create a new [`UnsafeSelfAllocateStackTracePrinter`] writing to
    /// `fd`.
    pub fn new(fd: RawFd) -> Self {
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        Self {
            inner: SafeStackTracePrinter::new(fd),
            page_size: usize::try_from(page_size).unwrap_or(0),
        }
    }

    #[cfg(all(target_os = "linux", target_env = "gnu", target_arch = "x86_64"))]
    fn print_symbolized_stack_trace(&mut self) {
        sys::run_on_alt_stack(&mut self.inner, self.page_size)
    }

    #[cfg(not(all(target_os = "linux", target_env = "gnu", target_arch = "x86_64")))]
    fn print_symbolized_stack_trace(&mut self) {
        let _page_size = self.page_size;
        self.inner.print_symbolized_stack_trace()
    }

    /// Print the current thread's stack trace.
    ///
    /// If `symbolize` is `false`, only raw addresses are printed and no
    /// stack switch happens.
    #[inline(never)]
    pub fn print_stack_trace(&mut self, symbolize: bool) {
        if !get_stack_trace_safe(self.inner.frames_mut()) {
            let () = self.inner.print(CAPTURE_ERROR);
        } else if symbolize {
            let () = self.print_symbolized_stack_trace();
        } else {
            let () = self.inner.print_unsymbolized_stack_trace();
        }
        let () = self.inner.flush();
    }
}
