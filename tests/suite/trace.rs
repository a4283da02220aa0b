use std::ffi::c_int;
use std::fs::File;
use std::io::Read as _;
use std::io::Seek as _;
use std::io::SeekFrom;
use std::mem::zeroed;
use std::os::unix::io::AsRawFd as _;
use std::ptr;
use std::sync::atomic::AtomicPtr;
use std::sync::atomic::Ordering;
use std::thread;

use crashsym::print::PrintOpts;
use crashsym::print::StringPrinter;
use crashsym::symbolize::FrameArray;
use crashsym::trace::get_stack_trace_safe;
use crashsym::trace::FastStackTracePrinter;
use crashsym::trace::SafeStackTracePrinter;
use crashsym::trace::UnsafeSelfAllocateStackTracePrinter;
use crashsym::trace::MAX_STACK_TRACE_DEPTH;

use tempfile::tempfile;
use test_fork::fork;
use test_log::test;


/// The printer used by our signal handler.
static PRINTER: AtomicPtr<SafeStackTracePrinter> = AtomicPtr::new(ptr::null_mut());


fn read_back(file: &mut File) -> String {
    let mut content = String::new();
    let _pos = file.seek(SeekFrom::Start(0)).unwrap();
    let _count = file.read_to_string(&mut content).unwrap();
    content
}

extern "C" fn print_trace_on_signal(_signal: c_int) {
    let printer = PRINTER.load(Ordering::Acquire);
    // SAFETY: The pointer is set before the signal handler is installed
    //         and stays valid for the remainder of the process.
    if let Some(printer) = unsafe { printer.as_mut() } {
        let () = printer.print_stack_trace(true);
    }
}

#[inline(never)]
fn print_on_alt_stack(printer: &mut UnsafeSelfAllocateStackTracePrinter) {
    printer.print_stack_trace(true)
}


/// Check that we can print a stack trace from within a signal handler.
#[fork]
#[test]
fn trace_from_signal_handler() {
    let mut file = tempfile().unwrap();
    let printer = Box::new(SafeStackTracePrinter::new(file.as_raw_fd()));
    let () = PRINTER.store(Box::into_raw(printer), Ordering::Release);

    let rc = unsafe {
        let mut action = zeroed::<libc::sigaction>();
        action.sa_sigaction = print_trace_on_signal as extern "C" fn(c_int) as usize;
        let _rc = libc::sigemptyset(&mut action.sa_mask);
        libc::sigaction(libc::SIGUSR1, &action, ptr::null_mut())
    };
    assert_eq!(rc, 0);

    let rc = unsafe { libc::raise(libc::SIGUSR1) };
    assert_eq!(rc, 0);

    let output = read_back(&mut file);
    let first = output.lines().next().unwrap();
    assert!(first.contains("print_trace_on_signal"), "{output}");
    assert!(output.contains("trace_from_signal_handler"), "{output}");
}

/// Check that a stack trace can be symbolized even if little stack space
/// is left on the current one.
#[test]
fn trace_with_small_stack() {
    let file = tempfile().unwrap();
    let fd = file.as_raw_fd();
    let mut printer = UnsafeSelfAllocateStackTracePrinter::new(fd);

    let () = thread::Builder::new()
        .stack_size(64 * 1024)
        .spawn(move || print_on_alt_stack(&mut printer))
        .unwrap()
        .join()
        .unwrap();

    let mut file = file;
    let output = read_back(&mut file);
    let first = output.lines().next().unwrap();
    assert!(first.contains("print_on_alt_stack"), "{output}");
}

/// Check that nothing is printed if the alternate stack cannot be
/// mapped.
#[cfg(all(target_os = "linux", target_env = "gnu", target_arch = "x86_64"))]
#[fork]
#[test]
fn trace_without_alt_stack() {
    let mut file = tempfile().unwrap();
    let mut printer = UnsafeSelfAllocateStackTracePrinter::new(file.as_raw_fd());
    // Set up any lazily initialized unwinder state up front.
    let mut frames = Box::<FrameArray<MAX_STACK_TRACE_DEPTH>>::default();
    assert!(get_stack_trace_safe(&mut *frames));

    let mut limit = unsafe { zeroed::<libc::rlimit>() };
    let rc = unsafe { libc::getrlimit(libc::RLIMIT_AS, &mut limit) };
    assert_eq!(rc, 0);
    // With no address space left, mapping the stack fails.
    let exhausted = libc::rlimit {
        rlim_cur: 0,
        rlim_max: limit.rlim_max,
    };
    let rc = unsafe { libc::setrlimit(libc::RLIMIT_AS, &exhausted) };
    assert_eq!(rc, 0);
    let () = print_on_alt_stack(&mut printer);
    let rc = unsafe { libc::setrlimit(libc::RLIMIT_AS, &limit) };
    assert_eq!(rc, 0);

    assert_eq!(read_back(&mut file), "");
}

/// Check that the fast printer can be used with an arbitrary printer.
#[test]
fn fast_trace_to_string() {
    let printer = Box::new(StringPrinter::new(PrintOpts::default()));
    let mut printer = FastStackTracePrinter::new(printer);
    let () = printer.print_stack_trace(true);
    let () = printer.print_stack_trace(false);
    assert_ne!(format!("{printer:?}"), "");
}
