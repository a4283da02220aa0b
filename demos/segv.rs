//! Print a stack trace when the program crashes because of an invalid
//! memory access.

use std::ffi::c_int;
use std::io;
use std::mem::zeroed;
use std::ptr;
use std::sync::atomic::AtomicPtr;
use std::sync::atomic::Ordering;

use anyhow::Context as _;
use anyhow::Result;

use crashsym::trace::UnsafeSelfAllocateStackTracePrinter;


static PRINTER: AtomicPtr<UnsafeSelfAllocateStackTracePrinter> =
    AtomicPtr::new(ptr::null_mut());


extern "C" fn handle_fatal_signal(signal: c_int) {
    let printer = PRINTER.swap(ptr::null_mut(), Ordering::AcqRel);
    // SAFETY: The printer was leaked and is only ever handed out once.
    if let Some(printer) = unsafe { printer.as_mut() } {
        let () = printer.print_stack_trace(true);
    }

    // Re-raise with the default disposition, to terminate as we would
    // have without our handler.
    unsafe {
        let _prev = libc::signal(signal, libc::SIG_DFL);
        let _rc = libc::raise(signal);
    }
}

fn install_handler() -> Result<()> {
    let printer = Box::new(UnsafeSelfAllocateStackTracePrinter::new(libc::STDERR_FILENO));
    let () = PRINTER.store(Box::into_raw(printer), Ordering::Release);

    for signal in [libc::SIGSEGV, libc::SIGBUS] {
        let rc = unsafe {
            let mut action = zeroed::<libc::sigaction>();
            action.sa_sigaction = handle_fatal_signal as extern "C" fn(c_int) as usize;
            action.sa_flags = libc::SA_ONSTACK;
            let _rc = libc::sigemptyset(&mut action.sa_mask);
            libc::sigaction(signal, &action, ptr::null_mut())
        };
        if rc != 0 {
            return Err(io::Error::last_os_error())
                .with_context(|| format!("failed to install handler for signal {signal}"))
        }
    }
    Ok(())
}


#[inline(never)]
fn crash(addr: usize) -> u8 {
    // SAFETY: It isn't; that's the point.
    unsafe { ptr::read_volatile(addr as *const u8) }
}

#[inline(never)]
fn faulty_code() -> u8 {
    crash(0x8)
}

fn main() -> Result<()> {
    let () = install_handler()?;
    println!("{}", faulty_code());
    Ok(())
}
