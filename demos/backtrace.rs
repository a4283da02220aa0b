use crashsym::print::PrintOpts;
use crashsym::print::StreamPrinter;
use crashsym::print::SymbolizePrinter as _;
use crashsym::symbolize::FrameArray;
use crashsym::symbolize::LocationInfoMode;
use crashsym::trace::get_stack_trace_safe;
use crashsym::Symbolizer;
use std::io::stdout;


fn symbolize_current_bt() {
    // Retrieve up to 64 stack frames of the calling thread.
    const MAX_CNT: usize = 64;

    let mut frames = Box::<FrameArray<MAX_CNT>>::default();
    if !get_stack_trace_safe(&mut *frames) {
        eprintln!("failed to capture stack trace");
        return
    }

    let symbolizer = Symbolizer::builder()
        .set_mode(LocationInfoMode::FullWithInline)
        .build();
    // Inlined functions are reported as additional frames, so the
    // number of frames may exceed the number of captured addresses.
    let count = symbolizer.symbolize_array(&mut *frames);

    let mut printer = StreamPrinter::new(stdout().lock(), PrintOpts::default());
    // Skip the frame of `get_stack_trace_safe` itself.
    let () = printer.println_frames(&frames.frames[..count], 1);
    let () = printer.flush();
}


#[inline(never)]
fn f() {
    g()
}

#[inline(never)]
fn g() {
    h()
}

#[inline(never)]
fn h() {
    symbolize_current_bt()
}

fn main() {
    f();
}
