use std::fs::File;
use std::io::Read as _;
use std::io::Seek as _;
use std::io::SeekFrom;
use std::mem::size_of;
use std::os::unix::io::AsRawFd as _;

use crashsym::print::AddressFormatter;
use crashsym::print::FdPrinter;
use crashsym::print::PrintOpts;
use crashsym::print::StreamPrinter;
use crashsym::print::StringPrinter;
use crashsym::print::SymbolizePrinter;
use crashsym::symbolize::SymbolizedFrame;
use crashsym::Addr;
use crashsym::Symbolizer;

use tempfile::tempfile;
use test_log::test;


/// A function we print the symbolized address of.
#[inline(never)]
fn print_target(x: u64) -> u64 {
    x.rotate_left(7)
}

fn read_back(file: &mut File) -> String {
    let mut content = String::new();
    let _pos = file.seek(SeekFrom::Start(0)).unwrap();
    let _count = file.read_to_string(&mut content).unwrap();
    content
}

fn print_to_string(frames: &[SymbolizedFrame], opts: PrintOpts) -> String {
    let mut printer = StringPrinter::new(opts);
    let () = printer.println_frames(frames, 0);
    printer.into_sink().take()
}


/// Check the rendering of a frame symbolized in the default mode.
#[test]
fn print_symbolized_frame() {
    let addr = print_target as Addr;
    let frame = Symbolizer::new().symbolize_addr(addr);
    let output = print_to_string(&[frame.clone()], PrintOpts::default());

    let mut lines = output.lines();
    let first = lines.next().unwrap();
    let mut formatter = AddressFormatter::new();
    let prefix = format!("{} ", formatter.format(addr));
    let name = first.strip_prefix(&prefix).unwrap();
    // Names are printed demangled.
    assert!(name.ends_with("print_target"), "{output}");
    assert!(!name.starts_with("_ZN"), "{output}");

    if let Some(file) = frame.location.file.as_deref() {
        let pad = " ".repeat(23 - (16 - 2 * size_of::<Addr>()));
        let second = lines.next().unwrap();
        assert_eq!(second, format!("{pad}{file}:{}", frame.location.line));
    }
    assert_eq!(lines.next(), None);
    assert!(output.ends_with('\n'));
}

/// Check that all printer flavors produce the same output.
#[test]
fn printer_consistency() {
    let addrs = [print_target as Addr, 0x0, libc::fopen as Addr];
    let mut frames = vec![SymbolizedFrame::default(); addrs.len()];
    let count = Symbolizer::new().symbolize(&addrs, &mut frames);
    let frames = &frames[..count];

    let expected = print_to_string(frames, PrintOpts::default());
    assert!(expected.contains(" (not found)\n"), "{expected}");

    let mut printer = StreamPrinter::new(Vec::new(), PrintOpts::default());
    let () = printer.println_frames(frames, 0);
    let output = printer.into_sink().into_inner();
    assert_eq!(String::from_utf8(output).unwrap(), expected);

    let mut file = tempfile().unwrap();
    let mut printer = FdPrinter::new(file.as_raw_fd(), PrintOpts::default(), 64);
    let () = printer.println_frames(frames, 0);
    let () = printer.flush();
    assert_eq!(read_back(&mut file), expected);
}

/// Check the terse rendering of a mix of found and unknown frames.
#[test]
fn print_terse_frames() {
    let addrs = [0x1234, print_target as Addr];
    let mut frames = vec![SymbolizedFrame::default(); addrs.len()];
    let count = Symbolizer::new().symbolize(&addrs, &mut frames);
    assert_eq!(count, 2);

    let mut opts = PrintOpts::default();
    opts.terse = true;
    let output = print_to_string(&frames, opts);
    let lines = output.lines().collect::<Vec<_>>();
    assert_eq!(
        lines[0],
        format!("0x{:0width$x}", 0x1234, width = 2 * size_of::<Addr>())
    );
    assert!(lines[1].ends_with("print_target"), "{output}");
}
