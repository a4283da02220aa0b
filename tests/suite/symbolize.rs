use std::env::current_exe;
use std::path::Path;

use crashsym::symbolize::FrameArray;
use crashsym::symbolize::LocationInfoMode;
use crashsym::symbolize::SymbolizedFrame;
use crashsym::trace::get_stack_trace_safe;
use crashsym::Addr;
use crashsym::ElfCache;
use crashsym::SignalSafeElfCache;
use crashsym::Symbolizer;

use test_log::test;


/// A function we symbolize the address of.
#[inline(never)]
fn symbolization_target(x: usize) -> usize {
    x.wrapping_mul(3)
}

/// The number of frames we capture; enough to cover the test harness.
const DEPTH: usize = 128;

#[inline(always)]
fn inlined_capture(frames: &mut FrameArray<DEPTH>) -> bool {
    get_stack_trace_safe(frames)
}

#[inline(never)]
fn outer_capture(frames: &mut FrameArray<DEPTH>) -> bool {
    inlined_capture(frames)
}

#[cfg(feature = "dwarf")]
#[inline(always)]
fn inlined_inner(frames: &mut FrameArray<DEPTH>) -> bool {
    get_stack_trace_safe(frames)
}

#[cfg(feature = "dwarf")]
#[inline(always)]
fn inlined_middle(frames: &mut FrameArray<DEPTH>) -> bool {
    inlined_inner(frames)
}

#[cfg(feature = "dwarf")]
#[inline(never)]
fn nested_capture(frames: &mut FrameArray<DEPTH>) -> bool {
    inlined_middle(frames)
}

fn names(frames: &[SymbolizedFrame]) -> Vec<String> {
    frames
        .iter()
        .map(|frame| frame.name().unwrap_or_default().to_string())
        .collect()
}

fn position(names: &[String], needle: &str) -> usize {
    names
        .iter()
        .position(|name| name.contains(needle))
        .unwrap_or_else(|| panic!("{needle} not found in {names:?}"))
}


/// Check that we can symbolize an address in the main executable.
#[test]
fn symbolize_exe_function() {
    let addr = symbolization_target as Addr;
    let symbolizer = Symbolizer::new();
    let frame = symbolizer.symbolize_addr(addr);

    assert!(frame.found);
    assert_eq!(frame.addr, addr);
    assert!(frame.name().unwrap().contains("symbolization_target"));
    assert_eq!(frame.file.as_ref().unwrap().path(), current_exe().unwrap());

    if cfg!(feature = "dwarf") {
        let file = frame.location.file.as_deref().unwrap();
        assert!(file.ends_with("symbolize.rs"), "{file}");
        assert_ne!(frame.location.line, 0);
        // No main file is reported in the default mode.
        assert!(!frame.location.has_main_file());
    }
}

/// Check that we can symbolize an address in a shared object.
#[test]
fn symbolize_shared_object_function() {
    let addr = libc::fopen as Addr;
    let symbolizer = Symbolizer::builder()
        .set_mode(LocationInfoMode::Disabled)
        .build();
    let frame = symbolizer.symbolize_addr(addr);

    assert!(frame.found);
    assert!(frame.name().is_some());
    let path = frame.file.as_ref().unwrap().path();
    let name = path.file_name().unwrap().to_string_lossy();
    assert!(name.starts_with("libc"), "{}", path.display());
    assert_eq!(frame.location.file, None);
}

/// Check that addresses outside of any loaded object are not found.
#[test]
fn symbolize_unknown_address() {
    let symbolizer = Symbolizer::new();
    let mut frames = [SymbolizedFrame::default(), SymbolizedFrame::default()];
    let count = symbolizer.symbolize(&[0x0, symbolization_target as Addr], &mut frames);
    assert_eq!(count, 2);
    assert!(!frames[0].found);
    assert_eq!(frames[0].addr, 0);
    assert!(frames[0].file.is_none());
    assert!(frames[1].found);
}

/// Check that symbolizing already symbolized frames is a no-op.
#[test]
fn symbolize_idempotence() {
    let addrs = [symbolization_target as Addr, 0x1, libc::fopen as Addr];
    let symbolizer = Symbolizer::builder()
        .set_mode(LocationInfoMode::Full)
        .build();

    let mut frames = vec![SymbolizedFrame::default(); 3];
    let count = symbolizer.symbolize(&addrs, &mut frames);
    let first = frames.clone();
    let count2 = symbolizer.symbolize(&addrs, &mut frames);
    assert_eq!(count, count2);

    for (a, b) in first.iter().zip(&frames) {
        assert_eq!(a.found, b.found);
        assert_eq!(a.addr, b.addr);
        assert_eq!(a.name, b.name);
        assert_eq!(a.location, b.location);
    }
}

/// Check that the capacity of the ELF file cache does not affect
/// symbolization results.
#[test]
fn elf_cache_capacity_independence() {
    let addrs = [
        symbolization_target as Addr,
        libc::fopen as Addr,
        outer_capture as Addr,
    ];

    let results = [0, 1, 100].map(|capacity| {
        let cache = ElfCache::new(capacity);
        let symbolizer = Symbolizer::builder()
            .set_elf_cache(&cache)
            .set_mode(LocationInfoMode::Full)
            .build();
        let mut frames = vec![SymbolizedFrame::default(); addrs.len()];
        let count = symbolizer.symbolize(&addrs, &mut frames);
        assert_eq!(count, addrs.len());
        frames
            .into_iter()
            .map(|frame| (frame.found, frame.name, frame.location))
            .collect::<Vec<_>>()
    });

    assert!(results[0].iter().all(|(found, ..)| *found));
    assert_eq!(results[0], results[1]);
    assert_eq!(results[1], results[2]);
}

/// Check that the signal safe cache can be used for symbolization.
#[test]
fn symbolize_with_signal_safe_cache() {
    let cache = SignalSafeElfCache::new(64);
    let symbolizer = Symbolizer::builder()
        .set_owned_elf_cache(cache)
        .set_mode(LocationInfoMode::Full)
        .build();
    let frame = symbolizer.symbolize_addr(symbolization_target as Addr);
    assert!(frame.found);

    if cfg!(feature = "dwarf") {
        // The compilation unit is named after the crate root.
        let main_file = frame.location.main_file.as_deref().unwrap();
        assert!(Path::new(main_file).ends_with("integration.rs"), "{main_file}");
    }
}

/// Check that results served from the symbol cache are identical to
/// freshly computed ones.
#[test]
fn symbol_cache_consistency() {
    let addrs = [symbolization_target as Addr, libc::fopen as Addr];
    let symbolizer = Symbolizer::builder()
        .set_mode(LocationInfoMode::FullWithInline)
        .set_symbol_cache_size(16)
        .build();

    let mut first = vec![SymbolizedFrame::default(); 8];
    let count = symbolizer.symbolize(&addrs, &mut first);
    let mut second = vec![SymbolizedFrame::default(); 8];
    let count2 = symbolizer.symbolize(&addrs, &mut second);
    assert_eq!(count, count2);
    assert_eq!(names(&first[..count]), names(&second[..count]));
    for (a, b) in first[..count].iter().zip(&second[..count]) {
        assert_eq!(a.location, b.location);
    }
}

/// Check that inlined functions are reported as separate frames when
/// requested.
#[test]
fn symbolize_inlined_function() {
    let mut array = Box::<FrameArray<DEPTH>>::default();
    assert!(outer_capture(&mut array));
    let addr_count = array.frame_count;
    assert!(addr_count > 2);
    assert!(addr_count < DEPTH);

    let symbolizer = Symbolizer::builder()
        .set_mode(LocationInfoMode::FullWithInline)
        .build();
    let count = symbolizer.symbolize_array(&mut *array);
    assert!(count >= addr_count);
    assert!(count <= FrameArray::<DEPTH>::CAPACITY);

    let names = names(&array.frames[..count]);
    let capture = position(&names, "get_stack_trace_safe");
    let outer = position(&names, "outer_capture");
    assert!(capture < outer, "{names:?}");

    if cfg!(feature = "dwarf") {
        // The inline frame comes right before the frame of the function
        // it got inlined into.
        assert!(names[outer - 1].contains("inlined_capture"), "{names:?}");
        assert_eq!(
            array.frames[outer - 1].addr,
            array.frames[outer].addr,
            "{names:?}"
        );
    }
}

/// Check that inline frames are dropped if there is no room for them.
#[test]
fn symbolize_without_inline_space() {
    let mut array = Box::<FrameArray<DEPTH>>::default();
    assert!(outer_capture(&mut array));
    let addr_count = array.frame_count;

    let symbolizer = Symbolizer::builder()
        .set_mode(LocationInfoMode::FullWithInline)
        .build();
    let count = symbolizer.symbolize(
        &array.addresses[..addr_count],
        &mut array.frames[..addr_count],
    );
    assert_eq!(count, addr_count);

    // Each frame corresponds to exactly one captured address.
    for (frame, addr) in array.frames[..count].iter().zip(&array.addresses) {
        assert_eq!(frame.addr, *addr);
    }
    let names = names(&array.frames[..count]);
    assert!(!names.iter().any(|name| name.contains("inlined_capture")), "{names:?}");
    assert!(names[1].contains("outer_capture"), "{names:?}");
}

/// Check that the innermost inline frames are kept if there is room for
/// only some of them.
#[cfg(feature = "dwarf")]
#[test]
fn symbolize_with_partial_inline_space() {
    let mut array = Box::<FrameArray<DEPTH>>::default();
    assert!(nested_capture(&mut array));
    // The return address into `nested_capture`, inside of two levels of
    // inlined functions.
    let addr = array.addresses[1];

    let symbolizer = Symbolizer::builder()
        .set_mode(LocationInfoMode::FullWithInline)
        .build();

    let mut full = vec![SymbolizedFrame::default(); 4];
    let count = symbolizer.symbolize(&[addr], &mut full);
    assert_eq!(count, 3);
    let all = names(&full[..count]);
    assert!(all[0].contains("inlined_inner"), "{all:?}");
    assert!(all[1].contains("inlined_middle"), "{all:?}");
    assert!(all[2].contains("nested_capture"), "{all:?}");

    // With a single slot to spare, only the innermost inline frame is
    // reported.
    let mut frames = vec![SymbolizedFrame::default(); 2];
    let count = symbolizer.symbolize(&[addr], &mut frames);
    assert_eq!(count, 2);
    let some = names(&frames);
    assert!(some[0].contains("inlined_inner"), "{some:?}");
    assert!(some[1].contains("nested_capture"), "{some:?}");
    assert!(frames.iter().all(|frame| frame.found && frame.addr == addr));
    assert_eq!(frames[0].location, full[0].location);
    // The outermost frame still reports the call site in its own code.
    assert_eq!(frames[1].location, full[2].location);
}
