use std::fmt::Debug;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;
use std::path::Path;
use std::path::PathBuf;
use std::ptr;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use addr2line::Context;
use addr2line::Location;
use gimli::Dwarf;

use crate::elf::ElfParser;
use crate::log::debug;
use crate::symbolize::FrameStr;
use crate::symbolize::LocationInfo;
use crate::symbolize::LocationInfoMode;
use crate::symbolize::SymbolizedFrame;
use crate::ElfFile;
use crate::Result;

use super::debug_link::find_debug_file;
use super::reader::load_section;
use super::reader::R;


/// The address range covered by a compilation unit.
#[derive(Debug)]
struct UnitRange {
    begin: u64,
    end: u64,
    /// The unit's primary source file.
    file: Arc<str>,
}


/// Collect the address ranges of all compilation units, sorted by
/// start address.
fn parse_unit_ranges(dwarf: &Dwarf<R<'static>>) -> Result<Box<[UnitRange]>> {
    let mut ranges = Vec::new();
    let mut headers = dwarf.units();
    while let Some(header) = headers.next()? {
        let unit = dwarf.unit(header)?;
        let unit_name = if let Some(name) = &unit.name {
            name.to_string_lossy()
        } else {
            continue
        };
        // rustc names units after the crate root, followed by the
        // codegen unit.
        let name = unit_name
            .split_once("/@/")
            .map_or(unit_name.as_ref(), |(root, _cgu)| root);

        let file = match &unit.comp_dir {
            Some(dir) if !Path::new(name).is_absolute() => {
                let dir = dir.to_string_lossy();
                Arc::<str>::from(Path::new(&*dir).join(name).to_string_lossy())
            }
            _ => Arc::<str>::from(name),
        };

        let mut unit_ranges = dwarf.unit_ranges(&unit)?;
        while let Some(range) = unit_ranges.next()? {
            if range.begin < range.end {
                let () = ranges.push(UnitRange {
                    begin: range.begin,
                    end: range.end,
                    file: Arc::clone(&file),
                });
            }
        }
    }

    let () = ranges.sort_by_key(|range| range.begin);
    Ok(ranges.into_boxed_slice())
}


/// Store `loc` in `location`, with strings referencing data of
/// `owner`.
///
/// # Safety
/// `loc` has to reference data owned by `owner`.
unsafe fn set_location(
    owner: &Arc<ElfFile>,
    location: &mut LocationInfo,
    loc: Option<&Location<'_>>,
) {
    if let Some(Location {
        file: Some(file),
        line: Some(line),
        ..
    }) = loc
    {
        // SAFETY: Guaranteed by the caller.
        location.file = Some(unsafe { FrameStr::borrowed(owner, file) });
        location.line = *line;
    }
}


/// A resolver of source code locations and inlined functions based on
/// an ELF file's DWARF debug information.
pub(crate) struct DwarfResolver {
    /// The `addr2line` context doing the heavy lifting.
    ///
    /// Lookups require exclusive access, as the context lazily
    /// parses and caches debug information.
    // SAFETY: The context references data in the ELF file the resolver
    //         was created for, in `buffers`, and in `_linkee`. It has to
    //         be listed before them and the resolver must not outlive
    //         the ELF file.
    context: Mutex<Context<R<'static>>>,
    /// Compilation unit address ranges, used for looking up the "main"
    /// file of an address.
    units: Box<[UnitRange]>,
    /// Buffers holding decompressed debug sections.
    _buffers: Vec<Box<[u8]>>,
    /// The separate debug file the DWARF data was loaded from, if any.
    _linkee: Option<Box<ElfParser>>,
}

impl DwarfResolver {
    /// Create a `DwarfResolver` for the ELF file represented by `parser`.
    ///
    /// If the file itself does not contain any debug information, its
    /// debug link is followed, if present, searching `debug_dirs`.
    /// `None` is returned if no debug information is available.
    ///
    /// # Safety
    /// The returned resolver references data owned by `parser` and must
    /// not outlive it.
    pub unsafe fn from_parser(
        parser: &ElfParser,
        path: &Path,
        debug_dirs: &[PathBuf],
    ) -> Result<Option<Self>> {
        let linkee = if parser.find_section(".debug_info")?.is_some() {
            None
        } else if let Some(linkee) = find_debug_file(parser, path, debug_dirs)? {
            Some(Box::new(linkee))
        } else {
            debug!("{} contains no debug information", path.display());
            return Ok(None)
        };

        let source = linkee.as_deref().unwrap_or(parser);
        let mut buffers = Vec::new();
        // SAFETY: The loaded sections reference data owned by `parser`,
        //         `linkee`, or `buffers`, all of which outlive `context`.
        let dwarf = Dwarf::load(|section| unsafe { load_section(source, section, &mut buffers) })?;
        let units = parse_unit_ranges(&dwarf)?;
        let context = Context::from_dwarf(dwarf)?;

        let slf = Self {
            context: Mutex::new(context),
            units,
            _buffers: buffers,
            _linkee: linkee,
        };
        Ok(Some(slf))
    }

    /// Find the primary source file of the compilation unit covering
    /// `addr`.
    fn find_main_file(&self, addr: u64) -> Option<&Arc<str>> {
        let idx = self.units.partition_point(|range| range.begin <= addr);
        self.units[..idx]
            .iter()
            .rev()
            .find(|range| addr < range.end)
            .map(|range| &range.file)
    }

    /// Look up source code information for `addr`.
    ///
    /// `location` receives the source location as per the line table,
    /// except in [`LocationInfoMode::FullWithInline`] mode: there,
    /// inlined functions are reported in `inline_frames`, innermost
    /// first, and `location` receives the call site in the outermost
    /// (non-inlined) function. If there are more inlined functions than
    /// slots, the innermost ones are kept. The number of inline frames
    /// written is returned.
    ///
    /// Strings reported reference data of `owner`, which has to be the
    /// file this resolver belongs to.
    pub fn find_address(
        &self,
        owner: &Arc<ElfFile>,
        addr: u64,
        mode: LocationInfoMode,
        location: &mut LocationInfo,
        inline_frames: &mut [SymbolizedFrame],
    ) -> Result<usize> {
        debug_assert!(owner.dwarf().is_some_and(|dwarf| ptr::eq(dwarf, self)));

        if mode == LocationInfoMode::Disabled {
            return Ok(0)
        }

        let context = self.context.lock().unwrap_or_else(PoisonError::into_inner);

        if mode != LocationInfoMode::Fast {
            if let Some(file) = self.find_main_file(addr) {
                // SAFETY: Unit ranges are owned by `self` and so by
                //         `owner`.
                location.main_file = Some(unsafe { FrameStr::borrowed(owner, file) });
            }
        }

        if mode != LocationInfoMode::FullWithInline {
            let loc = context.find_location(addr)?;
            // SAFETY: Locations reference data cached by `context` or
            //         the debug sections, all owned by `owner`.
            let () = unsafe { set_location(owner, location, loc.as_ref()) };
            return Ok(0)
        }

        let mut frames = context.find_frames(addr).skip_all_loads()?;
        let mut count = 0;
        let mut outermost = None;
        while let Some(frame) = frames.next()? {
            // Whatever frame we saw previously was an inlined one.
            if let Some(inlined) = outermost.replace(frame) {
                if count < inline_frames.len() {
                    let slot = &mut inline_frames[count];
                    slot.name = inlined
                        .function
                        .as_ref()
                        .and_then(|name| name.name.to_string().ok())
                        // SAFETY: Function names reside in the debug
                        //         sections owned by `owner`.
                        .map(|name| unsafe { FrameStr::borrowed(owner, name) });
                    slot.location.main_file = location.main_file.clone();
                    // SAFETY: See above.
                    let () =
                        unsafe { set_location(owner, &mut slot.location, inlined.location.as_ref()) };
                    count += 1;
                }
            }
        }

        if let Some(frame) = outermost {
            // SAFETY: See above.
            let () = unsafe { set_location(owner, location, frame.location.as_ref()) };
        }
        Ok(count)
    }
}

impl Debug for DwarfResolver {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("DwarfResolver")
            .field("units", &self.units.len())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    use std::env::current_exe;
    use std::hint::black_box;

    use test_log::test;


    fn exe_file() -> Arc<ElfFile> {
        Arc::new(ElfFile::open(current_exe().unwrap()).unwrap())
    }

    fn lookup(
        file: &Arc<ElfFile>,
        addr: u64,
        mode: LocationInfoMode,
    ) -> (usize, LocationInfo, [SymbolizedFrame; 2]) {
        let dwarf = file.dwarf().unwrap();
        let mut location = LocationInfo::default();
        let mut inline_frames = [SymbolizedFrame::default(), SymbolizedFrame::default()];
        let count = dwarf
            .find_address(file, addr, mode, &mut location, &mut inline_frames)
            .unwrap();
        (count, location, inline_frames)
    }

    /// A function we look up in the test binary's debug information.
    #[inline(never)]
    fn dwarf_lookup_target() -> usize {
        42
    }

    #[inline(always)]
    fn inlined_step(x: usize) -> usize {
        black_box(x).wrapping_mul(7)
    }

    #[inline(never)]
    fn inline_host(x: usize) -> usize {
        let y = inlined_step(x);
        y + 1
    }

    /// Find an address of `inlined_step`'s code, as inlined into
    /// `inline_host`.
    fn inlined_addr(file: &Arc<ElfFile>) -> u64 {
        let _ = inline_host(1);
        let start = file.find_sym_addr("inline_host").unwrap();
        (start..start + 0x200)
            .find(|addr| {
                let (count, _location, frames) =
                    lookup(file, *addr, LocationInfoMode::FullWithInline);
                count == 1 && frames[0].name().is_some_and(|name| name.contains("inlined_step"))
            })
            .unwrap()
    }

    /// Check that we can look up source locations in the test binary.
    #[test]
    fn location_lookup() {
        let file = exe_file();
        let resolver = file.dwarf().unwrap();
        assert_ne!(format!("{resolver:?}"), "");

        let _ = dwarf_lookup_target();
        let addr = file.find_sym_addr("dwarf_lookup_target").unwrap();

        let (count, location, _) = lookup(&file, addr, LocationInfoMode::Fast);
        assert_eq!(count, 0);
        let path = location.file.as_deref().unwrap();
        assert!(path.ends_with("resolver.rs"), "{path}");
        assert_ne!(location.line, 0);
        assert!(location.main_file.is_none());

        let (_count, full, _) = lookup(&file, addr, LocationInfoMode::Full);
        assert_eq!(full.file, location.file);
        assert_eq!(full.line, location.line);
        let main_file = full.main_file.as_deref().unwrap();
        assert!(main_file.ends_with("lib.rs"), "{main_file}");

        let (_count, location, _) = lookup(&file, addr, LocationInfoMode::Disabled);
        assert_eq!(location, LocationInfo::default());
    }

    /// Check that only the inline expanding mode attributes inlined code
    /// to its call site, while the other modes report the line table's
    /// location.
    #[test]
    fn inlined_location_lookup() {
        let file = exe_file();
        let addr = inlined_addr(&file);

        let (count, fast, _) = lookup(&file, addr, LocationInfoMode::Fast);
        assert_eq!(count, 0);
        assert!(fast.has_file_and_line());

        let (count, full, _) = lookup(&file, addr, LocationInfoMode::Full);
        assert_eq!(count, 0);
        assert_eq!(full.file, fast.file);
        assert_eq!(full.line, fast.line);
        assert!(full.has_main_file());

        let (count, outer, frames) = lookup(&file, addr, LocationInfoMode::FullWithInline);
        assert_eq!(count, 1);
        assert_eq!(frames[0].location.file, fast.file);
        assert_eq!(frames[0].location.line, fast.line);
        assert_eq!(frames[0].location.main_file, full.main_file);
        assert_eq!(outer.file, fast.file);
        assert_ne!(outer.line, fast.line);
    }

    /// Check that strings handed out share ownership of the file.
    #[test]
    fn location_keeps_file_alive() {
        let file = exe_file();
        let _ = dwarf_lookup_target();
        let addr = file.find_sym_addr("dwarf_lookup_target").unwrap();

        let (_count, location, _) = lookup(&file, addr, LocationInfoMode::Full);
        assert_eq!(Arc::strong_count(&file), 3);
        let () = drop(file);
        assert!(location.file.as_deref().unwrap().ends_with("resolver.rs"));
    }

    /// Make sure that an address without debug information is reported as
    /// such.
    #[test]
    fn location_lookup_without_match() {
        let file = exe_file();
        let (count, location, _) = lookup(&file, 0, LocationInfoMode::FullWithInline);
        assert_eq!(count, 0);
        assert!(location.file.is_none());
        assert!(location.main_file.is_none());
    }
}
