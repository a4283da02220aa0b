use std::borrow::Cow;
use std::mem;

use gimli::EndianSlice;
use gimli::SectionId;

use crate::elf::ElfParser;
use crate::ErrorExt as _;
use crate::Result;


#[cfg(target_endian = "little")]
type Endianess = gimli::LittleEndian;
#[cfg(target_endian = "big")]
type Endianess = gimli::BigEndian;

/// The gimli reader type we currently use. Could be made generic if
/// need be, but we keep things simple while we can.
pub(crate) type R<'dat> = EndianSlice<'dat, Endianess>;


/// Load the DWARF section `id` from the ELF file represented by
/// `parser`.
///
/// Compressed sections are decompressed into a buffer that gets added
/// to `buffers`.
///
/// # Safety
/// The returned reader references data owned by `parser` or by
/// `buffers`. The caller has to make sure that it does not outlive
/// either, and that no buffer is removed from `buffers`.
pub(super) unsafe fn load_section(
    parser: &ElfParser,
    id: SectionId,
    buffers: &mut Vec<Box<[u8]>>,
) -> Result<R<'static>> {
    let result = parser.find_section(id.name())?;
    let data = match result {
        Some(idx) => parser
            .section_data_decompressed(idx)
            .with_context(|| format!("failed to load section `{}`", id.name()))?,
        // Make sure to return empty data if a section does not exist.
        None => Cow::Borrowed(&[][..]),
    };

    let data = match data {
        // SAFETY: The caller guarantees that the parser outlives the
        //         reader.
        Cow::Borrowed(data) => unsafe { mem::transmute::<&[u8], &'static [u8]>(data) },
        Cow::Owned(data) => {
            let data = data.into_boxed_slice();
            // SAFETY: The heap allocation does not move when the box
            //         does and the caller guarantees that it stays
            //         alive for as long as the reader.
            let slice = unsafe { mem::transmute::<&[u8], &'static [u8]>(&data) };
            let () = buffers.push(data);
            slice
        }
    };

    Ok(EndianSlice::new(data, Endianess::default()))
}
