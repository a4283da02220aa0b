use std::borrow::Cow;
use std::fmt::Debug;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;
use std::fs::File;
use std::mem;
use std::ops::Deref as _;
use std::path::Path;

use crate::mmap::Mmap;
use crate::util::find_match_or_lower_bound_by;
use crate::util::ReadRaw as _;
use crate::Error;
use crate::ErrorExt as _;
use crate::IntoError as _;
use crate::Result;

use super::types::Elf64_Chdr;
use super::types::Elf64_Ehdr;
use super::types::Elf64_Shdr;
use super::types::Elf64_Sym;
use super::types::ELFCLASS64;
use super::types::ELFCOMPRESS_ZLIB;
use super::types::ELFCOMPRESS_ZSTD;
use super::types::SHF_COMPRESSED;
use super::types::SHN_XINDEX;
use super::types::SHT_NOBITS;


fn symbol_name<'mmap>(strtab: &'mmap [u8], sym: &Elf64_Sym) -> Option<&'mmap str> {
    strtab
        .get(sym.st_name as usize..)?
        .read_cstr()?
        .to_str()
        .ok()
}

fn find_sym<'mmap>(symtab: &[&'mmap Elf64_Sym], addr: u64) -> Option<&'mmap Elf64_Sym> {
    let idx = find_match_or_lower_bound_by(symtab, addr, |sym| sym.st_value)?;
    for sym in symtab[idx..].iter() {
        if sym.st_value > addr {
            // Once we are seeing start addresses past the provided
            // address, we can no longer be dealing with a match and
            // stop the search.
            break
        }

        if sym.contains(addr) {
            return Some(sym)
        }
    }
    None
}


/// A symbol found in one of an ELF file's symbol tables.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ElfSymbol<'elf> {
    sym: &'elf Elf64_Sym,
    strs: &'elf [u8],
}

impl<'elf> ElfSymbol<'elf> {
    /// The symbol's start address, as per the ELF file.
    #[inline]
    pub fn addr(&self) -> u64 {
        self.sym.st_value
    }

    /// The symbol's size.
    #[cfg(test)]
    #[inline]
    pub fn size(&self) -> u64 {
        self.sym.st_size
    }
}


#[derive(Debug)]
struct SymbolTable<'mmap> {
    /// The symbols (in address order).
    syms: Box<[&'mmap Elf64_Sym]>,
    /// The string table the symbols reference.
    strs: &'mmap [u8],
}

impl<'mmap> SymbolTable<'mmap> {
    fn find(&self, addr: u64) -> Option<ElfSymbol<'mmap>> {
        find_sym(&self.syms, addr).map(|sym| ElfSymbol {
            sym,
            strs: self.strs,
        })
    }
}


/// The parsed "skeleton" of an ELF file.
///
/// Everything an address lookup needs is parsed upfront, so that
/// lookups are read-only and can be performed concurrently.
struct Cache<'mmap> {
    /// A slice of the raw ELF data.
    elf_data: &'mmap [u8],
    /// The ELF section headers.
    shdrs: &'mmap [Elf64_Shdr],
    /// The section name string table.
    shstrtab: &'mmap [u8],
    /// The `.symtab` symbol table.
    symtab: SymbolTable<'mmap>,
    /// The `.dynsym` symbol table.
    dynsym: SymbolTable<'mmap>,
}

impl<'mmap> Cache<'mmap> {
    fn parse(elf_data: &'mmap [u8]) -> Result<Self> {
        let ehdr = parse_ehdr(elf_data)?;
        let shdrs = parse_shdrs(elf_data, ehdr)?;
        let shstrndx = shstrndx(elf_data, ehdr)?;
        let shstrtab = if shdrs.is_empty() {
            &[][..]
        } else {
            section_data(elf_data, shdrs, shstrndx)?
        };

        let mut slf = Self {
            elf_data,
            shdrs,
            shstrtab,
            symtab: SymbolTable {
                syms: Box::default(),
                strs: &[],
            },
            dynsym: SymbolTable {
                syms: Box::default(),
                strs: &[],
            },
        };
        slf.symtab = slf.parse_symbol_table(".symtab", ".strtab")?;
        // TODO: We really should check the `.dynamic` section for
        //       information on what symbol and string tables to
        //       use instead of hard coding names here.
        slf.dynsym = slf.parse_symbol_table(".dynsym", ".dynstr")?;
        Ok(slf)
    }

    /// Get the name of the section at a given index.
    fn section_name(&self, idx: usize) -> Result<&'mmap str> {
        let sect = self
            .shdrs
            .get(idx)
            .ok_or_invalid_input(|| "ELF section index out of bounds")?;
        let name = self
            .shstrtab
            .get(sect.sh_name as usize..)
            .ok_or_invalid_input(|| "string table index out of bounds")?
            .read_cstr()
            .ok_or_invalid_input(|| "no valid string found in string table")?
            .to_str()
            .map_err(Error::with_invalid_data)
            .context("invalid section name")?;
        Ok(name)
    }

    /// Find the section of a given name.
    ///
    /// This function return the index of the section if found.
    fn find_section(&self, name: &str) -> Result<Option<usize>> {
        for i in 1..self.shdrs.len() {
            if self.section_name(i)? == name {
                return Ok(Some(i))
            }
        }
        Ok(None)
    }

    fn parse_symbol_table(&self, section: &str, strs: &str) -> Result<SymbolTable<'mmap>> {
        let idx = if let Some(idx) = self.find_section(section)? {
            idx
        } else {
            // The symbol table does not exists. Fake an empty one.
            return Ok(SymbolTable {
                syms: Box::default(),
                strs: &[],
            })
        };
        let mut syms = section_data(self.elf_data, self.shdrs, idx)?;

        if syms.len() % mem::size_of::<Elf64_Sym>() != 0 {
            return Err(Error::with_invalid_data(
                "size of symbol table section is invalid",
            ))
        }

        let count = syms.len() / mem::size_of::<Elf64_Sym>();
        let mut syms = syms
            .read_pod_slice_ref::<Elf64_Sym>(count)
            .ok_or_invalid_data(|| "failed to read symbol table contents")?
            .iter()
            // Filter out any symbols that we cannot attribute addresses
            // to.
            .filter(|sym| sym.is_definition())
            .collect::<Vec<&Elf64_Sym>>();
        // Order symbols by address and those with equal address descending by
        // size.
        let () = syms.sort_by(|sym1, sym2| {
            sym1.st_value
                .cmp(&sym2.st_value)
                .then_with(|| sym1.st_size.cmp(&sym2.st_size).reverse())
        });

        let strs = if let Some(idx) = self.find_section(strs)? {
            section_data(self.elf_data, self.shdrs, idx)?
        } else {
            &[]
        };

        Ok(SymbolTable {
            syms: syms.into_boxed_slice(),
            strs,
        })
    }
}

impl Debug for Cache<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "Cache")
    }
}


/// Read the very first section header.
///
/// ELF contains a couple of clauses that special case data ranges
/// of certain member variables to reference data from this header,
/// which otherwise is zeroed out.
#[inline]
fn read_first_shdr<'mmap>(elf_data: &'mmap [u8], ehdr: &Elf64_Ehdr) -> Result<&'mmap Elf64_Shdr> {
    let shdr = elf_data
        .get(ehdr.e_shoff as usize..)
        .ok_or_invalid_data(|| "Elf64_Ehdr::e_shoff is invalid")?
        .read_pod_ref::<Elf64_Shdr>()
        .ok_or_invalid_data(|| "failed to read Elf64_Shdr")?;
    Ok(shdr)
}

fn parse_ehdr(mut elf_data: &[u8]) -> Result<&Elf64_Ehdr> {
    let ehdr = elf_data
        .read_pod_ref::<Elf64_Ehdr>()
        .ok_or_invalid_data(|| "failed to read Elf64_Ehdr")?;
    if !(ehdr.e_ident[0] == 0x7f
        && ehdr.e_ident[1] == b'E'
        && ehdr.e_ident[2] == b'L'
        && ehdr.e_ident[3] == b'F')
    {
        return Err(Error::with_invalid_data(format!(
            "encountered unexpected e_ident: {:x?}",
            &ehdr.e_ident[0..4]
        )))
    }

    if ehdr.e_ident[4] != ELFCLASS64 {
        return Err(Error::with_unsupported(format!(
            "encountered unsupported ELF class: {}",
            ehdr.e_ident[4]
        )))
    }
    Ok(ehdr)
}

fn parse_shdrs<'mmap>(elf_data: &'mmap [u8], ehdr: &Elf64_Ehdr) -> Result<&'mmap [Elf64_Shdr]> {
    if ehdr.e_shoff == 0 {
        return Ok(&[])
    }

    // "If the number of entries in the section header table is larger than
    // or equal to SHN_LORESERVE, e_shnum holds the value zero and the real
    // number of entries in the section header table is held in the sh_size
    // member of the initial entry in section header table."
    let shnum = if ehdr.e_shnum == 0 {
        let shdr = read_first_shdr(elf_data, ehdr)?;
        usize::try_from(shdr.sh_size).ok().ok_or_invalid_data(|| {
            format!(
                "ELF file contains unsupported number of sections ({})",
                shdr.sh_size
            )
        })?
    } else {
        ehdr.e_shnum.into()
    };

    let shdrs = elf_data
        .get(ehdr.e_shoff as usize..)
        .ok_or_invalid_data(|| "Elf64_Ehdr::e_shoff is invalid")?
        .read_pod_slice_ref::<Elf64_Shdr>(shnum)
        .ok_or_invalid_data(|| "failed to read Elf64_Shdr")?;
    Ok(shdrs)
}

fn shstrndx(elf_data: &[u8], ehdr: &Elf64_Ehdr) -> Result<usize> {
    // "If the index of section name string table section is larger
    // than or equal to SHN_LORESERVE (0xff00), this member holds
    // SHN_XINDEX (0xffff) and  the real index of the section name
    // string table section is held in the sh_link member of the
    // initial entry in section header table."
    let shstrndx = if ehdr.e_shstrndx == SHN_XINDEX {
        let shdr = read_first_shdr(elf_data, ehdr)?;
        shdr.sh_link
    } else {
        u32::from(ehdr.e_shstrndx)
    };

    let shstrndx = usize::try_from(shstrndx).ok().ok_or_invalid_data(|| {
        format!("ELF file contains unsupported section name string table index ({shstrndx})")
    })?;
    Ok(shstrndx)
}

/// Retrieve the raw section data for the ELF section at index `idx`.
fn section_data<'mmap>(
    elf_data: &'mmap [u8],
    shdrs: &[Elf64_Shdr],
    idx: usize,
) -> Result<&'mmap [u8]> {
    let section = shdrs
        .get(idx)
        .ok_or_invalid_input(|| format!("ELF section index ({idx}) out of bounds"))?;

    if section.sh_type == SHT_NOBITS {
        return Ok(&[])
    }

    let data = elf_data
        .get(section.sh_offset as usize..)
        .ok_or_invalid_data(|| "failed to read section data: invalid offset")?
        .read_slice(section.sh_size as usize)
        .ok_or_invalid_data(|| "failed to read section data: invalid size")?;
    Ok(data)
}


#[cfg(feature = "zlib")]
fn decompress_zlib(data: &[u8], size: usize) -> Result<Vec<u8>> {
    use miniz_oxide::inflate::decompress_to_vec_zlib_with_limit;

    let decompressed = decompress_to_vec_zlib_with_limit(data, size)
        .map_err(|err| Error::with_invalid_data(format!("{:?}", err.status)))
        .context("failed to decompress zlib compressed section")?;
    Ok(decompressed)
}

#[cfg(not(feature = "zlib"))]
fn decompress_zlib(_data: &[u8], _size: usize) -> Result<Vec<u8>> {
    Err(Error::with_unsupported(
        "zlib compressed sections are unsupported; enable the `zlib` feature",
    ))
}

#[cfg(feature = "zstd")]
fn decompress_zstd(data: &[u8], size: usize) -> Result<Vec<u8>> {
    let decompressed = zstd::bulk::decompress(data, size)
        .context("failed to decompress zstd compressed section")?;
    Ok(decompressed)
}

#[cfg(not(feature = "zstd"))]
fn decompress_zstd(_data: &[u8], _size: usize) -> Result<Vec<u8>> {
    Err(Error::with_unsupported(
        "zstd compressed sections are unsupported; enable the `zstd` feature",
    ))
}


/// A parser for ELF64 files.
#[derive(Debug)]
pub(crate) struct ElfParser {
    /// The parsed skeleton of the ELF file.
    // SAFETY: We must not hand out references with a 'static lifetime to
    //         this member. Rather, they should never outlive `self`.
    //         Furthermore, this member has to be listed before `_mmap`
    //         to make sure we never end up with a dangling reference.
    cache: Cache<'static>,
    /// The memory mapped file.
    _mmap: Mmap,
}

impl ElfParser {
    /// Create an `ElfParser` from an open file.
    pub fn open_file(file: &File) -> Result<ElfParser> {
        let mmap = Mmap::map(file).context("failed to memory map file")?;
        Self::from_mmap(mmap)
    }

    /// Create an `ElfParser` from mmap'ed data.
    pub fn from_mmap(mmap: Mmap) -> Result<ElfParser> {
        // We transmute the mmap's lifetime to static here as that is a
        // necessity for self-referentiality.
        // SAFETY: We never hand out any 'static references to cache
        //         data.
        let elf_data = unsafe { mem::transmute::<&[u8], &'static [u8]>(mmap.deref()) };

        let parser = ElfParser {
            cache: Cache::parse(elf_data)?,
            _mmap: mmap,
        };
        Ok(parser)
    }

    /// Create an `ElfParser` for a path.
    pub fn open(path: &Path) -> Result<ElfParser> {
        let file = File::open(path)
            .with_context(|| format!("failed to open ELF file {}", path.display()))?;
        Self::open_file(&file).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Retrieve the raw contents of the file.
    #[inline]
    pub fn data(&self) -> &[u8] {
        self.cache.elf_data
    }

    /// Retrieve the data corresponding to the ELF section at index `idx`.
    pub fn section_data(&self, idx: usize) -> Result<&[u8]> {
        section_data(self.cache.elf_data, self.cache.shdrs, idx)
    }

    /// Retrieve the data of the ELF section at index `idx`,
    /// decompressing it if it is marked as compressed.
    pub fn section_data_decompressed(&self, idx: usize) -> Result<Cow<'_, [u8]>> {
        let shdr = self
            .cache
            .shdrs
            .get(idx)
            .ok_or_invalid_input(|| format!("ELF section index ({idx}) out of bounds"))?;
        let mut data = self.section_data(idx)?;
        if shdr.sh_flags & SHF_COMPRESSED == 0 {
            return Ok(Cow::Borrowed(data))
        }

        let chdr = data
            .read_pod::<Elf64_Chdr>()
            .ok_or_invalid_data(|| "failed to read ELF compression header")?;
        let size = usize::try_from(chdr.ch_size)
            .ok()
            .ok_or_invalid_data(|| format!("decompressed size ({}) is too large", chdr.ch_size))?;

        let decompressed = match chdr.ch_type {
            ELFCOMPRESS_ZLIB => decompress_zlib(data, size)?,
            ELFCOMPRESS_ZSTD => decompress_zstd(data, size)?,
            ty => {
                return Err(Error::with_unsupported(format!(
                    "ELF section is compressed with unknown algorithm ({ty})"
                )))
            }
        };

        if decompressed.len() != size {
            return Err(Error::with_invalid_data(format!(
                "decompressed section has unexpected size ({} vs. {size})",
                decompressed.len()
            )))
        }
        Ok(Cow::Owned(decompressed))
    }

    /// Find the section of a given name.
    ///
    /// This function return the index of the section if found.
    pub fn find_section(&self, name: &str) -> Result<Option<usize>> {
        self.cache.find_section(name)
    }

    /// Find the section that `addr` falls into when the file is loaded.
    ///
    /// Only sections occupying memory at run time are considered.
    pub fn find_section_containing_addr(&self, addr: u64) -> Option<&Elf64_Shdr> {
        self.cache.shdrs.iter().find(|shdr| shdr.contains(addr))
    }

    /// Find the symbol defining the given address, if any.
    ///
    /// `.symtab` takes precedence over `.dynsym`.
    pub fn find_sym(&self, addr: u64) -> Option<ElfSymbol<'_>> {
        self.cache
            .symtab
            .find(addr)
            .or_else(|| self.cache.dynsym.find(addr))
    }

    /// Retrieve the name of a symbol previously found.
    ///
    /// Names that are not valid UTF-8 are reported as absent.
    pub fn symbol_name<'slf>(&'slf self, sym: &ElfSymbol<'slf>) -> Option<&'slf str> {
        symbol_name(sym.strs, sym.sym)
    }

    /// Check whether the file has a non-empty symbol table.
    #[cfg(test)]
    fn has_symtab(&self) -> bool {
        !self.cache.symtab.syms.is_empty()
    }

    /// Find the address of the first symbol whose (possibly mangled)
    /// name contains `name`.
    #[cfg(test)]
    pub(crate) fn find_sym_addr(&self, name: &str) -> Option<u64> {
        let symtab = &self.cache.symtab;
        symtab
            .syms
            .iter()
            .find(|sym| symbol_name(symtab.strs, sym).is_some_and(|sym| sym.contains(name)))
            .map(|sym| sym.st_value)
    }

    #[cfg(test)]
    fn pick_symtab_addr(&self) -> (&str, u64, u64) {
        use super::types::STT_FUNC;

        let symtab = &self.cache.symtab.syms;
        let mut idx = symtab.len() / 2;
        while symtab[idx].type_() != STT_FUNC
            || symtab[idx].st_size == 0
            || symbol_name(self.cache.symtab.strs, symtab[idx]).is_none()
        {
            idx += 1;
        }
        let sym = symtab[idx];
        let name = symbol_name(self.cache.symtab.strs, sym).unwrap();
        (name, sym.st_value, sym.st_size)
    }
}
