use crate::util::Pod;

const EI_NIDENT: usize = 16;

type Elf64_Addr = u64;
type Elf64_Half = u16;
type Elf64_Off = u64;
type Elf64_Word = u32;
type Elf64_Xword = u64;

pub(crate) const ELFCLASS64: u8 = 2;

#[derive(Debug)]
#[repr(C)]
pub(crate) struct Elf64_Ehdr {
    pub e_ident: [u8; EI_NIDENT], /* ELF "magic number" */
    pub e_type: Elf64_Half,
    pub e_machine: Elf64_Half,
    pub e_version: Elf64_Word,
    pub e_entry: Elf64_Addr, /* Entry point virtual address */
    pub e_phoff: Elf64_Off,  /* Program header table file offset */
    pub e_shoff: Elf64_Off,  /* Section header table file offset */
    pub e_flags: Elf64_Word,
    pub e_ehsize: Elf64_Half,
    pub e_phentsize: Elf64_Half,
    pub e_phnum: Elf64_Half,
    pub e_shentsize: Elf64_Half,
    pub e_shnum: Elf64_Half,
    pub e_shstrndx: Elf64_Half,
}

// SAFETY: `Elf64_Ehdr` is valid for any bit pattern.
unsafe impl Pod for Elf64_Ehdr {}

#[derive(Debug)]
#[repr(C)]
pub(crate) struct Elf64_Shdr {
    pub sh_name: Elf64_Word,       /* Section name, index in string tbl */
    pub sh_type: Elf64_Word,       /* Type of section */
    pub sh_flags: Elf64_Xword,     /* Miscellaneous section attributes */
    pub sh_addr: Elf64_Addr,       /* Section virtual addr at execution */
    pub sh_offset: Elf64_Off,      /* Section file offset */
    pub sh_size: Elf64_Xword,      /* Size of section in bytes */
    pub sh_link: Elf64_Word,       /* Index of another section */
    pub sh_info: Elf64_Word,       /* Additional section information */
    pub sh_addralign: Elf64_Xword, /* Section alignment */
    pub sh_entsize: Elf64_Xword,   /* Entry size if section holds table */
}

impl Elf64_Shdr {
    /// Check whether the section occupies memory at run time and
    /// covers `addr`.
    #[inline]
    pub fn contains(&self, addr: u64) -> bool {
        self.sh_flags & SHF_ALLOC != 0
            && self.sh_size != 0
            && addr >= self.sh_addr
            && addr - self.sh_addr < self.sh_size
    }
}

// SAFETY: `Elf64_Shdr` is valid for any bit pattern.
unsafe impl Pod for Elf64_Shdr {}

pub(crate) const SHF_ALLOC: Elf64_Xword = 0x2;
pub(crate) const SHF_COMPRESSED: Elf64_Xword = 0x800;

pub(crate) const SHN_UNDEF: u16 = 0;
#[cfg(test)]
pub(crate) const SHN_LORESERVE: u16 = 0xff00;
pub(crate) const SHN_XINDEX: u16 = 0xffff;

pub(crate) const SHT_NOBITS: Elf64_Word = 8;

pub(crate) const STT_OBJECT: u8 = 1;
pub(crate) const STT_FUNC: u8 = 2;
pub(crate) const STT_GNU_IFUNC: u8 = 10;

#[derive(Clone, Debug)]
#[repr(C)]
pub(crate) struct Elf64_Sym {
    pub st_name: Elf64_Word,  /* Symbol name, index in string tbl */
    pub st_info: u8,          /* Type and binding attributes */
    pub st_other: u8,         /* No defined meaning, 0 */
    pub st_shndx: Elf64_Half, /* Associated section index */
    pub st_value: Elf64_Addr, /* Value of the symbol */
    pub st_size: Elf64_Xword, /* Associated symbol size */
}

impl Elf64_Sym {
    /// Extract the symbols type, typically represented by a STT_* constant.
    #[inline]
    pub fn type_(&self) -> u8 {
        self.st_info & 0xf
    }

    /// Check whether the symbol is a definition of a function or a
    /// variable, i.e., something an address can be attributed to.
    #[inline]
    pub fn is_definition(&self) -> bool {
        let elf_ty = self.type_();
        let is_func = elf_ty == STT_FUNC || elf_ty == STT_GNU_IFUNC;
        let is_var = elf_ty == STT_OBJECT;
        (is_func || is_var) && self.st_shndx != SHN_UNDEF
    }

    /// Check whether the symbol covers `addr`.
    ///
    /// In ELF, a symbol size of 0 indicates "no size or an unknown
    /// size" (see elf(5)). Such symbols only match their exact address.
    #[inline]
    pub fn contains(&self, addr: u64) -> bool {
        if self.st_size == 0 {
            addr == self.st_value
        } else {
            addr >= self.st_value && addr - self.st_value < self.st_size
        }
    }
}

// SAFETY: `Elf64_Sym` is valid for any bit pattern.
unsafe impl Pod for Elf64_Sym {}

pub(crate) const ELFCOMPRESS_ZLIB: Elf64_Word = 1;
pub(crate) const ELFCOMPRESS_ZSTD: Elf64_Word = 2;

#[derive(Debug)]
#[repr(C)]
pub(crate) struct Elf64_Chdr {
    pub ch_type: Elf64_Word,
    pub ch_reserved: Elf64_Word,
    pub ch_size: Elf64_Xword,
    pub ch_addralign: Elf64_Xword,
}

// SAFETY: `Elf64_Chdr` is valid for any bit pattern.
unsafe impl Pod for Elf64_Chdr {}
