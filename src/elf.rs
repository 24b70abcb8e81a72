//! Model and codec for the standard-object side of a conversion: 32-bit
//! little-endian ELF shared objects with per-kind loadable regions, a
//! dynamic symbol table and per-segment RELA sections.

pub mod read;
pub mod write;

pub const ET_DYN: u16 = 3;
pub const EM_ARM: u16 = 40;
pub const EF_ARM_EABI_VER5: u32 = 0x0500_0000;

pub const PT_LOAD: u32 = 1;

pub const SHT_PROGBITS: u32 = 1;
pub const SHT_STRTAB: u32 = 3;
pub const SHT_RELA: u32 = 4;
pub const SHT_NOBITS: u32 = 8;
pub const SHT_DYNSYM: u32 = 11;

pub const SHF_WRITE: u32 = 1;
pub const SHF_ALLOC: u32 = 2;
pub const SHF_EXECINSTR: u32 = 4;
pub const SHF_INFO_LINK: u32 = 0x40;

pub const PF_X: u32 = 1;
pub const PF_W: u32 = 2;
pub const PF_R: u32 = 4;

/// Absolute 32-bit relocation, shared by the ELF and module kind spaces.
pub const R_ABS32: u8 = 0x02;
/// Data-pointer flavour of the absolute relocation; treated as `R_ABS32`.
pub const R_ABS32_DATA: u8 = 0x16;
/// Base-relative relocation whose placeholder bytes already hold an
/// absolute address baked in by the original linker.
pub const R_RELATIVE: u8 = 0x17;

/// The four content-segment kinds, in their fixed table order.
pub const SEG_TEXT: usize = 0;
pub const SEG_RODATA: usize = 1;
pub const SEG_DATA: usize = 2;
pub const SEG_BSS: usize = 3;

/// One loadable region of the standard object. `data` is empty for bss,
/// whose extent is memory-only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadRegion {
    pub vaddr: u32,
    pub data: Vec<u8>,
    pub mem_size: u32,
}

/// One `.dynsym` entry. `shndx` 0 marks an import; section symbols carry an
/// empty name and a nonzero `shndx`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynSymbol {
    pub name: String,
    pub value: u32,
    pub shndx: u16,
}

/// One RELA entry; `symbol` indexes the dynamic symbol table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rela {
    pub offset: u32,
    pub symbol: u32,
    pub kind: u8,
    pub addend: i32,
}

/// Parsed standard object: exactly one region per segment kind and one
/// relocation bucket per relocation-bearing segment (text, rodata, data).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElfObject {
    pub regions: [LoadRegion; 4],
    pub dynsym: Vec<DynSymbol>,
    pub relas: [Vec<Rela>; 3],
}

impl ElfObject {
    /// Reads a little-endian u32 out of the region data covering `addr`.
    #[must_use]
    pub fn read_u32_at(&self, addr: u32) -> Option<u32> {
        let at = crate::addr::resolve(&self.regions, addr)?;
        let data = &self.regions[at.segment as usize].data;
        let begin = at.offset as usize;
        let bytes = data.get(begin..begin + 4)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}
