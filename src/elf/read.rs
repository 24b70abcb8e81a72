use crate::elf::{
    DynSymbol, ElfObject, LoadRegion, Rela, PT_LOAD, SHT_DYNSYM, SHT_RELA,
};
use crate::error::ConvertError;

const EHDR_SIZE: usize = 52;
const PHDR_SIZE: usize = 32;
const SHDR_SIZE: usize = 40;
const SYM_SIZE: usize = 16;
const RELA_SIZE: usize = 12;

/// Parses a 32-bit little-endian shared object into the model consumed by
/// the encoder. Only the pieces a conversion needs are extracted: the four
/// per-kind loadable regions, `.dynsym` with its string table and the
/// per-segment RELA sections.
///
/// # Errors
/// Returns `MalformedInput` when a required structure is missing or a
/// table runs past the end of the file.
pub fn parse(input: &[u8]) -> Result<ElfObject, ConvertError> {
    let reader = Reader::new(input);
    if input.len() < EHDR_SIZE || &input[..4] != b"\x7fELF" {
        return Err(ConvertError::malformed("not an ELF object"));
    }
    if input[4] != 1 || input[5] != 1 {
        return Err(ConvertError::malformed(
            "only 32-bit little-endian objects are supported",
        ));
    }

    let phoff = reader.u32(28)? as usize;
    let shoff = reader.u32(32)? as usize;
    let phnum = reader.u16(44)? as usize;
    let shnum = reader.u16(48)? as usize;
    let shstrndx = reader.u16(50)? as usize;

    let regions = parse_regions(&reader, phoff, phnum)?;

    let mut sections = Vec::with_capacity(shnum);
    for i in 0..shnum {
        sections.push(SectionHeader::parse(&reader, shoff + i * SHDR_SIZE)?);
    }
    let shstrtab = sections
        .get(shstrndx)
        .map(|s| reader.slice(s.offset, s.size))
        .transpose()?
        .unwrap_or(&[]);

    let dynsym_index = sections
        .iter()
        .position(|s| s.kind == SHT_DYNSYM)
        .ok_or_else(|| ConvertError::malformed("object has no dynamic symbol table"))?;
    let dynsym_sec = &sections[dynsym_index];
    let strtab_sec = sections
        .get(dynsym_sec.link as usize)
        .ok_or_else(|| ConvertError::malformed("dynamic symbol table links to no string table"))?;
    let strtab = reader.slice(strtab_sec.offset, strtab_sec.size)?;

    let dynsym = parse_dynsym(&reader, dynsym_sec, strtab)?;

    let mut relas: [Vec<Rela>; 3] = Default::default();
    for section in &sections {
        if section.kind != SHT_RELA {
            continue;
        }
        let name = cstr_at(shstrtab, section.name_offset as usize)?;
        // prefix match so the merge utility's numbered sections
        // (.rela.text.0, ...) load as ordinary input
        let bucket = if name.starts_with(".rela.text") {
            0
        } else if name.starts_with(".rela.rodata") {
            1
        } else if name.starts_with(".rela.data") {
            2
        } else {
            continue;
        };
        let bytes = reader.slice(section.offset, section.size)?;
        for entry in bytes.chunks_exact(RELA_SIZE) {
            let info = u32::from_le_bytes([entry[4], entry[5], entry[6], entry[7]]);
            relas[bucket].push(Rela {
                offset: u32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]),
                symbol: info >> 8,
                kind: (info & 0xff) as u8,
                addend: i32::from_le_bytes([entry[8], entry[9], entry[10], entry[11]]),
            });
        }
    }

    Ok(ElfObject {
        regions,
        dynsym,
        relas,
    })
}

fn parse_regions(
    reader: &Reader<'_>,
    phoff: usize,
    phnum: usize,
) -> Result<[LoadRegion; 4], ConvertError> {
    let mut regions: Vec<LoadRegion> = Vec::new();
    for i in 0..phnum {
        let base = phoff + i * PHDR_SIZE;
        if reader.u32(base)? != PT_LOAD {
            continue;
        }
        if regions.len() == 4 {
            // trailing pseudo-segment from a previous unpack, never loaded
            break;
        }
        let offset = reader.u32(base + 4)? as usize;
        let vaddr = reader.u32(base + 8)?;
        let file_size = reader.u32(base + 16)? as usize;
        let mem_size = reader.u32(base + 20)?;
        regions.push(LoadRegion {
            vaddr,
            data: reader.slice(offset, file_size)?.to_vec(),
            mem_size,
        });
    }
    regions.try_into().map_err(|_| {
        ConvertError::malformed("object must carry four loadable segments (text/rodata/data/bss)")
    })
}

fn parse_dynsym(
    reader: &Reader<'_>,
    section: &SectionHeader,
    strtab: &[u8],
) -> Result<Vec<DynSymbol>, ConvertError> {
    let bytes = reader.slice(section.offset, section.size)?;
    let mut symbols = Vec::with_capacity(bytes.len() / SYM_SIZE);
    for entry in bytes.chunks_exact(SYM_SIZE) {
        let name_offset = u32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]) as usize;
        symbols.push(DynSymbol {
            name: cstr_at(strtab, name_offset)?.to_string(),
            value: u32::from_le_bytes([entry[4], entry[5], entry[6], entry[7]]),
            shndx: u16::from_le_bytes([entry[14], entry[15]]),
        });
    }
    Ok(symbols)
}

fn cstr_at(table: &[u8], offset: usize) -> Result<&str, ConvertError> {
    let tail = table.get(offset..).ok_or_else(|| {
        ConvertError::malformed(format!("name offset {offset:#x} outside the string table"))
    })?;
    let end = tail
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| ConvertError::malformed(format!("unterminated name at {offset:#x}")))?;
    std::str::from_utf8(&tail[..end])
        .map_err(|_| ConvertError::malformed(format!("name at {offset:#x} is not UTF-8")))
}

struct SectionHeader {
    name_offset: u32,
    kind: u32,
    offset: usize,
    size: usize,
    link: u32,
}

impl SectionHeader {
    fn parse(reader: &Reader<'_>, base: usize) -> Result<Self, ConvertError> {
        Ok(Self {
            name_offset: reader.u32(base)?,
            kind: reader.u32(base + 4)?,
            offset: reader.u32(base + 16)? as usize,
            size: reader.u32(base + 20)? as usize,
            link: reader.u32(base + 24)?,
        })
    }
}

struct Reader<'a> {
    input: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self { input }
    }

    fn slice(&self, offset: usize, len: usize) -> Result<&'a [u8], ConvertError> {
        self.input.get(offset..offset + len).ok_or_else(|| {
            ConvertError::malformed(format!(
                "table at {offset:#x}..{:#x} runs past the end of the file",
                offset + len
            ))
        })
    }

    fn u16(&self, offset: usize) -> Result<u16, ConvertError> {
        let b = self.slice(offset, 2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&self, offset: usize) -> Result<u32, ConvertError> {
        let b = self.slice(offset, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

#[cfg(test)]
mod tests {
    use super::parse;
    use crate::error::ConvertError;

    #[test]
    fn rejects_non_elf_input() {
        let err = parse(b"CRO0 this is not an elf").expect_err("must reject");
        assert!(matches!(err, ConvertError::MalformedInput(_)));
    }

    #[test]
    fn rejects_sixty_four_bit_objects() {
        let mut data = vec![0u8; 64];
        data[..4].copy_from_slice(b"\x7fELF");
        data[4] = 2; // ELFCLASS64
        data[5] = 1;
        let err = parse(&data).expect_err("must reject");
        assert!(matches!(err, ConvertError::MalformedInput(_)));
    }
}
