use crate::elf::{
    ElfObject, EF_ARM_EABI_VER5, EM_ARM, ET_DYN, PF_R, PF_W, PF_X, PT_LOAD, SEG_BSS, SEG_DATA,
    SEG_RODATA, SEG_TEXT, SHF_ALLOC, SHF_EXECINSTR, SHF_INFO_LINK, SHF_WRITE, SHT_DYNSYM,
    SHT_NOBITS, SHT_PROGBITS, SHT_RELA, SHT_STRTAB,
};

const EHDR_SIZE: u32 = 52;
const PHDR_SIZE: u32 = 32;
const SHDR_SIZE: u32 = 40;
const PHDR_COUNT: u32 = 5;

const SECTION_NAMES: [&str; 12] = [
    "",
    ".text",
    ".rodata",
    ".data",
    ".bss",
    ".cro_info",
    ".dynstr",
    ".dynsym",
    ".rela.text",
    ".rela.rodata",
    ".rela.data",
    ".shstrtab",
];

/// Serializes the decoded object as an ELF32 shared object: four loadable
/// regions plus the zero-size pseudo-segment, a synthesized
/// `.dynsym`/`.dynstr` pair and one relocation section per content segment.
/// The output parses back through [`crate::elf::read::parse`].
#[must_use]
pub fn emit(object: &ElfObject) -> Vec<u8> {
    let (shstrtab, name_offsets) = build_strtab(SECTION_NAMES.iter().copied());
    let (dynstr, sym_names) =
        build_strtab(object.dynsym.iter().map(|symbol| symbol.name.as_str()));

    let mut dynsym = Vec::with_capacity(object.dynsym.len() * 16);
    for (index, symbol) in object.dynsym.iter().enumerate() {
        let info: u8 = if index == 0 {
            0
        } else if symbol.name.is_empty() {
            0x03 // local section symbol
        } else {
            0x10 // global, untyped
        };
        dynsym.extend_from_slice(&sym_names[index].to_le_bytes());
        dynsym.extend_from_slice(&symbol.value.to_le_bytes());
        dynsym.extend_from_slice(&0u32.to_le_bytes());
        dynsym.push(info);
        dynsym.push(0);
        dynsym.extend_from_slice(&symbol.shndx.to_le_bytes());
    }
    let local_count = object
        .dynsym
        .iter()
        .take_while(|symbol| symbol.name.is_empty())
        .count() as u32;

    let mut rela_blobs: [Vec<u8>; 3] = Default::default();
    for (bucket, blob) in object.relas.iter().zip(rela_blobs.iter_mut()) {
        for rela in bucket {
            blob.extend_from_slice(&rela.offset.to_le_bytes());
            blob.extend_from_slice(&((rela.symbol << 8) | u32::from(rela.kind)).to_le_bytes());
            blob.extend_from_slice(&rela.addend.to_le_bytes());
        }
    }

    // lay the blobs out after the program headers
    let mut cursor = EHDR_SIZE + PHDR_COUNT * PHDR_SIZE;
    let text_off = place(&mut cursor, object.regions[SEG_TEXT].data.len() as u32, 16);
    let rodata_off = place(&mut cursor, object.regions[SEG_RODATA].data.len() as u32, 4);
    let data_off = place(&mut cursor, object.regions[SEG_DATA].data.len() as u32, 4);
    let bss_off = cursor;
    let dynstr_off = place(&mut cursor, dynstr.len() as u32, 1);
    let dynsym_off = place(&mut cursor, dynsym.len() as u32, 4);
    let rela_offs = [
        place(&mut cursor, rela_blobs[0].len() as u32, 4),
        place(&mut cursor, rela_blobs[1].len() as u32, 4),
        place(&mut cursor, rela_blobs[2].len() as u32, 4),
    ];
    let shstrtab_off = place(&mut cursor, shstrtab.len() as u32, 1);
    let shoff = place(&mut cursor, SECTION_NAMES.len() as u32 * SHDR_SIZE, 4);

    let mut out = Vec::with_capacity(cursor as usize);

    // ELF header
    out.extend_from_slice(b"\x7fELF\x01\x01\x01\x00");
    out.extend_from_slice(&[0u8; 8]);
    out.extend_from_slice(&ET_DYN.to_le_bytes());
    out.extend_from_slice(&EM_ARM.to_le_bytes());
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&object.regions[SEG_TEXT].vaddr.to_le_bytes());
    out.extend_from_slice(&EHDR_SIZE.to_le_bytes()); // phoff
    out.extend_from_slice(&shoff.to_le_bytes());
    out.extend_from_slice(&EF_ARM_EABI_VER5.to_le_bytes());
    out.extend_from_slice(&(EHDR_SIZE as u16).to_le_bytes());
    out.extend_from_slice(&(PHDR_SIZE as u16).to_le_bytes());
    out.extend_from_slice(&(PHDR_COUNT as u16).to_le_bytes());
    out.extend_from_slice(&(SHDR_SIZE as u16).to_le_bytes());
    out.extend_from_slice(&(SECTION_NAMES.len() as u16).to_le_bytes());
    out.extend_from_slice(&((SECTION_NAMES.len() - 1) as u16).to_le_bytes());

    // program headers: text, rodata, data, bss, pseudo
    let region_offs = [text_off, rodata_off, data_off, bss_off];
    let flags = [PF_R | PF_X, PF_R, PF_R | PF_W, PF_R | PF_W];
    let aligns = [0x10u32, 4, 0x1000, 4];
    for kind in SEG_TEXT..=SEG_BSS {
        let region = &object.regions[kind];
        phdr(
            &mut out,
            region_offs[kind],
            region.vaddr,
            region.data.len() as u32,
            region.mem_size,
            flags[kind],
            aligns[kind],
        );
    }
    phdr(&mut out, 0, 0, 0, 0, PF_R | PF_X, 0x10);

    append_at(&mut out, text_off, &object.regions[SEG_TEXT].data);
    append_at(&mut out, rodata_off, &object.regions[SEG_RODATA].data);
    append_at(&mut out, data_off, &object.regions[SEG_DATA].data);
    append_at(&mut out, dynstr_off, &dynstr);
    append_at(&mut out, dynsym_off, &dynsym);
    for (blob, off) in rela_blobs.iter().zip(rela_offs) {
        append_at(&mut out, off, blob);
    }
    append_at(&mut out, shstrtab_off, &shstrtab);
    out.resize(shoff as usize, 0);

    // section headers
    shdr(&mut out, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0);
    let progbits = [
        (SEG_TEXT, SHF_ALLOC | SHF_EXECINSTR, text_off, 16u32),
        (SEG_RODATA, SHF_ALLOC, rodata_off, 4),
        (SEG_DATA, SHF_ALLOC | SHF_WRITE, data_off, 4),
    ];
    for (kind, flags, off, align) in progbits {
        let region = &object.regions[kind];
        shdr(
            &mut out,
            name_offsets[kind + 1],
            SHT_PROGBITS,
            flags,
            region.vaddr,
            off,
            region.data.len() as u32,
            0,
            0,
            align,
            0,
        );
    }
    let bss = &object.regions[SEG_BSS];
    shdr(
        &mut out,
        name_offsets[4],
        SHT_NOBITS,
        SHF_ALLOC | SHF_WRITE,
        bss.vaddr,
        bss_off,
        bss.mem_size,
        0,
        0,
        4,
        0,
    );
    shdr(
        &mut out,
        name_offsets[5],
        SHT_PROGBITS,
        SHF_ALLOC | SHF_EXECINSTR,
        0,
        bss_off,
        0,
        0,
        0,
        4,
        0,
    );
    shdr(
        &mut out,
        name_offsets[6],
        SHT_STRTAB,
        SHF_ALLOC,
        0,
        dynstr_off,
        dynstr.len() as u32,
        0,
        0,
        1,
        0,
    );
    shdr(
        &mut out,
        name_offsets[7],
        SHT_DYNSYM,
        SHF_ALLOC,
        0,
        dynsym_off,
        dynsym.len() as u32,
        6,
        local_count,
        4,
        16,
    );
    for (index, (blob, off)) in rela_blobs.iter().zip(rela_offs).enumerate() {
        shdr(
            &mut out,
            name_offsets[8 + index],
            SHT_RELA,
            SHF_ALLOC | SHF_INFO_LINK,
            0,
            off,
            blob.len() as u32,
            7,
            (index + 1) as u32,
            4,
            12,
        );
    }
    shdr(
        &mut out,
        name_offsets[11],
        SHT_STRTAB,
        0,
        0,
        shstrtab_off,
        shstrtab.len() as u32,
        0,
        0,
        1,
        0,
    );

    out
}

fn place(cursor: &mut u32, len: u32, align: u32) -> u32 {
    let start = (*cursor + align - 1) & !(align - 1);
    *cursor = start + len;
    start
}

fn append_at(out: &mut Vec<u8>, offset: u32, bytes: &[u8]) {
    if out.len() < offset as usize {
        out.resize(offset as usize, 0);
    }
    out.extend_from_slice(bytes);
}

fn build_strtab<'a>(names: impl Iterator<Item = &'a str>) -> (Vec<u8>, Vec<u32>) {
    let mut table = vec![0u8];
    let mut offsets = Vec::new();
    for name in names {
        if name.is_empty() {
            offsets.push(0);
            continue;
        }
        offsets.push(table.len() as u32);
        table.extend_from_slice(name.as_bytes());
        table.push(0);
    }
    (table, offsets)
}

fn phdr(out: &mut Vec<u8>, offset: u32, vaddr: u32, filesz: u32, memsz: u32, flags: u32, align: u32) {
    for value in [PT_LOAD, offset, vaddr, vaddr, filesz, memsz, flags, align] {
        out.extend_from_slice(&value.to_le_bytes());
    }
}

#[allow(clippy::too_many_arguments)]
fn shdr(
    out: &mut Vec<u8>,
    name: u32,
    kind: u32,
    flags: u32,
    addr: u32,
    offset: u32,
    size: u32,
    link: u32,
    info: u32,
    align: u32,
    entsize: u32,
) {
    for value in [name, kind, flags, addr, offset, size, link, info, align, entsize] {
        out.extend_from_slice(&value.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::emit;
    use crate::elf::{read, DynSymbol, ElfObject, LoadRegion, Rela, R_ABS32};
    use pretty_assertions::assert_eq;

    fn sample_object() -> ElfObject {
        let mut object = ElfObject {
            regions: [
                LoadRegion {
                    vaddr: 0x180,
                    data: vec![0x11; 0x20],
                    mem_size: 0x20,
                },
                LoadRegion {
                    vaddr: 0x1000,
                    data: vec![0x22; 0x10],
                    mem_size: 0x10,
                },
                LoadRegion {
                    vaddr: 0x2000,
                    data: vec![0x33; 8],
                    mem_size: 8,
                },
                LoadRegion {
                    vaddr: 0x3000,
                    data: Vec::new(),
                    mem_size: 0x40,
                },
            ],
            dynsym: vec![DynSymbol {
                name: String::new(),
                value: 0,
                shndx: 0,
            }],
            relas: Default::default(),
        };
        for (index, region) in object.regions.iter().enumerate() {
            object.dynsym.push(DynSymbol {
                name: String::new(),
                value: region.vaddr,
                shndx: (index + 1) as u16,
            });
        }
        object.dynsym.push(DynSymbol {
            name: "do_thing".into(),
            value: 0x184,
            shndx: 1,
        });
        object.dynsym.push(DynSymbol {
            name: "puts".into(),
            value: 0,
            shndx: 0,
        });
        object.relas[0].push(Rela {
            offset: 0x188,
            symbol: 6,
            kind: R_ABS32,
            addend: 4,
        });
        object
    }

    #[test]
    fn emitted_object_parses_back_identically() {
        let object = sample_object();
        let bytes = emit(&object);
        let reparsed = read::parse(&bytes).expect("emitted object must parse");
        assert_eq!(reparsed, object);
    }

    #[test]
    fn corrupt_symbol_name_is_diagnosed() {
        let mut bytes = emit(&sample_object());
        let at = bytes
            .windows(8)
            .position(|w| w == b"do_thing")
            .expect("name present");
        bytes[at] = 0xff;

        let err = read::parse(&bytes).expect_err("must fail");
        assert!(matches!(err, crate::error::ConvertError::MalformedInput(_)));
    }
}
