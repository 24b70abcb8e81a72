use crate::cro::{Cro, RelocationEntry, SegmentKind, RELOCATION_ENTRY_SIZE, SEGMENT_COUNT};
use crate::elf::{DynSymbol, ElfObject, LoadRegion, Rela, R_ABS32, SEG_BSS};
use crate::error::ConvertError;

const SEGMENT_ORDER: [SegmentKind; 4] = [
    SegmentKind::Text,
    SegmentKind::Rodata,
    SegmentKind::Data,
    SegmentKind::Bss,
];

/// Converts a module image back into a standard object. Region virtual
/// addresses equal the segment file offsets, so addresses packed into the
/// module stay valid verbatim; bss is placed right behind the data
/// segment's in-memory image.
///
/// Import patches always come back as plain absolute relocations. A module
/// produced from converted base-relative relocations therefore decodes to
/// absolute ones; the original flavour is not recoverable.
///
/// # Errors
/// `MalformedInput` for any structural violation of the module format.
pub fn decode(data: &[u8]) -> Result<ElfObject, ConvertError> {
    let cro = Cro::parse(data)?;
    let segments = cro.segments()?;
    if segments.len() != SEGMENT_COUNT {
        return Err(ConvertError::malformed(format!(
            "expected {SEGMENT_COUNT} segment entries, found {}",
            segments.len()
        )));
    }
    for (entry, kind) in segments.iter().zip(SEGMENT_ORDER) {
        if entry.kind != kind {
            return Err(ConvertError::malformed(format!(
                "segment table out of order: expected {kind:?}, found {:?}",
                entry.kind
            )));
        }
    }
    if segments[4].size != 0 || segments[4].kind != SegmentKind::Text {
        return Err(ConvertError::malformed(
            "trailing pseudo segment must be an empty text entry",
        ));
    }

    let mut regions: [LoadRegion; 4] = Default::default();
    for (index, entry) in segments.iter().take(4).enumerate() {
        if index == SEG_BSS {
            regions[index] = LoadRegion {
                vaddr: cro.header.offs_data + cro.header.size_data,
                data: Vec::new(),
                mem_size: entry.size,
            };
            continue;
        }
        let begin = entry.offset as usize;
        let bytes = data
            .get(begin..begin + entry.size as usize)
            .ok_or_else(|| {
                ConvertError::malformed(format!(
                    "{kind:?} segment runs past the end of the module",
                    kind = entry.kind
                ))
            })?;
        regions[index] = LoadRegion {
            vaddr: entry.offset,
            data: bytes.to_vec(),
            mem_size: entry.size,
        };
    }

    let mut object = ElfObject {
        regions,
        ..ElfObject::default()
    };

    // symbol values are based on region virtual addresses, which for bss
    // differ from the (zero) segment-table offset
    let bases = [
        object.regions[0].vaddr,
        object.regions[1].vaddr,
        object.regions[2].vaddr,
        object.regions[3].vaddr,
        0,
    ];

    // the null symbol, then one section symbol per segment entry
    object.dynsym.push(DynSymbol {
        name: String::new(),
        value: 0,
        shndx: 0,
    });
    for index in 0..segments.len() {
        object.dynsym.push(DynSymbol {
            name: String::new(),
            value: bases[index],
            shndx: index as u16 + 1,
        });
    }

    for export in cro.exports()? {
        let name = cro.name_at(export.name_offset, "export")?;
        let at = crate::addr::SegAddr::unpack(export.value);
        if at.segment as usize >= SEGMENT_COUNT {
            return Err(ConvertError::malformed(format!(
                "export {name} targets segment {}",
                at.segment
            )));
        }
        object.dynsym.push(DynSymbol {
            name: name.to_owned(),
            value: bases[at.segment as usize] + at.offset,
            shndx: at.segment as u16 + 1,
        });
    }

    for import in cro.imports()? {
        let name = cro.name_at(import.name_offset, "import")?;
        let symbol = object.dynsym.len() as u32;
        object.dynsym.push(DynSymbol {
            name: name.to_owned(),
            value: 0,
            shndx: 0,
        });
        if import.value != 0 {
            walk_chain(&cro, import.value, symbol, &mut object)?;
        }
    }

    for (index, entry) in cro.static_relocations()?.into_iter().enumerate() {
        if entry.aux as usize >= SEGMENT_COUNT {
            return Err(ConvertError::malformed(format!(
                "static relocation {index} references segment {}",
                entry.aux
            )));
        }
        push_reloc(
            &mut object,
            entry.site,
            entry.kind,
            u32::from(entry.aux) + 1,
            entry.addend,
            "static relocation",
            index,
        )?;
    }

    Ok(object)
}

/// Follows one import patch chain, emitting one RELA per record. The walk
/// is bounded by the header's record count so a corrupted last flag cannot
/// loop forever.
fn walk_chain(
    cro: &Cro,
    first: u32,
    symbol: u32,
    object: &mut ElfObject,
) -> Result<(), ConvertError> {
    let record_size = RELOCATION_ENTRY_SIZE as u32;
    let table_start = cro.header.offs_import_patches;
    let table_end = cro
        .header
        .num_import_patches
        .checked_mul(record_size)
        .and_then(|len| table_start.checked_add(len))
        .ok_or_else(|| {
            ConvertError::malformed("import patch table extends past the address space")
        })?;
    let mut offset = first;
    for step in 0..cro.header.num_import_patches {
        let in_table = offset >= table_start
            && offset.checked_add(record_size).is_some_and(|end| end <= table_end)
            && (offset - table_start) % record_size == 0;
        if !in_table {
            return Err(ConvertError::malformed(format!(
                "import patch chain leaves the patch table at {offset:#x}"
            )));
        }
        let begin = offset as usize;
        let bytes = cro
            .data
            .get(begin..begin + RELOCATION_ENTRY_SIZE)
            .ok_or_else(|| {
                ConvertError::malformed("import patch record runs past the end of the module")
            })?;
        let entry = RelocationEntry::parse(bytes);
        push_reloc(
            object,
            entry.site,
            entry.kind,
            symbol,
            entry.addend,
            "import patch",
            step as usize,
        )?;
        if entry.aux != 0 {
            return Ok(());
        }
        offset += record_size;
    }
    Err(ConvertError::malformed(
        "import patch chain never sets the last flag",
    ))
}

fn push_reloc(
    object: &mut ElfObject,
    site: crate::addr::SegAddr,
    kind: u8,
    symbol: u32,
    addend: i32,
    table: &'static str,
    index: usize,
) -> Result<(), ConvertError> {
    let segment = site.segment as usize;
    if segment >= object.relas.len() {
        return Err(ConvertError::malformed(format!(
            "{table} {index} patches segment {segment}, which holds no file bytes"
        )));
    }
    if kind != R_ABS32 {
        return Err(ConvertError::malformed(format!(
            "{table} {index} has unsupported kind {kind:#04x}"
        )));
    }
    object.relas[segment].push(Rela {
        offset: object.regions[segment].vaddr + site.offset,
        symbol,
        kind: R_ABS32,
        addend,
    });
    Ok(())
}
