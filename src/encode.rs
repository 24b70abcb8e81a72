use crate::addr;
use crate::arena::Arena;
use crate::cro::{
    trie_node_to_bytes, Header, RelocationEntry, SymbolEntry, HEADER_ALIGN, HEADER_SIZE,
    RELOCATION_ENTRY_SIZE, SEGMENT_COUNT, SEGMENT_ENTRY_SIZE, SYMBOL_ENTRY_SIZE, TRIE_NODE_SIZE,
};
use crate::elf::{ElfObject, SEG_BSS, SEG_DATA, SEG_RODATA, SEG_TEXT};
use crate::error::ConvertError;
use crate::layout::{SegmentLayout, WORD_ALIGN};
use crate::resolver::{self, SymbolModel};
use crate::trie;

/// Converts a standard object into a module image. The buffer is built in
/// one forward pass: segments and strings are appended as they become
/// known, cross-referencing tables are reserved and back-filled once every
/// offset they mention is final, and the header is written last.
///
/// # Errors
/// Any of the §7 conversion failures; no partial output is ever returned.
pub fn encode(object: &ElfObject, module_name: &str) -> Result<Vec<u8>, ConvertError> {
    let model = resolver::build(object)?;

    let mut arena = Arena::new();
    let mut header = Header::default();
    let header_region = arena.reserve(HEADER_SIZE, "header");
    arena.align_to(HEADER_ALIGN, 0);

    let mut segments = SegmentLayout::place_front(
        &mut arena,
        &object.regions[SEG_TEXT].data,
        &object.regions[SEG_RODATA].data,
        object.regions[SEG_BSS].mem_size,
    );

    // module name string
    header.offs_mod_name = arena.pos();
    header.offs_name = arena.pos();
    header.size_name = module_name.len() as u32 + 1;
    arena.push(module_name.as_bytes());
    arena.push(&[0]);

    // segment table
    arena.align_to(WORD_ALIGN, 0);
    header.offs_segments = arena.pos();
    header.num_segments = SEGMENT_COUNT as u32;
    let segment_table = arena.reserve(SEGMENT_COUNT * SEGMENT_ENTRY_SIZE, "segment");

    // export tables
    let export_count = model.exports.len();
    header.offs_symbol_exports = arena.pos();
    header.num_symbol_exports = export_count as u32;
    let export_table = arena.reserve(export_count * SYMBOL_ENTRY_SIZE, "export symbol");

    header.offs_export_tree = arena.pos();
    header.num_export_tree = export_count as u32;
    let trie_table = arena.reserve(export_count * TRIE_NODE_SIZE, "export trie");

    header.offs_index_exports = arena.pos();
    header.offs_export_strtab = arena.pos();
    let export_names = push_strings(&mut arena, model.exports.iter().map(|e| e.name.as_str()));
    header.size_export_strtab = arena.pos() - header.offs_export_strtab;
    arena.align_to(WORD_ALIGN, 0);

    // import tables
    let patch_count: usize = model.imports.iter().map(|i| i.sites.len()).sum();
    header.offs_import_module = arena.pos();
    header.offs_import_patches = arena.pos();
    header.num_import_patches = patch_count as u32;
    let patch_table = arena.reserve(patch_count * RELOCATION_ENTRY_SIZE, "import patch");

    header.offs_symbol_imports = arena.pos();
    header.num_symbol_imports = model.imports.len() as u32;
    let import_table = arena.reserve(model.imports.len() * SYMBOL_ENTRY_SIZE, "import symbol");

    header.offs_index_imports = arena.pos();
    header.offs_offset_imports = arena.pos();
    header.offs_import_strtab = arena.pos();
    let import_names = push_strings(&mut arena, model.imports.iter().map(|i| i.name.as_str()));
    header.size_import_strtab = arena.pos() - header.offs_import_strtab;

    header.offs_offset_exports = arena.pos();
    header.offs_unk = arena.pos();

    // static relocation table
    header.offs_static_relocations = arena.pos();
    header.num_static_relocations = model.statics.len() as u32;
    let static_table = arena.reserve(
        model.statics.len() * RELOCATION_ENTRY_SIZE,
        "static relocation",
    );

    // data segment last, so converted placeholders can be cleared in place
    segments.place_data(&mut arena, &object.regions[SEG_DATA].data);

    back_fill(
        &mut arena,
        &mut header,
        &model,
        object,
        &segments,
        &BackFillTables {
            segment_table,
            export_table,
            trie_table,
            patch_table,
            import_table,
            static_table,
        },
        &export_names,
        &import_names,
    )?;

    header.offs_text = segments.start[0];
    header.size_text = segments.text_span;
    header.offs_data = segments.start[2];
    header.size_data = segments.data_raw;
    header.size_bss = segments.size[3];
    header.size_file = arena.pos();
    arena.patch(&header_region, 0, &header.to_bytes())?;

    Ok(arena.into_vec())
}

struct BackFillTables {
    segment_table: crate::arena::Reserved,
    export_table: crate::arena::Reserved,
    trie_table: crate::arena::Reserved,
    patch_table: crate::arena::Reserved,
    import_table: crate::arena::Reserved,
    static_table: crate::arena::Reserved,
}

#[allow(clippy::too_many_arguments)]
fn back_fill(
    arena: &mut Arena,
    header: &mut Header,
    model: &SymbolModel,
    object: &ElfObject,
    segments: &SegmentLayout,
    tables: &BackFillTables,
    export_names: &[u32],
    import_names: &[u32],
) -> Result<(), ConvertError> {
    for (index, export) in model.exports.iter().enumerate() {
        let at = addr::resolve(&object.regions, export.addr).ok_or({
            ConvertError::UnresolvedAddress {
                address: export.addr,
                table: "export symbol",
                index,
            }
        })?;
        let entry = SymbolEntry {
            name_offset: export_names[index],
            value: at.pack(),
        };
        arena.patch(&tables.export_table, index * SYMBOL_ENTRY_SIZE, &entry.to_bytes())?;
    }

    let keys: Vec<(Vec<u8>, u16)> = model
        .exports
        .iter()
        .enumerate()
        .map(|(index, export)| (export.name.clone().into_bytes(), index as u16))
        .collect();
    for (index, node) in trie::build(&keys)?.iter().enumerate() {
        arena.patch(&tables.trie_table, index * TRIE_NODE_SIZE, &trie_node_to_bytes(node))?;
    }

    if let Some(control) = model.control {
        let at = addr::resolve(&object.regions, control).ok_or({
            ConvertError::UnresolvedAddress {
                address: control,
                table: "control object",
                index: 0,
            }
        })?;
        header.offs_control = at.pack();
    }

    // import patch chains, contiguous per symbol, last flag on the final
    // record of each chain
    let mut record = 0usize;
    for (index, import) in model.imports.iter().enumerate() {
        let chain_offset = if import.sites.is_empty() {
            0
        } else {
            header.offs_import_patches + (record * RELOCATION_ENTRY_SIZE) as u32
        };
        for (position, site) in import.sites.iter().enumerate() {
            let entry = RelocationEntry {
                site: site.site,
                kind: site.kind,
                aux: u8::from(position + 1 == import.sites.len()),
                addend: site.addend,
            };
            arena.patch(&tables.patch_table, record * RELOCATION_ENTRY_SIZE, &entry.to_bytes())?;
            record += 1;
        }
        let entry = SymbolEntry {
            name_offset: import_names[index],
            value: chain_offset,
        };
        arena.patch(&tables.import_table, index * SYMBOL_ENTRY_SIZE, &entry.to_bytes())?;
    }

    for (index, reloc) in model.statics.iter().enumerate() {
        let entry = RelocationEntry {
            site: reloc.site,
            kind: reloc.kind,
            aux: reloc.target_segment as u8,
            addend: reloc.addend,
        };
        arena.patch(&tables.static_table, index * RELOCATION_ENTRY_SIZE, &entry.to_bytes())?;
        if reloc.zero_site {
            let at = segments.start[reloc.site.segment as usize] + reloc.site.offset;
            arena.overwrite_u32(at as usize, 0);
        }
    }

    for (index, entry) in segments.entries().into_iter().enumerate() {
        arena.patch(&tables.segment_table, index * SEGMENT_ENTRY_SIZE, &entry.to_bytes())?;
    }
    Ok(())
}

/// Appends NUL-terminated strings and returns the file offset of each.
fn push_strings<'a>(arena: &mut Arena, names: impl Iterator<Item = &'a str>) -> Vec<u32> {
    let mut offsets = Vec::new();
    for name in names {
        offsets.push(arena.pos());
        arena.push(name.as_bytes());
        arena.push(&[0]);
    }
    offsets
}
