use pretty_assertions::assert_eq;
use rcro::cro::{Cro, ABSENT};
use rcro::decode::decode;
use rcro::elf::{DynSymbol, ElfObject, LoadRegion, Rela, R_ABS32, R_RELATIVE};
use rcro::encode::encode;
use rcro::trie;

/// A module with every table populated: three exports, two imports with
/// patch chains, a static relocation into data, a converted base-relative
/// relocation and a control object.
fn rich_object() -> ElfObject {
    let mut object = ElfObject {
        regions: [
            LoadRegion {
                vaddr: 0x180,
                data: vec![0x90; 0x120],
                mem_size: 0x120,
            },
            LoadRegion {
                vaddr: 0x1000,
                data: vec![0x11; 0x40],
                mem_size: 0x40,
            },
            LoadRegion {
                vaddr: 0x2000,
                data: vec![0x22; 0x20],
                mem_size: 0x20,
            },
            LoadRegion {
                vaddr: 0x3000,
                data: Vec::new(),
                mem_size: 0x200,
            },
        ],
        dynsym: vec![DynSymbol {
            name: String::new(),
            value: 0,
            shndx: 0,
        }],
        relas: Default::default(),
    };

    for (name, value, shndx) in [
        ("module_init", 0x180u32, 1u16),
        ("lookup_table", 0x1008, 2),
        ("state_block", 0x2010, 3),
        ("nnroControlObject_", 0x2000, 3),
    ] {
        object.dynsym.push(DynSymbol {
            name: name.into(),
            value,
            shndx,
        });
    }
    for name in ["malloc", "free"] {
        object.dynsym.push(DynSymbol {
            name: name.into(),
            value: 0,
            shndx: 0,
        });
    }

    // two call sites for malloc, one for free
    object.relas[0].push(Rela {
        offset: 0x184,
        symbol: 5,
        kind: R_ABS32,
        addend: 0,
    });
    object.relas[2].push(Rela {
        offset: 0x2004,
        symbol: 5,
        kind: R_ABS32,
        addend: 8,
    });
    object.relas[0].push(Rela {
        offset: 0x188,
        symbol: 6,
        kind: R_ABS32,
        addend: 0,
    });

    // static pointer to data, expressed through the data section symbol
    object.dynsym.push(DynSymbol {
        name: String::new(),
        value: 0x2000,
        shndx: 3,
    });
    object.relas[0].push(Rela {
        offset: 0x18c,
        symbol: 7,
        kind: R_ABS32,
        addend: 0x10,
    });

    // baked-in absolute address inside rodata
    object.regions[2].data[0x18..0x1c].copy_from_slice(&0x1004u32.to_le_bytes());
    object.relas[2].push(Rela {
        offset: 0x2018,
        symbol: 0,
        kind: R_RELATIVE,
        addend: 0,
    });

    object
}

fn names_of(object: &ElfObject, import: bool) -> Vec<&str> {
    object
        .dynsym
        .iter()
        .filter(|s| !s.name.is_empty() && (s.shndx == 0) == import)
        .map(|s| s.name.as_str())
        .collect()
}

#[test]
fn module_round_trip_preserves_the_symbol_model() {
    let source = rich_object();
    let module = encode(&source, "rich").expect("encode");
    let decoded = decode(&module).expect("decode");

    // text and rodata carry the same bytes ahead of their alignment tails
    for kind in [0, 1] {
        let (a, b) = (&source.regions[kind], &decoded.regions[kind]);
        assert_eq!(a.data, b.data[..a.data.len()]);
        assert!(b.data[a.data.len()..].iter().all(|&x| x == 0));
    }
    // data matches except the converted placeholder, which was cleared
    let (a, b) = (&source.regions[2], &decoded.regions[2]);
    assert_eq!(a.data[..0x18], b.data[..0x18]);
    assert_eq!(&b.data[0x18..0x1c], &[0, 0, 0, 0]);
    assert_eq!(a.data[0x1c..], b.data[0x1c..a.data.len()]);
    assert!(b.data[a.data.len()..].iter().all(|&x| x == 0xcc));
    assert_eq!(decoded.regions[3].mem_size, 0x200);

    // the control object is a header field, not an export
    let exports = names_of(&decoded, false);
    assert_eq!(exports, ["module_init", "lookup_table", "state_block"]);
    assert_eq!(names_of(&decoded, true), ["malloc", "free"]);

    let cro = Cro::parse(&module).expect("parse");
    assert_ne!(cro.header.offs_control, ABSENT);
    assert_eq!(cro.header.offs_prologue, ABSENT);
    assert_eq!(cro.header.offs_epilogue, ABSENT);
    assert_eq!(cro.header.offs_unresolved, ABSENT);

    // one relocation per original site survives, absolute throughout
    let total: usize = decoded.relas.iter().map(Vec::len).sum();
    assert_eq!(total, source.relas.iter().map(Vec::len).sum::<usize>());
    for rela in decoded.relas.iter().flatten() {
        assert_eq!(rela.kind, R_ABS32);
    }
}

#[test]
fn module_round_trip_is_stable_after_one_cycle() {
    let first = encode(&rich_object(), "stable").expect("encode");
    let second = encode(&decode(&first).expect("decode"), "stable").expect("re-encode");
    let (a, b) = (
        Cro::parse(&first).expect("parse"),
        Cro::parse(&second).expect("parse"),
    );

    assert_eq!(a.segments().expect("segments"), b.segments().expect("segments"));
    assert_eq!(a.exports().expect("exports"), b.exports().expect("exports"));
    assert_eq!(a.imports().expect("imports"), b.imports().expect("imports"));
    assert_eq!(
        a.static_relocations().expect("statics"),
        b.static_relocations().expect("statics")
    );
}

#[test]
fn embedded_trie_answers_every_export() {
    let module = encode(&rich_object(), "trie").expect("encode");
    let cro = Cro::parse(&module).expect("parse");
    let exports = cro.exports().expect("exports");
    let nodes = cro.export_trie().expect("trie");

    for entry in &exports {
        let name = cro.name_at(entry.name_offset, "export").expect("name");
        let found = trie::lookup(&nodes, name.as_bytes()).expect("candidate");
        assert_eq!(exports[found as usize].name_offset, entry.name_offset);
    }

    // an absent name may return a candidate, but never a matching one
    if let Some(found) = trie::lookup(&nodes, b"never_exported") {
        let name = cro.name_at(exports[found as usize].name_offset, "export").expect("name");
        assert_ne!(name, "never_exported");
    }
}

#[test]
fn elf_bytes_pipeline_preserves_the_parsed_object() {
    let source = rich_object();
    let elf_bytes = rcro::elf::write::emit(&source);
    let reparsed = rcro::elf::read::parse(&elf_bytes).expect("reparse");

    let module = encode(&reparsed, "pipeline").expect("encode");
    let decoded = decode(&module).expect("decode");

    assert_eq!(names_of(&decoded, false), names_of(&source, false));
    assert_eq!(names_of(&decoded, true), names_of(&source, true));
    let text = &source.regions[0].data;
    assert_eq!(decoded.regions[0].data[..text.len()], text[..]);
}
