use crate::addr::{self, SegAddr};
use crate::cro::CONTROL_MARKER;
use crate::elf::{ElfObject, R_ABS32, R_ABS32_DATA, R_RELATIVE};
use crate::error::ConvertError;

/// One exported symbol: name plus its virtual address in the input object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    pub name: String,
    pub addr: u32,
}

/// One imported symbol with its patch-chain sites in encounter order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    pub name: String,
    pub sites: Vec<PatchSite>,
}

/// One fix-up site referencing an imported symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchSite {
    pub site: SegAddr,
    pub kind: u8,
    pub addend: i32,
}

/// One intra-module fix-up. `target_segment` replaces the chain flag in
/// the record's aux byte; `zero_site` marks a converted base-relative
/// relocation whose placeholder must be cleared in the output buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticReloc {
    pub site: SegAddr,
    pub kind: u8,
    pub target_segment: u32,
    pub addend: i32,
    pub zero_site: bool,
}

/// Shared symbol/relocation model consumed by both conversion directions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolModel {
    pub exports: Vec<Export>,
    pub imports: Vec<Import>,
    pub statics: Vec<StaticReloc>,
    /// Virtual address of the control-object export, when present.
    pub control: Option<u32>,
}

/// Builds the model with a single scan of the dynamic symbol table followed
/// by one pass over every relocation-bearing section.
///
/// # Errors
/// `UnresolvedAddress` when a symbol or fix-up site lies in no segment;
/// `MalformedInput` for relocation kinds outside the module kind space or
/// symbol indices outside the dynamic symbol table.
pub fn build(object: &ElfObject) -> Result<SymbolModel, ConvertError> {
    let mut model = SymbolModel::default();
    // dynsym index -> position in model.imports
    let mut import_index = vec![None; object.dynsym.len()];

    for (index, symbol) in object.dynsym.iter().enumerate() {
        if symbol.name.is_empty() {
            continue;
        }
        if symbol.shndx == 0 {
            import_index[index] = Some(model.imports.len());
            model.imports.push(Import {
                name: symbol.name.clone(),
                sites: Vec::new(),
            });
        } else if symbol.name.starts_with(CONTROL_MARKER) {
            model.control = Some(symbol.value);
        } else {
            model.exports.push(Export {
                name: symbol.name.clone(),
                addr: symbol.value,
            });
        }
    }

    for (bucket, relas) in object.relas.iter().enumerate() {
        let table = ["text relocation", "rodata relocation", "data relocation"][bucket];
        for (entry, rela) in relas.iter().enumerate() {
            let symbol = object.dynsym.get(rela.symbol as usize).ok_or_else(|| {
                ConvertError::malformed(format!(
                    "{table} entry {entry} references symbol {} outside the dynamic symbol table",
                    rela.symbol
                ))
            })?;
            let site = addr::resolve(&object.regions, rela.offset).ok_or({
                ConvertError::UnresolvedAddress {
                    address: rela.offset,
                    table,
                    index: entry,
                }
            })?;

            if let Some(import) = import_index[rela.symbol as usize] {
                let kind = match rela.kind {
                    R_ABS32 | R_ABS32_DATA => R_ABS32,
                    kind => {
                        return Err(ConvertError::malformed(format!(
                            "{table} entry {entry} has unsupported import kind {kind:#04x}"
                        )))
                    }
                };
                model.imports[import].sites.push(PatchSite {
                    site,
                    kind,
                    addend: rela.addend,
                });
                continue;
            }

            let reloc = match rela.kind {
                R_ABS32 | R_ABS32_DATA => {
                    let target = symbol.value.wrapping_add(rela.addend as u32);
                    let at = addr::resolve(&object.regions, target).ok_or({
                        ConvertError::UnresolvedAddress {
                            address: target,
                            table,
                            index: entry,
                        }
                    })?;
                    StaticReloc {
                        site,
                        kind: R_ABS32,
                        target_segment: at.segment,
                        addend: at.offset as i32,
                        zero_site: false,
                    }
                }
                R_RELATIVE => {
                    // the placeholder bytes hold an absolute address baked
                    // in by the original linker; fold it into an absolute
                    // fix-up and clear the site
                    let value = object.read_u32_at(rela.offset).ok_or({
                        ConvertError::UnresolvedAddress {
                            address: rela.offset,
                            table,
                            index: entry,
                        }
                    })?;
                    let at = addr::resolve(&object.regions, value).ok_or({
                        ConvertError::UnresolvedAddress {
                            address: value,
                            table,
                            index: entry,
                        }
                    })?;
                    StaticReloc {
                        site,
                        kind: R_ABS32,
                        target_segment: at.segment,
                        addend: at.offset as i32,
                        zero_site: true,
                    }
                }
                kind => {
                    return Err(ConvertError::malformed(format!(
                        "{table} entry {entry} has unsupported kind {kind:#04x}"
                    )))
                }
            };
            model.statics.push(reloc);
        }
    }

    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::{build, PatchSite};
    use crate::addr::SegAddr;
    use crate::elf::{DynSymbol, ElfObject, LoadRegion, Rela, R_ABS32, R_RELATIVE};
    use crate::error::ConvertError;

    fn object_with_regions() -> ElfObject {
        ElfObject {
            regions: [
                LoadRegion {
                    vaddr: 0x180,
                    data: vec![0; 0x100],
                    mem_size: 0x100,
                },
                LoadRegion {
                    vaddr: 0x1000,
                    data: vec![0; 0x40],
                    mem_size: 0x40,
                },
                LoadRegion {
                    vaddr: 0x2000,
                    data: vec![0; 0x20],
                    mem_size: 0x20,
                },
                LoadRegion {
                    vaddr: 0x3000,
                    data: Vec::new(),
                    mem_size: 0x10,
                },
            ],
            dynsym: vec![DynSymbol {
                name: String::new(),
                value: 0,
                shndx: 0,
            }],
            relas: Default::default(),
        }
    }

    #[test]
    fn classifies_exports_imports_and_the_control_object() {
        let mut object = object_with_regions();
        object.dynsym.push(DynSymbol {
            name: "visible".into(),
            value: 0x184,
            shndx: 1,
        });
        object.dynsym.push(DynSymbol {
            name: "memcpy".into(),
            value: 0,
            shndx: 0,
        });
        object.dynsym.push(DynSymbol {
            name: "nnroControlObject_".into(),
            value: 0x2004,
            shndx: 3,
        });

        let model = build(&object).expect("build");
        assert_eq!(model.exports.len(), 1);
        assert_eq!(model.exports[0].name, "visible");
        assert_eq!(model.imports.len(), 1);
        assert_eq!(model.imports[0].name, "memcpy");
        assert_eq!(model.control, Some(0x2004));
    }

    #[test]
    fn groups_patch_sites_per_imported_symbol() {
        let mut object = object_with_regions();
        object.dynsym.push(DynSymbol {
            name: "puts".into(),
            value: 0,
            shndx: 0,
        });
        object.relas[0].push(Rela {
            offset: 0x188,
            symbol: 1,
            kind: R_ABS32,
            addend: 0,
        });
        object.relas[2].push(Rela {
            offset: 0x2008,
            symbol: 1,
            kind: R_ABS32,
            addend: 4,
        });

        let model = build(&object).expect("build");
        assert_eq!(
            model.imports[0].sites,
            vec![
                PatchSite {
                    site: SegAddr {
                        segment: 0,
                        offset: 8
                    },
                    kind: R_ABS32,
                    addend: 0,
                },
                PatchSite {
                    site: SegAddr {
                        segment: 2,
                        offset: 8
                    },
                    kind: R_ABS32,
                    addend: 4,
                },
            ]
        );
    }

    #[test]
    fn relative_relocation_becomes_an_absolute_segment_fixup() {
        let mut object = object_with_regions();
        // placeholder at text+0x10 holds the rodata start address
        object.regions[0].data[0x10..0x14].copy_from_slice(&0x1000u32.to_le_bytes());
        object.relas[0].push(Rela {
            offset: 0x190,
            symbol: 0,
            kind: R_RELATIVE,
            addend: 0,
        });

        let model = build(&object).expect("build");
        assert_eq!(model.statics.len(), 1);
        let reloc = model.statics[0];
        assert_eq!(reloc.kind, R_ABS32);
        assert_eq!(reloc.target_segment, 1);
        assert_eq!(reloc.addend, 0);
        assert!(reloc.zero_site);
    }

    #[test]
    fn unresolvable_placeholder_aborts_the_conversion() {
        let mut object = object_with_regions();
        object.regions[0].data[0x10..0x14].copy_from_slice(&0xdead_0000u32.to_le_bytes());
        object.relas[0].push(Rela {
            offset: 0x190,
            symbol: 0,
            kind: R_RELATIVE,
            addend: 0,
        });

        let err = build(&object).expect_err("must abort");
        assert!(matches!(
            err,
            ConvertError::UnresolvedAddress {
                address: 0xdead_0000,
                ..
            }
        ));
    }

    #[test]
    fn static_absolute_relocation_resolves_through_its_symbol() {
        let mut object = object_with_regions();
        object.dynsym.push(DynSymbol {
            name: String::new(),
            value: 0x1000,
            shndx: 2,
        });
        object.relas[0].push(Rela {
            offset: 0x184,
            symbol: 1,
            kind: R_ABS32,
            addend: 0x20,
        });

        let model = build(&object).expect("build");
        let reloc = model.statics[0];
        assert_eq!(reloc.target_segment, 1);
        assert_eq!(reloc.addend, 0x20);
        assert!(!reloc.zero_site);
    }
}
