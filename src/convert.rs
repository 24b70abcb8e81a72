use crate::cli::{Args, Command};
use crate::{decode, elf, encode};
use anyhow::Context;
use std::path::Path;

pub fn run(args: Args) -> anyhow::Result<()> {
    match args.command {
        Command::Pack {
            input,
            output,
            name,
        } => {
            let bytes = std::fs::read(&input).with_context(|| format!("reading {input}"))?;
            let object = elf::read::parse(&bytes).with_context(|| format!("parsing {input}"))?;
            if args.verbose {
                print_object_summary(&object);
            }
            let module_name = match name {
                Some(name) => name,
                None => file_stem(&output),
            };
            let module = encode::encode(&object, &module_name)
                .with_context(|| format!("converting {input}"))?;
            std::fs::write(&output, &module).with_context(|| format!("writing {output}"))?;
            if args.verbose {
                println!("wrote module '{module_name}': {} bytes", module.len());
            }
        }
        Command::Unpack { input, output } => {
            let bytes = std::fs::read(&input).with_context(|| format!("reading {input}"))?;
            let object = decode::decode(&bytes).with_context(|| format!("parsing {input}"))?;
            if args.verbose {
                print_object_summary(&object);
            }
            let elf = elf::write::emit(&object);
            std::fs::write(&output, &elf).with_context(|| format!("writing {output}"))?;
            if args.verbose {
                println!("wrote object: {} bytes", elf.len());
            }
        }
    }
    Ok(())
}

fn file_stem(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(path)
        .to_owned()
}

fn print_object_summary(object: &elf::ElfObject) {
    println!("segment sizes:");
    for (name, region) in ["text", "rodata", "data", "bss"]
        .into_iter()
        .zip(&object.regions)
    {
        println!("  {name}: {:#x} bytes at {:#x}", region.mem_size, region.vaddr);
    }
    let imports = object
        .dynsym
        .iter()
        .filter(|s| !s.name.is_empty() && s.shndx == 0)
        .count();
    let exports = object
        .dynsym
        .iter()
        .filter(|s| !s.name.is_empty() && s.shndx != 0)
        .count();
    let relocations: usize = object.relas.iter().map(Vec::len).sum();
    println!("symbols: {exports} exported, {imports} imported, {relocations} relocation(s)");
}
