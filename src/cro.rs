//! On-disk structures of the module format: the fixed header, segment and
//! symbol tables, relocation records and the export-trie node encoding.
//! Every offset field is a byte offset from the start of the same buffer.

use crate::addr::SegAddr;
use crate::error::ConvertError;
use crate::trie::{Branch, TrieNode, NO_BIT};

pub const MAGIC: u32 = 0x304f_5243; // "CRO0"
/// Sentinel for the four well-known function offsets when absent.
pub const ABSENT: u32 = 0xffff_ffff;

/// Reserved hash block at the front of the header.
pub const HASH_SIZE: usize = 0x80;
/// Hash block plus the 46 u32 header fields.
pub const HEADER_SIZE: usize = HASH_SIZE + 46 * 4;
/// The header region is padded to this alignment before content starts.
pub const HEADER_ALIGN: usize = 0x80;

pub const SEGMENT_ENTRY_SIZE: usize = 12;
pub const SYMBOL_ENTRY_SIZE: usize = 8;
pub const RELOCATION_ENTRY_SIZE: usize = 12;
pub const TRIE_NODE_SIZE: usize = 8;

pub const SEGMENT_COUNT: usize = 5;
/// Addressing index of the zero-size header pseudo-segment.
pub const PSEUDO_SEGMENT: u32 = 4;

/// Exports with this name prefix become the header's control-object offset
/// instead of ordinary exports.
pub const CONTROL_MARKER: &str = "nnroControlObject";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Text = 0,
    Rodata = 1,
    Data = 2,
    Bss = 3,
}

impl TryFrom<u32> for SegmentKind {
    type Error = ConvertError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Text),
            1 => Ok(Self::Rodata),
            2 => Ok(Self::Data),
            3 => Ok(Self::Bss),
            v => Err(ConvertError::malformed(format!("unknown segment kind {v}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentEntry {
    pub offset: u32,
    pub size: u32,
    pub kind: SegmentKind,
}

impl SegmentEntry {
    #[must_use]
    pub fn to_bytes(self) -> [u8; SEGMENT_ENTRY_SIZE] {
        let mut out = [0u8; SEGMENT_ENTRY_SIZE];
        out[0..4].copy_from_slice(&self.offset.to_le_bytes());
        out[4..8].copy_from_slice(&self.size.to_le_bytes());
        out[8..12].copy_from_slice(&(self.kind as u32).to_le_bytes());
        out
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, ConvertError> {
        Ok(Self {
            offset: read_u32(bytes, 0),
            size: read_u32(bytes, 4),
            kind: SegmentKind::try_from(read_u32(bytes, 8))?,
        })
    }
}

/// Export or import symbol entry. `value` is a packed segment address for
/// exports and the file offset of the first patch-chain record (or 0) for
/// imports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolEntry {
    pub name_offset: u32,
    pub value: u32,
}

impl SymbolEntry {
    #[must_use]
    pub fn to_bytes(self) -> [u8; SYMBOL_ENTRY_SIZE] {
        let mut out = [0u8; SYMBOL_ENTRY_SIZE];
        out[0..4].copy_from_slice(&self.name_offset.to_le_bytes());
        out[4..8].copy_from_slice(&self.value.to_le_bytes());
        out
    }

    #[must_use]
    pub fn parse(bytes: &[u8]) -> Self {
        Self {
            name_offset: read_u32(bytes, 0),
            value: read_u32(bytes, 4),
        }
    }
}

/// Import-patch or static relocation record. `aux` is the last-in-chain
/// flag for import patches and the referenced segment index for statics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelocationEntry {
    pub site: SegAddr,
    pub kind: u8,
    pub aux: u8,
    pub addend: i32,
}

impl RelocationEntry {
    #[must_use]
    pub fn to_bytes(self) -> [u8; RELOCATION_ENTRY_SIZE] {
        let mut out = [0u8; RELOCATION_ENTRY_SIZE];
        out[0..4].copy_from_slice(&self.site.pack().to_le_bytes());
        out[4] = self.kind;
        out[5] = self.aux;
        out[8..12].copy_from_slice(&self.addend.to_le_bytes());
        out
    }

    #[must_use]
    pub fn parse(bytes: &[u8]) -> Self {
        Self {
            site: SegAddr::unpack(read_u32(bytes, 0)),
            kind: bytes[4],
            aux: bytes[5],
            addend: i32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
        }
    }
}

#[must_use]
pub fn trie_node_to_bytes(node: &TrieNode) -> [u8; TRIE_NODE_SIZE] {
    let bit_addr = if node.bit_addr == NO_BIT { 0 } else { node.bit_addr };
    let test = (((bit_addr >> 3) & 0x1fff) << 3 | (bit_addr & 7)) as u16;
    let mut out = [0u8; TRIE_NODE_SIZE];
    out[0..2].copy_from_slice(&test.to_le_bytes());
    out[2..4].copy_from_slice(&branch_to_u16(node.left).to_le_bytes());
    out[4..6].copy_from_slice(&branch_to_u16(node.right).to_le_bytes());
    out[6..8].copy_from_slice(&node.index.to_le_bytes());
    out
}

#[must_use]
pub fn trie_node_parse(bytes: &[u8]) -> TrieNode {
    let test = u16::from_le_bytes([bytes[0], bytes[1]]);
    TrieNode {
        bit_addr: (u32::from(test) >> 3 << 3) | (u32::from(test) & 7),
        left: branch_from_u16(u16::from_le_bytes([bytes[2], bytes[3]])),
        right: branch_from_u16(u16::from_le_bytes([bytes[4], bytes[5]])),
        index: u16::from_le_bytes([bytes[6], bytes[7]]),
    }
}

fn branch_to_u16(branch: Branch) -> u16 {
    (branch.delta as u16 & 0x7fff) | (u16::from(branch.leaf) << 15)
}

fn branch_from_u16(raw: u16) -> Branch {
    // sign-extend the 15-bit delta
    let delta = ((raw << 1) as i16) >> 1;
    Branch {
        delta,
        leaf: raw & 0x8000 != 0,
    }
}

/// The module header: a reserved hash block followed by 46 little-endian
/// u32 fields in fixed order. Offsets paired with a nonzero count always
/// point inside the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub magic: u32,
    pub offs_mod_name: u32,
    pub offs_next: u32,
    pub offs_prev: u32,
    pub size_file: u32,
    pub size_bss: u32,
    pub reserved_0: u32,
    pub reserved_1: u32,
    pub offs_control: u32,
    pub offs_prologue: u32,
    pub offs_epilogue: u32,
    pub offs_unresolved: u32,
    pub offs_text: u32,
    pub size_text: u32,
    pub offs_data: u32,
    pub size_data: u32,
    pub offs_name: u32,
    pub size_name: u32,
    pub offs_segments: u32,
    pub num_segments: u32,
    pub offs_symbol_exports: u32,
    pub num_symbol_exports: u32,
    pub offs_index_exports: u32,
    pub num_index_exports: u32,
    pub offs_export_strtab: u32,
    pub size_export_strtab: u32,
    pub offs_export_tree: u32,
    pub num_export_tree: u32,
    pub offs_import_module: u32,
    pub num_import_module: u32,
    pub offs_import_patches: u32,
    pub num_import_patches: u32,
    pub offs_symbol_imports: u32,
    pub num_symbol_imports: u32,
    pub offs_index_imports: u32,
    pub num_index_imports: u32,
    pub offs_offset_imports: u32,
    pub num_offset_imports: u32,
    pub offs_import_strtab: u32,
    pub size_import_strtab: u32,
    pub offs_offset_exports: u32,
    pub num_offset_exports: u32,
    pub offs_static_relocations: u32,
    pub num_static_relocations: u32,
    pub offs_unk: u32,
    pub size_unk: u32,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            magic: MAGIC,
            offs_mod_name: 0,
            offs_next: 0,
            offs_prev: 0,
            size_file: 0,
            size_bss: 0,
            reserved_0: 0,
            reserved_1: 0,
            offs_control: ABSENT,
            offs_prologue: ABSENT,
            offs_epilogue: ABSENT,
            offs_unresolved: ABSENT,
            offs_text: 0,
            size_text: 0,
            offs_data: 0,
            size_data: 0,
            offs_name: 0,
            size_name: 0,
            offs_segments: 0,
            num_segments: 0,
            offs_symbol_exports: 0,
            num_symbol_exports: 0,
            offs_index_exports: 0,
            num_index_exports: 0,
            offs_export_strtab: 0,
            size_export_strtab: 0,
            offs_export_tree: 0,
            num_export_tree: 0,
            offs_import_module: 0,
            num_import_module: 0,
            offs_import_patches: 0,
            num_import_patches: 0,
            offs_symbol_imports: 0,
            num_symbol_imports: 0,
            offs_index_imports: 0,
            num_index_imports: 0,
            offs_offset_imports: 0,
            num_offset_imports: 0,
            offs_import_strtab: 0,
            size_import_strtab: 0,
            offs_offset_exports: 0,
            num_offset_exports: 0,
            offs_static_relocations: 0,
            num_static_relocations: 0,
            offs_unk: 0,
            size_unk: 0,
        }
    }
}

impl Header {
    fn fields(&self) -> [u32; 46] {
        [
            self.magic,
            self.offs_mod_name,
            self.offs_next,
            self.offs_prev,
            self.size_file,
            self.size_bss,
            self.reserved_0,
            self.reserved_1,
            self.offs_control,
            self.offs_prologue,
            self.offs_epilogue,
            self.offs_unresolved,
            self.offs_text,
            self.size_text,
            self.offs_data,
            self.size_data,
            self.offs_name,
            self.size_name,
            self.offs_segments,
            self.num_segments,
            self.offs_symbol_exports,
            self.num_symbol_exports,
            self.offs_index_exports,
            self.num_index_exports,
            self.offs_export_strtab,
            self.size_export_strtab,
            self.offs_export_tree,
            self.num_export_tree,
            self.offs_import_module,
            self.num_import_module,
            self.offs_import_patches,
            self.num_import_patches,
            self.offs_symbol_imports,
            self.num_symbol_imports,
            self.offs_index_imports,
            self.num_index_imports,
            self.offs_offset_imports,
            self.num_offset_imports,
            self.offs_import_strtab,
            self.size_import_strtab,
            self.offs_offset_exports,
            self.num_offset_exports,
            self.offs_static_relocations,
            self.num_static_relocations,
            self.offs_unk,
            self.size_unk,
        ]
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        for (index, field) in self.fields().into_iter().enumerate() {
            let at = HASH_SIZE + index * 4;
            out[at..at + 4].copy_from_slice(&field.to_le_bytes());
        }
        out
    }

    /// # Errors
    /// `MalformedInput` when the buffer is too short or the magic is wrong.
    pub fn parse(data: &[u8]) -> Result<Self, ConvertError> {
        if data.len() < HEADER_SIZE {
            return Err(ConvertError::malformed("module file shorter than its header"));
        }
        let field = |index: usize| read_u32(data, HASH_SIZE + index * 4);
        if field(0) != MAGIC {
            return Err(ConvertError::malformed(format!(
                "bad module magic {:#010x}",
                field(0)
            )));
        }
        Ok(Self {
            magic: field(0),
            offs_mod_name: field(1),
            offs_next: field(2),
            offs_prev: field(3),
            size_file: field(4),
            size_bss: field(5),
            reserved_0: field(6),
            reserved_1: field(7),
            offs_control: field(8),
            offs_prologue: field(9),
            offs_epilogue: field(10),
            offs_unresolved: field(11),
            offs_text: field(12),
            size_text: field(13),
            offs_data: field(14),
            size_data: field(15),
            offs_name: field(16),
            size_name: field(17),
            offs_segments: field(18),
            num_segments: field(19),
            offs_symbol_exports: field(20),
            num_symbol_exports: field(21),
            offs_index_exports: field(22),
            num_index_exports: field(23),
            offs_export_strtab: field(24),
            size_export_strtab: field(25),
            offs_export_tree: field(26),
            num_export_tree: field(27),
            offs_import_module: field(28),
            num_import_module: field(29),
            offs_import_patches: field(30),
            num_import_patches: field(31),
            offs_symbol_imports: field(32),
            num_symbol_imports: field(33),
            offs_index_imports: field(34),
            num_index_imports: field(35),
            offs_offset_imports: field(36),
            num_offset_imports: field(37),
            offs_import_strtab: field(38),
            size_import_strtab: field(39),
            offs_offset_exports: field(40),
            num_offset_exports: field(41),
            offs_static_relocations: field(42),
            num_static_relocations: field(43),
            offs_unk: field(44),
            size_unk: field(45),
        })
    }
}

/// Read-only view over a finalized module buffer.
pub struct Cro<'a> {
    pub data: &'a [u8],
    pub header: Header,
}

impl<'a> Cro<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, ConvertError> {
        let header = Header::parse(data)?;
        Ok(Self { data, header })
    }

    pub fn table(
        &self,
        offset: u32,
        count: u32,
        entry_size: usize,
        table: &'static str,
    ) -> Result<impl Iterator<Item = &'a [u8]>, ConvertError> {
        let begin = offset as usize;
        let len = count as usize * entry_size;
        let bytes = self.data.get(begin..begin + len).ok_or_else(|| {
            ConvertError::malformed(format!("{table} table runs past the end of the module"))
        })?;
        Ok(bytes.chunks_exact(entry_size))
    }

    pub fn segments(&self) -> Result<Vec<SegmentEntry>, ConvertError> {
        self.table(
            self.header.offs_segments,
            self.header.num_segments,
            SEGMENT_ENTRY_SIZE,
            "segment",
        )?
        .map(SegmentEntry::parse)
        .collect()
    }

    pub fn exports(&self) -> Result<Vec<SymbolEntry>, ConvertError> {
        Ok(self
            .table(
                self.header.offs_symbol_exports,
                self.header.num_symbol_exports,
                SYMBOL_ENTRY_SIZE,
                "export symbol",
            )?
            .map(SymbolEntry::parse)
            .collect())
    }

    pub fn imports(&self) -> Result<Vec<SymbolEntry>, ConvertError> {
        Ok(self
            .table(
                self.header.offs_symbol_imports,
                self.header.num_symbol_imports,
                SYMBOL_ENTRY_SIZE,
                "import symbol",
            )?
            .map(SymbolEntry::parse)
            .collect())
    }

    pub fn static_relocations(&self) -> Result<Vec<RelocationEntry>, ConvertError> {
        Ok(self
            .table(
                self.header.offs_static_relocations,
                self.header.num_static_relocations,
                RELOCATION_ENTRY_SIZE,
                "static relocation",
            )?
            .map(RelocationEntry::parse)
            .collect())
    }

    pub fn export_trie(&self) -> Result<Vec<TrieNode>, ConvertError> {
        Ok(self
            .table(
                self.header.offs_export_tree,
                self.header.num_export_tree,
                TRIE_NODE_SIZE,
                "export trie",
            )?
            .map(trie_node_parse)
            .collect())
    }

    /// Reads the NUL-terminated string at `offset`.
    pub fn name_at(&self, offset: u32, table: &'static str) -> Result<&'a str, ConvertError> {
        let tail = self.data.get(offset as usize..).ok_or_else(|| {
            ConvertError::malformed(format!("{table} name offset {offset:#x} out of range"))
        })?;
        let end = tail.iter().position(|&b| b == 0).ok_or_else(|| {
            ConvertError::malformed(format!("unterminated {table} name at {offset:#x}"))
        })?;
        std::str::from_utf8(&tail[..end])
            .map_err(|_| ConvertError::malformed(format!("{table} name at {offset:#x} is not UTF-8")))
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}
