use crate::arena::Arena;
use crate::cro::{SegmentEntry, SegmentKind};

pub const PAGE_ALIGN: usize = 0x1000;
pub const WORD_ALIGN: usize = 4;
/// Fill byte for the data segment's alignment tail, so uninitialized
/// padding reads distinctly from real zero-initialized data.
pub const DATA_FILL: u8 = 0xcc;

/// Placement of the four content segments plus the header pseudo-segment
/// inside the module buffer. Code and rodata are packed contiguously with a
/// page-aligned join; data is placed independently, after the metadata
/// tables, on its own page boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentLayout {
    pub start: [u32; 4],
    pub size: [u32; 4],
    /// Combined code+rodata span (unpadded rodata end minus code start),
    /// recorded in the header as the text size.
    pub text_span: u32,
    /// Data segment size before the 0xCC alignment tail.
    pub data_raw: u32,
}

impl SegmentLayout {
    /// Appends the code and rodata segments at the arena's current
    /// position (the code start must already be 16-aligned) and records
    /// the bss memory size. The arena is left page-aligned, ready for the
    /// metadata tables.
    pub fn place_front(arena: &mut Arena, code: &[u8], rodata: &[u8], bss_size: u32) -> Self {
        let mut layout = Self::default();

        layout.start[0] = arena.pos();
        arena.push(code);
        arena.align_to(PAGE_ALIGN, 0);

        layout.start[1] = arena.pos();
        layout.size[0] = layout.start[1] - layout.start[0];
        arena.push(rodata);
        layout.size[1] = rodata.len() as u32;
        layout.text_span = arena.pos() - layout.start[0];
        arena.align_to(PAGE_ALIGN, 0);

        layout.size[3] = bss_size;
        layout
    }

    /// Appends the data segment after the metadata tables, page-aligned on
    /// both sides, filling the trailing pad with [`DATA_FILL`].
    pub fn place_data(&mut self, arena: &mut Arena, data: &[u8]) {
        arena.align_to(PAGE_ALIGN, 0);
        self.start[2] = arena.pos();
        arena.push(data);
        self.data_raw = arena.pos() - self.start[2];
        arena.align_to(PAGE_ALIGN, DATA_FILL);
        self.size[2] = arena.pos() - self.start[2];
    }

    /// The five-entry segment table: the four kinds in fixed order plus
    /// the zero-size header pseudo-segment at index 4.
    #[must_use]
    pub fn entries(&self) -> [SegmentEntry; 5] {
        [
            SegmentEntry {
                offset: self.start[0],
                size: self.size[0],
                kind: SegmentKind::Text,
            },
            SegmentEntry {
                offset: self.start[1],
                size: self.size[1],
                kind: SegmentKind::Rodata,
            },
            SegmentEntry {
                offset: self.start[2],
                size: self.size[2],
                kind: SegmentKind::Data,
            },
            SegmentEntry {
                offset: 0,
                size: self.size[3],
                kind: SegmentKind::Bss,
            },
            SegmentEntry {
                offset: 0,
                size: 0,
                kind: SegmentKind::Text,
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::{SegmentLayout, DATA_FILL};
    use crate::arena::Arena;
    use crate::cro::SegmentKind;

    #[test]
    fn packs_code_and_rodata_with_a_page_aligned_join() {
        let mut arena = Arena::new();
        let mut layout =
            SegmentLayout::place_front(&mut arena, &[0xaa; 0x120], &[0xbb; 0x40], 0x30);

        assert_eq!(layout.start[0], 0);
        assert_eq!(layout.start[1], 0x1000);
        assert_eq!(layout.size[0], 0x1000);
        assert_eq!(layout.size[1], 0x40);
        assert_eq!(layout.text_span, 0x1040);
        assert_eq!(arena.pos(), 0x2000);

        layout.place_data(&mut arena, &[0xdd; 0x10]);
        assert_eq!(layout.start[2], 0x2000);
        assert_eq!(layout.data_raw, 0x10);
        assert_eq!(layout.size[2], 0x1000);
        assert!(arena.as_slice()[0x2010..0x3000]
            .iter()
            .all(|&b| b == DATA_FILL));
    }

    #[test]
    fn bss_occupies_no_file_bytes() {
        let mut arena = Arena::new();
        let mut layout = SegmentLayout::place_front(&mut arena, &[1, 2], &[], 0x80);
        layout.place_data(&mut arena, &[]);

        let entries = layout.entries();
        assert_eq!(entries[3].offset, 0);
        assert_eq!(entries[3].size, 0x80);
        assert_eq!(entries[3].kind, SegmentKind::Bss);
        assert_eq!(entries[4].offset, 0);
        assert_eq!(entries[4].size, 0);
        assert_eq!(entries[4].kind, SegmentKind::Text);
    }
}
