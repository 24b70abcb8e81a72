use crate::elf::LoadRegion;

/// Packed (segment index, intra-segment offset) pair used everywhere a
/// location inside a module must be named. The index occupies the low
/// nibble, the offset the upper 28 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegAddr {
    pub segment: u32,
    pub offset: u32,
}

impl SegAddr {
    #[must_use]
    pub fn pack(self) -> u32 {
        (self.offset << 4) | (self.segment & 0xf)
    }

    #[must_use]
    pub fn unpack(value: u32) -> Self {
        Self {
            segment: value & 0xf,
            offset: value >> 4,
        }
    }
}

/// Finds the segment whose address range contains `addr`. Regions are
/// scanned in segment-index order and the first hit wins; `None` means the
/// address lies in no known segment, which callers must treat as an error
/// except for sentinel cases they check explicitly.
#[must_use]
pub fn resolve(regions: &[LoadRegion], addr: u32) -> Option<SegAddr> {
    for (index, region) in regions.iter().enumerate() {
        let end = region.vaddr.wrapping_add(region.mem_size);
        if addr >= region.vaddr && addr < end {
            return Some(SegAddr {
                segment: index as u32,
                offset: addr - region.vaddr,
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::{resolve, SegAddr};
    use crate::elf::LoadRegion;

    #[test]
    fn pack_unpack_is_identity_over_the_valid_range() {
        for segment in 0..=4 {
            for offset in [0u32, 1, 0x10, 0xfff, 0x0fff_ffff] {
                let addr = SegAddr { segment, offset };
                assert_eq!(SegAddr::unpack(addr.pack()), addr);
            }
        }
    }

    #[test]
    fn resolve_picks_the_first_containing_region() {
        let regions = vec![
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
        ];
        assert_eq!(
            resolve(&regions, 0x184),
            Some(SegAddr {
                segment: 0,
                offset: 4
            })
        );
        assert_eq!(
            resolve(&regions, 0x103f),
            Some(SegAddr {
                segment: 1,
                offset: 0x3f
            })
        );
        assert_eq!(resolve(&regions, 0x1040), None);
        assert_eq!(resolve(&regions, 0), None);
    }
}
