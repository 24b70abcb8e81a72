use crate::error::ConvertError;

/// One export-trie node. Node 0 doubles as the sentinel guide: a lookup
/// starts from its left branch and never tests its bit. Every node carries
/// an export-table index, but the index is only meaningful when the node is
/// reached through a leaf branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrieNode {
    /// Bit address tested at this node, LSB-first within each byte.
    /// Leaves never test a bit and keep [`NO_BIT`].
    pub bit_addr: u32,
    pub left: Branch,
    pub right: Branch,
    pub index: u16,
}

/// Branch to another node, as a signed delta relative to the current node
/// index. `leaf` marks the destination as a final candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Branch {
    pub delta: i16,
    pub leaf: bool,
}

pub const NO_BIT: u32 = u32::MAX;

const LEAF: Branch = Branch {
    delta: 0,
    leaf: true,
};

/// Tests bit `pos` of `name`, LSB-first within each byte; positions beyond
/// the name always test false.
#[must_use]
pub fn test_bit(name: &[u8], pos: u32) -> bool {
    let byte = (pos >> 3) as usize;
    byte < name.len() && (name[byte] >> (pos & 7)) & 1 != 0
}

struct BuildNode {
    key: Vec<u8>,
    node: TrieNode,
}

/// Builds the compact binary trie over `(name, export-table index)` pairs.
/// Node order is build order, not name order. An empty input produces an
/// empty table; a single entry produces one leaf with no internal split.
///
/// # Errors
/// `DuplicateKey` when two entries share an identical name.
pub fn build(entries: &[(Vec<u8>, u16)]) -> Result<Vec<TrieNode>, ConvertError> {
    let mut nodes: Vec<BuildNode> = entries
        .iter()
        .map(|(key, index)| BuildNode {
            key: key.clone(),
            node: TrieNode {
                bit_addr: NO_BIT,
                left: LEAF,
                right: LEAF,
                index: *index,
            },
        })
        .collect();
    if nodes.is_empty() {
        return Ok(Vec::new());
    }

    let bit_len = entries.iter().map(|(key, _)| key.len() as u32 * 8).max().unwrap_or(0);
    build_range(&mut nodes, 0, entries.len(), bit_len)?;
    Ok(nodes.into_iter().map(|build| build.node).collect())
}

fn build_range(
    nodes: &mut [BuildNode],
    lo: usize,
    hi: usize,
    bit_len: u32,
) -> Result<(), ConvertError> {
    let count = hi - lo;
    if count <= 1 {
        return Ok(());
    }

    // first bit position with minimal imbalance wins, scanning from bit 0
    let mut best_bit = 0;
    let mut badness = i64::MAX;
    for bit in 0..bit_len {
        let passing = nodes[lo..hi]
            .iter()
            .filter(|n| test_bit(&n.key, bit))
            .count();
        let current = (passing as i64 - (count / 2) as i64).abs();
        if current < badness {
            badness = current;
            best_bit = bit;
        }
    }

    // stable partition: entries testing false, then entries testing true
    let (falses, trues): (Vec<usize>, Vec<usize>) =
        (lo..hi).partition(|&i| !test_bit(&nodes[i].key, best_bit));
    let split = falses.len();
    if split == 0 || split == count {
        let name = String::from_utf8_lossy(&nodes[lo].key).into_owned();
        return Err(ConvertError::DuplicateKey(name));
    }
    apply_order(nodes, lo, falses.into_iter().chain(trues));

    build_range(nodes, lo, lo + split, bit_len)?;
    build_range(nodes, lo + split, hi, bit_len)?;

    // the head of the true side becomes this call's decision node; the
    // head of the whole range becomes the guide pointing at it
    let mid = lo + split;
    nodes[mid].node.right = nodes[mid].node.left;
    nodes[mid].node.left = Branch {
        delta: nodes[lo].node.left.delta - split as i16,
        leaf: nodes[lo].node.left.leaf,
    };
    nodes[mid].node.bit_addr = best_bit;
    nodes[lo].node.left = Branch {
        delta: split as i16,
        leaf: false,
    };
    Ok(())
}

fn apply_order(nodes: &mut [BuildNode], lo: usize, order: impl Iterator<Item = usize>) {
    let placeholder = || BuildNode {
        key: Vec::new(),
        node: TrieNode {
            bit_addr: NO_BIT,
            left: LEAF,
            right: LEAF,
            index: 0,
        },
    };
    let reordered: Vec<BuildNode> = order
        .map(|i| std::mem::replace(&mut nodes[i], placeholder()))
        .collect();
    for (at, node) in reordered.into_iter().enumerate() {
        nodes[lo + at] = node;
    }
}

/// Walks the trie for `query` and returns the candidate export-table
/// index, or `None` for an empty trie or structurally broken branches. The
/// caller must verify the candidate by full name comparison; a mismatch
/// means the name is not present.
#[must_use]
pub fn lookup(nodes: &[TrieNode], query: &[u8]) -> Option<u16> {
    if nodes.is_empty() {
        return None;
    }
    let mut pos = 0i32;
    let mut next = nodes[0].left;
    // a well-formed trie terminates within one step per node
    for _ in 0..=nodes.len() {
        pos += i32::from(next.delta);
        let node = nodes.get(usize::try_from(pos).ok()?)?;
        if next.leaf {
            return Some(node.index);
        }
        next = if test_bit(query, node.bit_addr) {
            node.right
        } else {
            node.left
        };
    }
    None
}
