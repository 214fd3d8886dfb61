//! Arena of every block the engine has seen.
//!
//! Blocks are addressed by [`BlockId`] (their slot in the arena). Parent,
//! child and sibling relations are derived from a parent-hash index instead
//! of pointers between blocks.

use crate::core::Block;
use std::collections::HashMap;

pub type BlockId = usize;

#[derive(Debug, Default)]
pub struct BlockTree {
    blocks: Vec<Block>,
    by_hash: HashMap<String, BlockId>,
    /// parent hash -> blocks naming it as parent, in arrival order
    by_parent: HashMap<String, Vec<BlockId>>,
}

impl BlockTree {
    pub fn new() -> BlockTree {
        BlockTree::default()
    }

    /// Record a block; returns its id and whether it was new
    pub fn insert(&mut self, block: Block) -> (BlockId, bool) {
        if let Some(&id) = self.by_hash.get(block.get_hash()) {
            return (id, false);
        }
        let id = self.blocks.len();
        self.by_hash.insert(block.get_hash().to_string(), id);
        self.by_parent
            .entry(block.get_parent_hash().to_string())
            .or_default()
            .push(id);
        self.blocks.push(block);
        (id, true)
    }

    /// Swap the content of a slot for a rewritten block with the same parent.
    /// Blocks that named the old hash as parent are no longer its children.
    pub fn replace(&mut self, id: BlockId, block: Block) {
        let old = &self.blocks[id];
        debug_assert_eq!(old.get_parent_hash(), block.get_parent_hash());
        if self.by_hash.get(old.get_hash()) == Some(&id) {
            self.by_hash.remove(old.get_hash());
        }
        self.by_hash.insert(block.get_hash().to_string(), id);
        self.blocks[id] = block;
    }

    /// Ids are minted by `insert` and only invalidated by `retain`
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id]
    }

    pub fn find(&self, hash: &str) -> Option<BlockId> {
        self.by_hash.get(hash).copied()
    }

    pub fn children(&self, id: BlockId) -> &[BlockId] {
        self.by_parent
            .get(self.blocks[id].get_hash())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Other blocks claiming the same parent, in arrival order
    pub fn siblings(&self, id: BlockId) -> Vec<BlockId> {
        self.by_parent
            .get(self.blocks[id].get_parent_hash())
            .map(|ids| ids.iter().copied().filter(|&s| s != id).collect())
            .unwrap_or_default()
    }

    /// Size of the recorded subtree below `id`
    pub fn descendant_count(&self, id: BlockId) -> usize {
        let mut count = 0;
        let mut stack: Vec<BlockId> = self.children(id).to_vec();
        while let Some(next) = stack.pop() {
            count += 1;
            stack.extend_from_slice(self.children(next));
        }
        count
    }

    /// Keep the blocks `keep` accepts and rebuild the indexes. Survivors keep
    /// their relative order; the result maps every old id to its new one.
    pub fn retain(&mut self, mut keep: impl FnMut(BlockId, &Block) -> bool) -> Vec<Option<BlockId>> {
        let blocks = std::mem::take(&mut self.blocks);
        self.by_hash.clear();
        self.by_parent.clear();

        let mut remap = Vec::with_capacity(blocks.len());
        for (id, block) in blocks.into_iter().enumerate() {
            if keep(id, &block) {
                let (new_id, _) = self.insert(block);
                remap.push(Some(new_id));
            } else {
                remap.push(None);
            }
        }
        remap
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn child(parent: &Block, payload: &str, created_at: i64) -> Block {
        Block::new(
            parent.get_height() + 1,
            parent.get_hash().to_string(),
            payload.to_string(),
            created_at,
        )
    }

    #[test]
    fn test_insert_is_idempotent() {
        let mut tree = BlockTree::new();
        let (a, fresh) = tree.insert(Block::genesis());
        assert!(fresh);
        let (b, fresh) = tree.insert(Block::genesis());
        assert!(!fresh);
        assert_eq!(a, b);
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_children_and_siblings() {
        let genesis = Block::genesis();
        let left = child(&genesis, "left", 1);
        let right = child(&genesis, "right", 2);
        let mut tree = BlockTree::new();
        let (g, _) = tree.insert(genesis);
        let (l, _) = tree.insert(left);
        let (r, _) = tree.insert(right);

        assert_eq!(tree.children(g), &[l, r]);
        assert_eq!(tree.siblings(l), vec![r]);
        assert_eq!(tree.siblings(r), vec![l]);
        assert!(tree.siblings(g).is_empty());
    }

    #[test]
    fn test_retain_remaps_ids() {
        let genesis = Block::genesis();
        let dropped = child(&genesis, "dropped", 1);
        let kept = child(&genesis, "kept", 2);
        let grandchild = child(&kept, "grandchild", 3);
        let mut tree = BlockTree::new();
        tree.insert(genesis.clone());
        let (d, _) = tree.insert(dropped.clone());
        tree.insert(kept.clone());
        tree.insert(grandchild);

        let remap = tree.retain(|id, _| id != d);
        assert_eq!(remap, vec![Some(0), None, Some(1), Some(2)]);
        assert_eq!(tree.len(), 3);
        assert_eq!(tree.find(dropped.get_hash()), None);
        assert_eq!(tree.find(kept.get_hash()), Some(1));
        assert_eq!(tree.children(0), &[1]);
        assert!(tree.siblings(1).is_empty());
        assert_eq!(tree.descendant_count(0), 2);
    }

    #[test]
    fn test_descendant_count_is_transitive() {
        let genesis = Block::genesis();
        let a = child(&genesis, "a", 1);
        let b = child(&a, "b", 2);
        let c = child(&b, "c", 3);
        let d = child(&a, "d", 4);
        let mut tree = BlockTree::new();
        let (g, _) = tree.insert(genesis);
        let (ia, _) = tree.insert(a);
        tree.insert(b);
        tree.insert(c);
        tree.insert(d);

        assert_eq!(tree.descendant_count(g), 4);
        assert_eq!(tree.descendant_count(ia), 3);
    }

    #[test]
    fn test_replace_detaches_children() {
        let genesis = Block::genesis();
        let a = child(&genesis, "a", 1);
        let b = child(&a, "b", 2);
        let mut tree = BlockTree::new();
        tree.insert(genesis);
        let (ia, _) = tree.insert(a.clone());
        tree.insert(b);
        assert_eq!(tree.children(ia).len(), 1);

        let mut forged = a.clone();
        forged.rewrite_payload("forged".to_string());
        tree.replace(ia, forged.clone());

        assert_eq!(tree.find(forged.get_hash()), Some(ia));
        assert_eq!(tree.find(a.get_hash()), None);
        assert!(tree.children(ia).is_empty());
    }
}
