//! 按 2 的幂分段的空闲链表
//!
//! 节点存放在一个可增长的数组里，链表用下标串起来，每个 size class 只记录一个 head 下标。
//! 一个节点在任意时刻只属于一个持有者：某条空闲链表、一个存活的 descriptor table，或者一条待回收记录。

/// 无效的节点下标
pub const INVALID_NODE: u32 = u32::MAX;

#[derive(Copy, Clone, Debug)]
struct FreeListNode {
    offset: u32,
    next: u32,
}

pub struct SegregatedFreeList {
    nodes: Vec<FreeListNode>,
    /// class k 对应大小为 `1 << k` 的块
    heads: Vec<u32>,
    /// 每个 class 中空闲块的数量
    lens: Vec<u32>,
}

// new & init
impl SegregatedFreeList {
    /// `max_block_size` 必须是 2 的幂，class 的数量为 `log2(max_block_size) + 1`
    pub fn new(max_block_size: u32) -> Self {
        assert!(max_block_size.is_power_of_two(), "block size {} is not a power of two", max_block_size);
        let class_count = max_block_size.trailing_zeros() as usize + 1;
        Self {
            nodes: Vec::new(),
            heads: vec![INVALID_NODE; class_count],
            lens: vec![0; class_count],
        }
    }
}
// getters
impl SegregatedFreeList {
    #[inline]
    pub fn class_count(&self) -> usize {
        self.heads.len()
    }

    #[inline]
    pub fn is_empty(&self, class: usize) -> bool {
        self.heads[class] == INVALID_NODE
    }

    /// 已经创建过的节点总数（包括被 table 和待回收记录持有的）
    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// 所有链表中空闲 slot 的总数
    pub fn free_slots(&self) -> u64 {
        self.lens.iter().enumerate().map(|(class, len)| (*len as u64) << class).sum()
    }
}
// tools
impl SegregatedFreeList {
    /// `count` 所在的 size class：`ceil(log2(count))`
    #[inline]
    pub fn class_of(count: u32) -> usize {
        debug_assert!(count > 0);
        count.next_power_of_two().trailing_zeros() as usize
    }

    #[inline]
    pub const fn class_size(class: usize) -> u32 {
        1 << class
    }

    /// 将 `offset` 处的块挂到 class 的链表头
    ///
    /// `reuse_node` 有效时复用这个节点，否则追加一个新节点；返回所用节点的下标
    pub fn push(&mut self, class: usize, offset: u32, reuse_node: u32) -> u32 {
        let next = self.heads[class];
        let node = if reuse_node != INVALID_NODE {
            debug_assert!((reuse_node as usize) < self.nodes.len());
            self.nodes[reuse_node as usize] = FreeListNode { offset, next };
            reuse_node
        } else {
            self.nodes.push(FreeListNode { offset, next });
            (self.nodes.len() - 1) as u32
        };
        self.heads[class] = node;
        self.lens[class] += 1;
        node
    }

    /// 弹出 class 的链表头，返回 `(offset, node)`
    ///
    /// 节点本身不会被删除，调用者持有它直到再次 push
    pub fn pop(&mut self, class: usize) -> Option<(u32, u32)> {
        let node = self.heads[class];
        if node == INVALID_NODE {
            return None;
        }
        let FreeListNode { offset, next } = self.nodes[node as usize];
        self.heads[class] = next;
        self.lens[class] -= 1;
        Some((offset, node))
    }

    /// 从 class 往上找第一个非空的 class
    pub fn first_non_empty_from(&self, class: usize) -> Option<usize> {
        (class..self.class_count()).find(|&c| !self.is_empty(c))
    }

    /// 将 `[offset, offset + len)` 拆成 2 的幂大小的块挂到对应的链表上，从大到小
    pub fn push_range(&mut self, mut offset: u32, mut len: u32) {
        for class in (0..self.class_count()).rev() {
            let size = Self::class_size(class);
            while len >= size {
                self.push(class, offset, INVALID_NODE);
                offset += size;
                len -= size;
            }
        }
        debug_assert_eq!(len, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_of() {
        assert_eq!(SegregatedFreeList::class_of(1), 0);
        assert_eq!(SegregatedFreeList::class_of(2), 1);
        assert_eq!(SegregatedFreeList::class_of(3), 2);
        assert_eq!(SegregatedFreeList::class_of(4), 2);
        assert_eq!(SegregatedFreeList::class_of(33), 6);
    }

    #[test]
    fn test_push_pop_is_lifo() {
        let mut list = SegregatedFreeList::new(4);
        list.push(1, 0, INVALID_NODE);
        list.push(1, 2, INVALID_NODE);
        assert_eq!(list.free_slots(), 4);

        assert_eq!(list.pop(1).map(|(offset, _)| offset), Some(2));
        assert_eq!(list.pop(1).map(|(offset, _)| offset), Some(0));
        assert!(list.pop(1).is_none());
        assert!(list.is_empty(1));
    }

    #[test]
    fn test_reused_node_does_not_grow() {
        let mut list = SegregatedFreeList::new(8);
        list.push(3, 0, INVALID_NODE);
        for _ in 0..100 {
            let (offset, node) = list.pop(3).unwrap();
            list.push(3, offset, node);
        }
        assert_eq!(list.node_count(), 1);
    }

    #[test]
    fn test_push_range_splits_by_power_of_two() {
        let mut list = SegregatedFreeList::new(8);
        // 7 = 4 + 2 + 1
        list.push_range(16, 7);
        assert_eq!(list.pop(2).map(|(offset, _)| offset), Some(16));
        assert_eq!(list.pop(1).map(|(offset, _)| offset), Some(20));
        assert_eq!(list.pop(0).map(|(offset, _)| offset), Some(22));
        assert_eq!(list.free_slots(), 0);
    }

    #[test]
    fn test_first_non_empty_from() {
        let mut list = SegregatedFreeList::new(16);
        list.push(3, 0, INVALID_NODE);
        assert_eq!(list.first_non_empty_from(0), Some(3));
        assert_eq!(list.first_non_empty_from(4), None);
    }
}
