/// Quadtree node coordinates and descriptors

use bytemuck::{Pod, Zeroable};

/// Grid coordinates of a quadtree node at a LOD
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeLoc {
    pub lod: u32,
    pub x: u32,
    pub y: u32,
}

impl NodeLoc {
    pub const fn new(lod: u32, x: u32, y: u32) -> Self {
        Self { lod, x, y }
    }

    /// The four children at `lod - 1`, or None at LOD 0
    pub fn children(&self) -> Option<[NodeLoc; 4]> {
        if self.lod == 0 {
            return None;
        }
        let lod = self.lod - 1;
        let (x, y) = (self.x * 2, self.y * 2);
        Some([
            NodeLoc::new(lod, x, y),
            NodeLoc::new(lod, x + 1, y),
            NodeLoc::new(lod, x, y + 1),
            NodeLoc::new(lod, x + 1, y + 1),
        ])
    }

    /// Ancestor at a coarser LOD
    pub fn ancestor(&self, lod: u32) -> NodeLoc {
        debug_assert!(lod >= self.lod);
        let shift = lod - self.lod;
        NodeLoc::new(lod, self.x >> shift, self.y >> shift)
    }
}

/// Terminal node record, the layout of the final node list on the GPU
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Pod, Zeroable)]
pub struct FinalNode {
    pub x: u32,
    pub y: u32,
    pub lod: u32,
}

impl FinalNode {
    pub fn loc(&self) -> NodeLoc {
        NodeLoc::new(self.lod, self.x, self.y)
    }
}

impl From<NodeLoc> for FinalNode {
    fn from(node: NodeLoc) -> Self {
        Self {
            x: node.x,
            y: node.y,
            lod: node.lod,
        }
    }
}

/// Per-node flags written by the traversal and read by the LOD map pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeDescriptor(pub u32);

impl NodeDescriptor {
    /// Subdivided this frame
    pub const BRANCH: u32 = 1;
    /// Discarded by frustum or HiZ culling this frame
    pub const CULLED: u32 = 2;

    pub const TERMINAL: NodeDescriptor = NodeDescriptor(0);
    pub const BRANCHED: NodeDescriptor = NodeDescriptor(Self::BRANCH);
    pub const DISCARDED: NodeDescriptor = NodeDescriptor(Self::CULLED);

    pub fn is_branch(&self) -> bool {
        self.0 & Self::BRANCH != 0
    }

    pub fn is_culled(&self) -> bool {
        self.0 & Self::CULLED != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn children_cover_the_parent() {
        let node = NodeLoc::new(3, 4, 7);
        let children = node.children().unwrap();
        for child in children {
            assert_eq!(child.lod, 2);
            assert_eq!(child.ancestor(3), node);
        }
        assert_eq!(children[3], NodeLoc::new(2, 9, 15));
        assert!(NodeLoc::new(0, 1, 1).children().is_none());
    }

    #[test]
    fn final_node_is_twelve_bytes() {
        assert_eq!(std::mem::size_of::<FinalNode>(), 12);
        let node = NodeLoc::new(2, 5, 6);
        assert_eq!(FinalNode::from(node).loc(), node);
    }

    #[test]
    fn descriptor_flags() {
        assert!(NodeDescriptor::BRANCHED.is_branch());
        assert!(!NodeDescriptor::DISCARDED.is_branch());
        assert!(NodeDescriptor::DISCARDED.is_culled());
        assert!(!NodeDescriptor::TERMINAL.is_branch());
    }
}
