//! Holds structs and methods for representing internal nodes of the kd tree.
//!
//! Nodes can be sent to and from fixed-length byte arrays so the whole tree can be cached on disk.

use byteorder::{ByteOrder, BigEndian};
use std::fmt;

use crate::error::{Error, Result};
use crate::layout;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PageType {
    Node = 1,
    Leaf = 2,
}

impl PageType {

    pub fn from_byte(byte: u8) -> Result<Self> {

        return match byte {
            1 => Ok(PageType::Node),
            2 => Ok(PageType::Leaf),
            x => Err(Error::IndexFormat(format!("unknown page type {}", x))),
        };
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PagePointer {
    Node(usize),
    Leaf(usize),
}

impl PagePointer {

    pub fn from_parts(page_type: PageType, index: usize) -> Self {

        return match page_type {
            PageType::Node => PagePointer::Node(index),
            PageType::Leaf => PagePointer::Leaf(index),
        };
    }

    pub fn to_parts(&self) -> (PageType, usize) {

        return match self {
            PagePointer::Node(x) => (PageType::Node, *x),
            PagePointer::Leaf(x) => (PageType::Leaf, *x),
        };
    }
}

impl fmt::Display for PagePointer {

    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {

        match self {
            PagePointer::Node(index) => write!(f, "NODE {}", index),
            PagePointer::Leaf(index) => write!(f, "LEAF {}", index),
        }
    }
}

/// Which coordinate a node splits on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Axis {
    X = 0,
    Y = 1,
}

impl Axis {

    pub fn for_depth(depth: usize) -> Self {

        return match depth % 2 {
            0 => Axis::X,
            _ => Axis::Y,
        };
    }

    pub fn from_byte(byte: u8) -> Result<Self> {

        return match byte {
            0 => Ok(Axis::X),
            1 => Ok(Axis::Y),
            x => Err(Error::IndexFormat(format!("unknown split axis {}", x))),
        };
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InternalNode {
    pub left_child_pointer: PagePointer,
    pub right_child_pointer: PagePointer,
    pub split_axis: Axis,
    pub split_value: f64,
}

impl InternalNode {

    pub fn pretty(&self) -> String {

        return format!("SA: {:?} SV: {:?} LC: {} RC: {}",
                        self.split_axis,
                        self.split_value,
                        self.left_child_pointer,
                        self.right_child_pointer)
    }

    pub fn from_slice(node_slice: &[u8]) -> Result<InternalNode> {

        if node_slice.len() < layout::NODE_SIZE {
            return Err(Error::IndexFormat(format!("node needs {} bytes, got {}", layout::NODE_SIZE, node_slice.len())));
        }

        let left_child_index = BigEndian::read_u64(&node_slice[layout::LEFT_CHILD_INDEX_START..layout::LEFT_CHILD_INDEX_START + layout::LEFT_CHILD_INDEX_SIZE]);
        let left_child_type = PageType::from_byte(node_slice[layout::LEFT_CHILD_TYPE_START])?;

        let right_child_index = BigEndian::read_u64(&node_slice[layout::RIGHT_CHILD_INDEX_START..layout::RIGHT_CHILD_INDEX_START + layout::RIGHT_CHILD_INDEX_SIZE]);
        let right_child_type = PageType::from_byte(node_slice[layout::RIGHT_CHILD_TYPE_START])?;

        let split_axis = Axis::from_byte(node_slice[layout::SPLIT_AXIS_OFFSET])?;
        let split_value = BigEndian::read_f64(&node_slice[layout::SPLIT_VALUE_OFFSET..layout::SPLIT_VALUE_OFFSET + layout::SPLIT_VALUE_SIZE]);

        return Ok(InternalNode {
            left_child_pointer: PagePointer::from_parts(left_child_type, left_child_index as usize),
            right_child_pointer: PagePointer::from_parts(right_child_type, right_child_index as usize),
            split_axis,
            split_value,
        });
    }

    pub fn to_arr(&self) -> [u8; layout::NODE_SIZE] {

        let mut arr: [u8; layout::NODE_SIZE] = [0; layout::NODE_SIZE];

        let (node_type, value) = self.left_child_pointer.to_parts();
        BigEndian::write_u64(&mut arr[layout::LEFT_CHILD_INDEX_START..layout::LEFT_CHILD_INDEX_START + layout::LEFT_CHILD_INDEX_SIZE], value as u64);
        arr[layout::LEFT_CHILD_TYPE_START] = node_type as u8;

        let (node_type, value) = self.right_child_pointer.to_parts();
        BigEndian::write_u64(&mut arr[layout::RIGHT_CHILD_INDEX_START..layout::RIGHT_CHILD_INDEX_START + layout::RIGHT_CHILD_INDEX_SIZE], value as u64);
        arr[layout::RIGHT_CHILD_TYPE_START] = node_type as u8;

        arr[layout::SPLIT_AXIS_OFFSET] = self.split_axis as u8;
        BigEndian::write_f64(&mut arr[layout::SPLIT_VALUE_OFFSET..layout::SPLIT_VALUE_OFFSET + layout::SPLIT_VALUE_SIZE], self.split_value);

        return arr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_to_bytes_and_back() {

        let node = InternalNode {
            left_child_pointer: PagePointer::Leaf(12),
            right_child_pointer: PagePointer::Node(7),
            split_axis: Axis::Y,
            split_value: -1234.5678,
        };

        let arr = node.to_arr();
        let back = InternalNode::from_slice(&arr).unwrap();

        assert_eq!(back, node);
    }

    #[test]
    fn bad_type_byte_is_rejected() {

        let node = InternalNode {
            left_child_pointer: PagePointer::Leaf(0),
            right_child_pointer: PagePointer::Leaf(1),
            split_axis: Axis::X,
            split_value: 0.0,
        };

        let mut arr = node.to_arr();
        arr[layout::LEFT_CHILD_TYPE_START] = 9;

        assert!(matches!(InternalNode::from_slice(&arr), Err(Error::IndexFormat(_))));
        assert!(matches!(InternalNode::from_slice(&arr[..4]), Err(Error::IndexFormat(_))));
    }
}
