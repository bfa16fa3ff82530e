//! Sets constants for the on-disk spatial index layout
//!
//! All integers and floats are big-endian. The file is a fixed header, then `num_nodes` internal
//! nodes of `NODE_SIZE` bytes each, then `num_pages` record pages. A record page is a record
//! count followed by that many `RECORD_SIZE` records.

pub const MAGIC: &[u8; 4] = b"CIDX";

/// Bump whenever anything below changes.
pub const FORMAT_VERSION: u16 = 1;

pub const PTR_SIZE: usize = 8;

//for the whole file
pub const MAGIC_START: usize = 0;
pub const MAGIC_SIZE: usize = 4;

pub const VERSION_START: usize = MAGIC_START + MAGIC_SIZE;
pub const VERSION_SIZE: usize = 2;

pub const LEAF_CAPACITY_START: usize = VERSION_START + VERSION_SIZE;
pub const LEAF_CAPACITY_SIZE: usize = 4;

pub const NUM_POINTS_START: usize = LEAF_CAPACITY_START + LEAF_CAPACITY_SIZE;
pub const NUM_POINTS_SIZE: usize = PTR_SIZE;

pub const NUM_NODES_START: usize = NUM_POINTS_START + NUM_POINTS_SIZE;
pub const NUM_NODES_SIZE: usize = PTR_SIZE;

pub const NUM_PAGES_START: usize = NUM_NODES_START + NUM_NODES_SIZE;
pub const NUM_PAGES_SIZE: usize = PTR_SIZE;

pub const ROOT_INDEX_START: usize = NUM_PAGES_START + NUM_PAGES_SIZE;
pub const ROOT_INDEX_SIZE: usize = PTR_SIZE;

pub const ROOT_TYPE_START: usize = ROOT_INDEX_START + ROOT_INDEX_SIZE;
pub const ROOT_TYPE_SIZE: usize = 1;

pub const FILE_DATA_START: usize = ROOT_TYPE_START + ROOT_TYPE_SIZE;

//for InternalNode
pub const LEFT_CHILD_INDEX_START: usize = 0;
pub const LEFT_CHILD_INDEX_SIZE: usize = PTR_SIZE;

pub const LEFT_CHILD_TYPE_START: usize = LEFT_CHILD_INDEX_START + LEFT_CHILD_INDEX_SIZE;
pub const LEFT_CHILD_TYPE_SIZE: usize = 1;

pub const RIGHT_CHILD_INDEX_START: usize = LEFT_CHILD_TYPE_START + LEFT_CHILD_TYPE_SIZE;
pub const RIGHT_CHILD_INDEX_SIZE: usize = PTR_SIZE;

pub const RIGHT_CHILD_TYPE_START: usize = RIGHT_CHILD_INDEX_START + RIGHT_CHILD_INDEX_SIZE;
pub const RIGHT_CHILD_TYPE_SIZE: usize = 1;

pub const SPLIT_AXIS_OFFSET: usize = RIGHT_CHILD_TYPE_START + RIGHT_CHILD_TYPE_SIZE;
pub const SPLIT_AXIS_SIZE: usize = 1;

pub const SPLIT_VALUE_OFFSET: usize = SPLIT_AXIS_OFFSET + SPLIT_AXIS_SIZE;
pub const SPLIT_VALUE_SIZE: usize = 8;

pub const NODE_SIZE: usize = SPLIT_VALUE_OFFSET + SPLIT_VALUE_SIZE;

//for TreeRecord
pub const INDEX_START: usize = 0;
pub const INDEX_SIZE: usize = 8;

pub const X_START: usize = INDEX_START + INDEX_SIZE;
pub const X_SIZE: usize = 8;

pub const Y_START: usize = X_START + X_SIZE;
pub const Y_SIZE: usize = 8;

pub const RECORD_SIZE: usize = Y_START + Y_SIZE;

//for RecordPage
pub const PAGE_LENGTH_START: usize = 0;
pub const PAGE_LENGTH_SIZE: usize = 4;

pub const PAGE_DATA_START: usize = PAGE_LENGTH_START + PAGE_LENGTH_SIZE;
