//! Handles node and page storage for the tree, and read/write of whole trees on disk
//!
//! Trees are small enough to keep fully in memory (a few dozen bytes per cell), so the pagers
//! here are vectors. Disk is only used as a cache between process restarts.

use byteorder::{ByteOrder, BigEndian};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::layout;
use crate::node::{InternalNode, PageType, PagePointer};
use crate::page::RecordPage;

pub trait GetNode {

    fn get_node(&self, index: &usize) -> Result<&InternalNode>;

}

#[derive(Debug, Clone, Default)]
pub struct NodePager {
    pub store: Vec<InternalNode>,
}

impl GetNode for NodePager {

    fn get_node(&self, index: &usize) -> Result<&InternalNode> {

        return match self.store.get(*index) {
            Some(node) => Ok(node),
            None => Err(Error::IndexFormat(format!("node not found at address: {:?}", index))),
        };
    }
}

impl NodePager {

    pub fn new() -> NodePager {

        return Self {
            store: Vec::new(),
        };
    }

    pub fn len(&self) -> usize {
        return self.store.len();
    }

    pub fn add_node(&mut self, node: &InternalNode) -> PagePointer {

        self.store.push(node.clone());

        return PagePointer::Node(self.store.len() - 1);
    }

    pub fn update_node(&mut self, index: &usize, new_node: &InternalNode) -> Result<()> {

        match self.store.get_mut(*index) {
            Some(slot) => *slot = new_node.clone(),
            None => return Err(Error::IndexFormat(format!("node not found at address: {:?}", index))),
        }

        return Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordPager {
    pub pages: Vec<RecordPage>,
}

impl RecordPager {

    pub fn new() -> Self {
        return Self { pages: Vec::new() };
    }

    pub fn len(&self) -> usize {
        return self.pages.len();
    }

    pub fn get_record_page(&self, address: &usize) -> Result<&RecordPage> {

        return match self.pages.get(*address) {
            Some(page) => Ok(page),
            None => Err(Error::IndexFormat(format!("record page not found at address: {:?}", address))),
        };
    }

    pub fn add_page(&mut self, page: RecordPage) -> PagePointer {

        self.pages.push(page);

        return PagePointer::Leaf(self.pages.len() - 1);
    }

    pub fn update_page(&mut self, page: RecordPage, address: &usize) -> Result<()> {

        match self.pages.get_mut(*address) {
            Some(slot) => *slot = page,
            None => return Err(Error::IndexFormat(format!("record page not found at address: {:?}", address))),
        }

        Ok(())
    }

    /// Moves the page out, leaving an empty one behind until `update_page` puts a page back.
    pub fn take_page(&mut self, address: &usize) -> Result<RecordPage> {

        return match self.pages.get_mut(*address) {
            Some(slot) => {
                let capacity = slot.capacity;
                Ok(std::mem::replace(slot, RecordPage::new(capacity)))
            },
            None => Err(Error::IndexFormat(format!("record page not found at address: {:?}", address))),
        };
    }
}

/// Everything needed to restore a tree.
#[derive(Debug, Clone)]
pub struct TreeParts {
    pub leaf_capacity: usize,
    pub num_points: usize,
    pub root: PagePointer,
    pub node_handler: NodePager,
    pub record_handler: RecordPager,
}

pub fn tree_to_vec(parts: &TreeParts) -> Vec<u8> {

    let mut data: Vec<u8> = vec![0u8; layout::FILE_DATA_START];

    data[layout::MAGIC_START..layout::MAGIC_START + layout::MAGIC_SIZE].copy_from_slice(layout::MAGIC);
    BigEndian::write_u16(&mut data[layout::VERSION_START..layout::VERSION_START + layout::VERSION_SIZE], layout::FORMAT_VERSION);
    BigEndian::write_u32(&mut data[layout::LEAF_CAPACITY_START..layout::LEAF_CAPACITY_START + layout::LEAF_CAPACITY_SIZE], parts.leaf_capacity as u32);
    BigEndian::write_u64(&mut data[layout::NUM_POINTS_START..layout::NUM_POINTS_START + layout::NUM_POINTS_SIZE], parts.num_points as u64);
    BigEndian::write_u64(&mut data[layout::NUM_NODES_START..layout::NUM_NODES_START + layout::NUM_NODES_SIZE], parts.node_handler.len() as u64);
    BigEndian::write_u64(&mut data[layout::NUM_PAGES_START..layout::NUM_PAGES_START + layout::NUM_PAGES_SIZE], parts.record_handler.len() as u64);

    let (root_type, root_index) = parts.root.to_parts();
    BigEndian::write_u64(&mut data[layout::ROOT_INDEX_START..layout::ROOT_INDEX_START + layout::ROOT_INDEX_SIZE], root_index as u64);
    data[layout::ROOT_TYPE_START] = root_type as u8;

    for node in parts.node_handler.store.iter() {
        data.extend_from_slice(&node.to_arr());
    }

    for page in parts.record_handler.pages.iter() {
        data.extend_from_slice(&page.to_vec());
    }

    return data;
}

pub fn tree_from_slice(data: &[u8]) -> Result<TreeParts> {

    if data.len() < layout::FILE_DATA_START {
        return Err(Error::IndexFormat("header is truncated".to_string()));
    }

    if &data[layout::MAGIC_START..layout::MAGIC_START + layout::MAGIC_SIZE] != layout::MAGIC {
        return Err(Error::IndexFormat("missing magic bytes".to_string()));
    }

    let version = BigEndian::read_u16(&data[layout::VERSION_START..layout::VERSION_START + layout::VERSION_SIZE]);
    if version != layout::FORMAT_VERSION {
        return Err(Error::IndexVersion { found: version, expected: layout::FORMAT_VERSION });
    }

    let leaf_capacity = BigEndian::read_u32(&data[layout::LEAF_CAPACITY_START..layout::LEAF_CAPACITY_START + layout::LEAF_CAPACITY_SIZE]) as usize;
    let num_points = BigEndian::read_u64(&data[layout::NUM_POINTS_START..layout::NUM_POINTS_START + layout::NUM_POINTS_SIZE]) as usize;
    let num_nodes = BigEndian::read_u64(&data[layout::NUM_NODES_START..layout::NUM_NODES_START + layout::NUM_NODES_SIZE]) as usize;
    let num_pages = BigEndian::read_u64(&data[layout::NUM_PAGES_START..layout::NUM_PAGES_START + layout::NUM_PAGES_SIZE]) as usize;

    let root_index = BigEndian::read_u64(&data[layout::ROOT_INDEX_START..layout::ROOT_INDEX_START + layout::ROOT_INDEX_SIZE]) as usize;
    let root_type = PageType::from_byte(data[layout::ROOT_TYPE_START])?;
    let root = PagePointer::from_parts(root_type, root_index);

    let nodes_end = num_nodes
        .checked_mul(layout::NODE_SIZE)
        .and_then(|x| x.checked_add(layout::FILE_DATA_START))
        .ok_or_else(|| Error::IndexFormat("node count overflows".to_string()))?;

    if data.len() < nodes_end {
        return Err(Error::IndexFormat(format!("expected {} nodes, file is truncated", num_nodes)));
    }

    let mut node_handler = NodePager::new();
    for i in 0..num_nodes {
        let start = layout::FILE_DATA_START + i * layout::NODE_SIZE;
        let node = InternalNode::from_slice(&data[start..start + layout::NODE_SIZE])?;
        node_handler.add_node(&node);
    }

    let mut record_handler = RecordPager::new();
    let mut offset = nodes_end;
    let mut records_seen: usize = 0;
    for _ in 0..num_pages {
        let (page, consumed) = RecordPage::from_slice(&data[offset..], leaf_capacity)?;
        records_seen += page.len();
        offset += consumed;
        record_handler.add_page(page);
    }

    if offset != data.len() {
        return Err(Error::IndexFormat(format!("{} trailing bytes after last page", data.len() - offset)));
    }

    if records_seen != num_points {
        return Err(Error::IndexFormat(format!("header says {} points, pages hold {}", num_points, records_seen)));
    }

    let in_range = match root {
        PagePointer::Node(x) => x < node_handler.len(),
        PagePointer::Leaf(x) => x < record_handler.len(),
    };
    if !in_range {
        return Err(Error::IndexFormat(format!("root {} is out of range", root)));
    }

    return Ok(TreeParts {
        leaf_capacity,
        num_points,
        root,
        node_handler,
        record_handler,
    });
}

/// Writes `data` next to `path` and renames it into place, so readers never see a partial file.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut tmp_name = path.file_name().map(|x| x.to_os_string()).unwrap_or_default();
    tmp_name.push(format!(".{}.tmp", std::process::id()));
    let tmp_path: PathBuf = path.with_file_name(tmp_name);

    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }

    match fs::rename(&tmp_path, path) {
        Ok(_) => Ok(()),
        Err(e) => {
            let _ = fs::remove_file(&tmp_path);
            Err(Error::Io(e))
        }
    }
}
