//! RAM file system
//!
//! Heap-backed reference implementation of the driver function table.
//! Descriptors are slab indices; node 0 is the root directory. Every
//! IRP completes synchronously during submit (RAM never blocks), which
//! also makes ramfs the canonical example of the unarmed-IRP path.

use alloc::{string::String, sync::Arc, vec::Vec};

use super::vnode::{Vnode, VnodeType};
use crate::driver::irp::{Irp, IrpBuffer, IrpOp};
use crate::driver::{DirItem, DriverOps, DriverVnodeInfo, FsInfo, IterDecision};
use crate::error::{Result, Status};

struct RamNode {
    name: String,
    vtype: VnodeType,
    data: Vec<u8>,
    children: Vec<usize>,
    parent: usize,
    mode: u16,
    uid: u32,
    gid: u32,
    link_target: Option<String>,
    alive: bool,
}

impl RamNode {
    fn new(name: &str, vtype: VnodeType, parent: usize, mode: u16) -> Self {
        Self {
            name: String::from(name),
            vtype,
            data: Vec::new(),
            children: Vec::new(),
            parent,
            mode,
            uid: 0,
            gid: 0,
            link_target: None,
            alive: true,
        }
    }
}

pub struct RamFs {
    nodes: spin::RwLock<Vec<RamNode>>,
}

impl RamFs {
    pub fn new() -> Arc<RamFs> {
        Arc::new(RamFs {
            nodes: spin::RwLock::new(alloc::vec![RamNode::new(
                "",
                VnodeType::Directory,
                0,
                0o755
            )]),
        })
    }

    fn node_check(&self, desc: u64) -> Result<usize> {
        let idx = desc as usize;
        let nodes = self.nodes.read();
        if idx >= nodes.len() || !nodes[idx].alive {
            return Err(Status::NotFound);
        }
        Ok(idx)
    }

}

impl DriverOps for RamFs {
    fn name(&self) -> &str {
        "ramfs"
    }

    fn get_blk_size(&self, _desc: u64) -> Result<usize> {
        Ok(1)
    }

    fn get_max_blk_count(&self, desc: u64) -> Result<u64> {
        let idx = self.node_check(desc)?;
        Ok(self.nodes.read()[idx].data.len() as u64)
    }

    fn read_sync(&self, desc: u64, buf: &mut [u8], blk_offset: u64) -> Result<usize> {
        let idx = self.node_check(desc)?;
        let nodes = self.nodes.read();
        let node = &nodes[idx];
        if node.vtype == VnodeType::Directory {
            return Err(Status::IsADirectory);
        }
        let off = blk_offset as usize;
        if off >= node.data.len() {
            return Ok(0);
        }
        let n = buf.len().min(node.data.len() - off);
        buf[..n].copy_from_slice(&node.data[off..off + n]);
        Ok(n)
    }

    fn write_sync(&self, desc: u64, buf: &[u8], blk_offset: u64) -> Result<usize> {
        let idx = self.node_check(desc)?;
        let mut nodes = self.nodes.write();
        let node = &mut nodes[idx];
        if node.vtype == VnodeType::Directory {
            return Err(Status::IsADirectory);
        }
        let off = blk_offset as usize;
        let end = off + buf.len();
        if node.data.len() < end {
            node.data.resize(end, 0);
        }
        node.data[off..end].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn submit_irp(&self, irp: &Arc<Irp>) -> Result<()> {
        // RAM completes in-line: no event, no callback.
        if irp.dry {
            irp.set_status(Ok(()));
            return Ok(());
        }
        let result = match (&irp.op, &irp.buffer) {
            (IrpOp::Read, IrpBuffer::Read(buf)) => {
                let mut data = buf.lock();
                self.read_sync(irp.desc, &mut data, irp.blk_offset)
            }
            (IrpOp::Write, IrpBuffer::Write(data)) => {
                self.write_sync(irp.desc, data, irp.blk_offset)
            }
            _ => Err(Status::InvalidArgument),
        };
        match result {
            Ok(n) => {
                irp.set_transferred(n);
                irp.set_status(Ok(()));
            }
            Err(e) => irp.set_status(Err(e)),
        }
        Ok(())
    }

    fn root_desc(&self, _dev: Option<&Arc<Vnode>>) -> Result<u64> {
        Ok(0)
    }

    fn probe(&self, _dev: &Arc<Vnode>) -> bool {
        // Ramfs is device-less; it never claims block devices.
        false
    }

    fn path_search(&self, parent_desc: u64, name: &str) -> Result<u64> {
        let idx = self.node_check(parent_desc)?;
        let nodes = self.nodes.read();
        if nodes[idx].vtype != VnodeType::Directory {
            return Err(Status::NotADirectory);
        }
        for &child in &nodes[idx].children {
            if nodes[child].alive && nodes[child].name == name {
                return Ok(child as u64);
            }
        }
        Err(Status::NotFound)
    }

    fn list_dir(&self, desc: u64, cb: &mut dyn FnMut(&DirItem) -> IterDecision) -> Result<()> {
        let idx = self.node_check(desc)?;
        let items: Vec<DirItem> = {
            let nodes = self.nodes.read();
            if nodes[idx].vtype != VnodeType::Directory {
                return Err(Status::NotADirectory);
            }
            nodes[idx]
                .children
                .iter()
                .filter(|&&c| nodes[c].alive)
                .map(|&c| DirItem {
                    name: nodes[c].name.clone(),
                    inode: c as u64 + 1,
                    vtype: nodes[c].vtype,
                    desc: c as u64,
                })
                .collect()
        };
        for item in &items {
            if cb(item) == IterDecision::Stop {
                break;
            }
        }
        Ok(())
    }

    fn mk_file(&self, parent: u64, name: &str, vtype: VnodeType, mode: u16) -> Result<u64> {
        let pidx = self.node_check(parent)?;
        if name.is_empty() || name.contains('/') {
            return Err(Status::InvalidArgument);
        }
        let mut nodes = self.nodes.write();
        if nodes[pidx].vtype != VnodeType::Directory {
            return Err(Status::NotADirectory);
        }
        let exists = nodes[pidx]
            .children
            .iter()
            .any(|&c| nodes[c].alive && nodes[c].name == name);
        if exists {
            return Err(Status::AlreadyInitialized);
        }
        let desc = nodes.len();
        nodes.push(RamNode::new(name, vtype, pidx, mode));
        nodes[pidx].children.push(desc);
        Ok(desc as u64)
    }

    fn remove_file(&self, desc: u64) -> Result<()> {
        let idx = self.node_check(desc)?;
        if idx == 0 {
            return Err(Status::InvalidOperation);
        }
        let mut nodes = self.nodes.write();
        if nodes[idx].vtype == VnodeType::Directory
            && nodes[idx].children.iter().any(|&c| nodes[c].alive)
        {
            return Err(Status::InUse);
        }
        nodes[idx].alive = false;
        let parent = nodes[idx].parent;
        nodes[parent].children.retain(|&c| c != idx);
        Ok(())
    }

    fn move_desc_to(&self, desc: u64, new_parent: u64, name: &str) -> Result<()> {
        let idx = self.node_check(desc)?;
        let pidx = self.node_check(new_parent)?;
        let mut nodes = self.nodes.write();
        if nodes[pidx].vtype != VnodeType::Directory {
            return Err(Status::NotADirectory);
        }
        let old_parent = nodes[idx].parent;
        nodes[old_parent].children.retain(|&c| c != idx);
        nodes[idx].parent = pidx;
        nodes[idx].name = String::from(name);
        nodes[pidx].children.push(idx);
        Ok(())
    }

    fn get_file_perms(&self, desc: u64) -> Result<u16> {
        let idx = self.node_check(desc)?;
        Ok(self.nodes.read()[idx].mode)
    }

    fn set_file_perms(&self, desc: u64, mode: u16) -> Result<()> {
        let idx = self.node_check(desc)?;
        self.nodes.write()[idx].mode = mode;
        Ok(())
    }

    fn get_file_type(&self, desc: u64) -> Result<VnodeType> {
        let idx = self.node_check(desc)?;
        Ok(self.nodes.read()[idx].vtype)
    }

    fn get_linked_path(&self, desc: u64) -> Result<String> {
        let idx = self.node_check(desc)?;
        self.nodes.read()[idx]
            .link_target
            .clone()
            .ok_or(Status::InvalidOperation)
    }

    fn set_linked_path(&self, desc: u64, target: &str) -> Result<()> {
        let idx = self.node_check(desc)?;
        let mut nodes = self.nodes.write();
        if nodes[idx].vtype != VnodeType::Symlink {
            return Err(Status::InvalidOperation);
        }
        nodes[idx].link_target = Some(String::from(target));
        Ok(())
    }

    fn stat_fs_info(&self) -> Result<FsInfo> {
        let nodes = self.nodes.read();
        Ok(FsInfo {
            block_size: 1,
            total_blocks: nodes.iter().map(|n| n.data.len() as u64).sum(),
            free_blocks: u64::MAX,
            max_name_len: 255,
            read_only: false,
        })
    }

    fn vnode_info(&self, desc: u64) -> Result<DriverVnodeInfo> {
        let idx = self.node_check(desc)?;
        let nodes = self.nodes.read();
        let node = &nodes[idx];
        Ok(DriverVnodeInfo {
            vtype: node.vtype,
            size: node.data.len() as u64,
            blk_size: 1,
            inode: idx as u64 + 1,
            uid: node.uid,
            gid: node.gid,
            mode: node.mode,
        })
    }
}
