//! Handle table
//!
//! Per-process table mapping small integers to kernel objects. Every
//! handle carries a type tag; lookups name the expected type and refuse
//! on mismatch, so a file operation can never reach a thread handle.

use alloc::{sync::Arc, vec::Vec};

use crate::error::{Result, Status};
use crate::fs::fd::OpenFile;
use crate::mm::context::MmContext;
use crate::sched::process::Process;
use crate::sched::thread::Thread;

#[derive(Clone)]
pub enum Handle {
    File(Arc<OpenFile>),
    Thread(Arc<Thread>),
    Process(Arc<Process>),
    AddressSpace(Arc<MmContext>),
}

impl Handle {
    pub fn type_name(&self) -> &'static str {
        match self {
            Handle::File(_) => "file",
            Handle::Thread(_) => "thread",
            Handle::Process(_) => "process",
            Handle::AddressSpace(_) => "address-space",
        }
    }
}

pub struct HandleTable {
    entries: Vec<Option<Handle>>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Insert at the lowest free slot (POSIX fd allocation order).
    pub fn insert(&mut self, handle: Handle) -> u32 {
        for (i, slot) in self.entries.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(handle);
                return i as u32;
            }
        }
        self.entries.push(Some(handle));
        (self.entries.len() - 1) as u32
    }

    /// Insert at a specific id (dup2), closing whatever was there.
    pub fn insert_at(&mut self, id: u32, handle: Handle) -> u32 {
        let idx = id as usize;
        if self.entries.len() <= idx {
            self.entries.resize(idx + 1, None);
        }
        self.entries[idx] = Some(handle);
        id
    }

    pub fn get(&self, id: u32) -> Option<&Handle> {
        self.entries.get(id as usize).and_then(|h| h.as_ref())
    }

    pub fn close(&mut self, id: u32) -> Result<Handle> {
        self.entries
            .get_mut(id as usize)
            .and_then(|h| h.take())
            .ok_or(Status::NotFound)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn file(&self, id: u32) -> Result<Arc<OpenFile>> {
        match self.get(id) {
            Some(Handle::File(f)) => Ok(f.clone()),
            Some(_) => Err(Status::InvalidArgument),
            None => Err(Status::NotFound),
        }
    }

    pub fn thread(&self, id: u32) -> Result<Arc<Thread>> {
        match self.get(id) {
            Some(Handle::Thread(t)) => Ok(t.clone()),
            Some(_) => Err(Status::InvalidArgument),
            None => Err(Status::NotFound),
        }
    }

    pub fn process(&self, id: u32) -> Result<Arc<Process>> {
        match self.get(id) {
            Some(Handle::Process(p)) => Ok(p.clone()),
            Some(_) => Err(Status::InvalidArgument),
            None => Err(Status::NotFound),
        }
    }

    pub fn address_space(&self, id: u32) -> Result<Arc<MmContext>> {
        match self.get(id) {
            Some(Handle::AddressSpace(m)) => Ok(m.clone()),
            Some(_) => Err(Status::InvalidArgument),
            None => Err(Status::NotFound),
        }
    }

    /// Fork semantics: file handles become fresh descriptions carrying
    /// the parent's current offsets; object handles are shared.
    pub fn clone_for_fork(&self) -> HandleTable {
        HandleTable {
            entries: self
                .entries
                .iter()
                .map(|slot| {
                    slot.as_ref().map(|h| match h {
                        Handle::File(f) => Handle::File(f.duplicate()),
                        other => other.clone(),
                    })
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}
