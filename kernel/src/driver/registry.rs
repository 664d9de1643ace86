//! Driver registry
//!
//! Global table of loaded drivers plus the FS-probe list. A driver's
//! symbol table serves inter-driver linkage: a driver exports entry
//! points by name, another resolves them at load time. V-devices are
//! instances of a driver bound to a device descriptor.

use alloc::{
    collections::BTreeMap,
    string::String,
    sync::Arc,
    vec::Vec,
};
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use super::DriverOps;
use crate::error::{Result, Status};

static NEXT_DRIVER_ID: AtomicU32 = AtomicU32::new(1);

pub struct DriverObject {
    pub id: u32,
    pub name: String,
    pub ops: Arc<dyn DriverOps>,
    /// Exported entry points: name → address/cookie.
    pub symbols: spin::RwLock<BTreeMap<String, usize>>,
    /// Member of the mount probe list.
    pub fs_capable: bool,
}

impl DriverObject {
    pub fn export_symbol(&self, name: &str, value: usize) {
        self.symbols.write().insert(String::from(name), value);
    }

    pub fn find_symbol(&self, name: &str) -> Option<usize> {
        self.symbols.read().get(name).copied()
    }
}

/// A device instance: driver + opaque descriptor.
pub struct Vdev {
    pub driver: Arc<DriverObject>,
    pub desc: u64,
    refcount: AtomicU64,
}

impl Vdev {
    pub fn new(driver: Arc<DriverObject>, desc: u64) -> Arc<Vdev> {
        Arc::new(Vdev {
            driver,
            desc,
            refcount: AtomicU64::new(1),
        })
    }

    pub fn reference(&self) {
        self.refcount.fetch_add(1, Ordering::AcqRel);
    }

    pub fn unreference(&self) -> u64 {
        self.refcount.fetch_sub(1, Ordering::AcqRel) - 1
    }
}

lazy_static::lazy_static! {
    static ref DRIVERS: spin::RwLock<Vec<Arc<DriverObject>>> = spin::RwLock::new(Vec::new());
}

/// Register a driver. FS-capable drivers join the probe list in
/// registration order; the first to claim a device at mount wins.
pub fn register_driver(
    name: &str,
    ops: Arc<dyn DriverOps>,
    fs_capable: bool,
) -> Result<Arc<DriverObject>> {
    let mut drivers = DRIVERS.write();
    if drivers.iter().any(|d| d.name == name) {
        return Err(Status::AlreadyInitialized);
    }
    let object = Arc::new(DriverObject {
        id: NEXT_DRIVER_ID.fetch_add(1, Ordering::Relaxed),
        name: String::from(name),
        ops,
        symbols: spin::RwLock::new(BTreeMap::new()),
        fs_capable,
    });
    drivers.push(object.clone());
    Ok(object)
}

pub fn find_driver(name: &str) -> Option<Arc<DriverObject>> {
    DRIVERS.read().iter().find(|d| d.name == name).cloned()
}

/// FS-capable drivers in registration (probe) order.
pub fn fs_drivers() -> Vec<Arc<DriverObject>> {
    DRIVERS
        .read()
        .iter()
        .filter(|d| d.fs_capable)
        .cloned()
        .collect()
}

/// Resolve `symbol` across every loaded driver (inter-driver linkage).
pub fn resolve_symbol(symbol: &str) -> Option<(Arc<DriverObject>, usize)> {
    let drivers = DRIVERS.read();
    for d in drivers.iter() {
        if let Some(v) = d.find_symbol(symbol) {
            return Some((d.clone(), v));
        }
    }
    None
}
