//! The session handle passed to every component.
//!
//! A `GpuContext` is a cheap, cloneable reference to one backend. It is
//! deliberately `!Send`: all calls must come from the thread that owns the
//! device.

use std::cell::{Cell, RefCell, RefMut};
use std::rc::Rc;

use crate::gpu::backend::GpuBackend;
use crate::gpu::software::SoftwareGpu;
use crate::gpu::transfer::{GenericTransfer, MappedTransfer, MemTransfer, TransferKind};
use crate::gpu::types::GpuStats;
use crate::gpu::wgpu_backend::WgpuGpu;

#[derive(Clone)]
pub struct GpuContext {
    backend: Rc<RefCell<Box<dyn GpuBackend>>>,
    transfer_kind: Rc<Cell<TransferKind>>,
}

impl GpuContext {
    pub fn new(backend: impl GpuBackend + 'static) -> Self {
        Self {
            backend: Rc::new(RefCell::new(Box::new(backend))),
            transfer_kind: Rc::new(Cell::new(TransferKind::Generic)),
        }
    }

    /// CPU reference backend.
    pub fn software() -> Self {
        Self::new(SoftwareGpu::new())
    }

    /// Headless wgpu device.
    pub fn wgpu() -> anyhow::Result<Self> {
        Ok(Self::new(WgpuGpu::new_headless()?))
    }

    /// Borrow the backend for one call. Do not hold the guard across calls
    /// into other components.
    pub fn backend(&self) -> RefMut<'_, dyn GpuBackend + 'static> {
        RefMut::map(self.backend.borrow_mut(), |b| b.as_mut())
    }

    pub fn finish(&self) {
        self.backend().finish();
    }

    pub fn stats(&self) -> GpuStats {
        self.backend().stats()
    }

    pub fn transfer_kind(&self) -> TransferKind {
        self.transfer_kind.get()
    }

    pub fn set_transfer_kind(&self, kind: TransferKind) {
        self.transfer_kind.set(kind);
    }

    /// A transfer backend of the currently selected kind.
    pub fn new_transfer(&self) -> Box<dyn MemTransfer> {
        let mut transfer: Box<dyn MemTransfer> = match self.transfer_kind.get() {
            TransferKind::Generic => Box::new(GenericTransfer::new(self)),
            TransferKind::Mapped => Box::new(MappedTransfer::new(self)),
        };
        if !transfer.init() {
            log::warn!("transfer backend failed to initialize, using generic transfer");
            transfer = Box::new(GenericTransfer::new(self));
            transfer.init();
        }
        transfer
    }

    /// Whether both handles refer to the same device.
    pub fn same_device(&self, other: &GpuContext) -> bool {
        Rc::ptr_eq(&self.backend, &other.backend)
    }
}

impl std::fmt::Debug for GpuContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuContext")
            .field("transfer_kind", &self.transfer_kind.get())
            .finish()
    }
}
