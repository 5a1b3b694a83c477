//! Snapshot of the GPUs visible through NVML.
//!
//! Everything generation needs is captured while the session is open, so the
//! session can be released before any filesystem discovery starts.

use error_stack::Report;
use error_stack::ResultExt;
use nvml_wrapper::error::NvmlError;

use crate::error::NvcdiError;
use crate::error::NvcdiResult;
use crate::nvml::normalize_pci_bus_id;
use crate::nvml::NvmlInterface;
use crate::nvml::PciInfo;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigRecord {
    pub index: u32,
    pub uuid: String,
    pub gpu_instance_id: u32,
    pub compute_instance_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuRecord {
    pub index: u32,
    pub uuid: String,
    pub minor: u32,
    /// `None` when the device does not report PCI information.
    pub pci: Option<PciInfo>,
    pub name: String,
    pub mig_enabled: bool,
    pub migs: Vec<MigRecord>,
}

impl GpuRecord {
    /// Normalized PCI bus id, e.g. `0000:3b:00.0`.
    pub fn pci_bus_id(&self) -> Option<String> {
        self.pci.as_ref().map(|pci| normalize_pci_bus_id(&pci.bus_id))
    }

    /// Integrated GPUs sit at PCI `0000:01:00`; without PCI information the
    /// device name is used instead.
    pub fn is_integrated(&self) -> bool {
        match &self.pci {
            Some(pci) => pci.domain == 0 && pci.bus == 1 && pci.device == 0,
            None => self.name.contains("(nvgpu)") || self.name.contains("NVIDIA Thor"),
        }
    }

    pub fn mig(&self, index: u32) -> Option<&MigRecord> {
        self.migs.iter().find(|m| m.index == index)
    }
}

/// Index of a GPU record in an [`Inventory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GpuHandle(usize);

/// A device selected by UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UuidMatch {
    Gpu(GpuHandle),
    Mig { parent: GpuHandle, mig: u32 },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    pub driver_version: String,
    /// NVML encoding, e.g. `12040` for CUDA 12.4.
    pub cuda_driver_version: Option<i32>,
    gpus: Vec<GpuRecord>,
}

impl Inventory {
    pub fn new(driver_version: impl Into<String>, cuda_driver_version: Option<i32>, gpus: Vec<GpuRecord>) -> Self {
        Self {
            driver_version: driver_version.into(),
            cuda_driver_version,
            gpus,
        }
    }

    pub fn capture(nvml: &dyn NvmlInterface) -> NvcdiResult<Self> {
        let driver_version = nvml
            .driver_version()
            .change_context(NvcdiError::nvml("failed to get driver version"))?;
        let cuda_driver_version = match nvml.cuda_driver_version() {
            Ok(version) => Some(version),
            Err(e) => {
                tracing::warn!("Failed to get CUDA driver version: {e}");
                None
            }
        };
        let count = nvml
            .device_count()
            .change_context(NvcdiError::nvml("failed to get device count"))?;

        let mut gpus = Vec::with_capacity(count as usize);
        for index in 0..count {
            let gpu = capture_gpu(nvml, index)
                .attach_printable_lazy(|| format!("device index {index}"))?;
            gpus.push(gpu);
        }
        Ok(Self::new(driver_version, cuda_driver_version, gpus))
    }

    pub fn len(&self) -> usize {
        self.gpus.len()
    }

    pub fn gpu(&self, handle: GpuHandle) -> &GpuRecord {
        &self.gpus[handle.0]
    }

    pub fn handles(&self) -> impl Iterator<Item = GpuHandle> + '_ {
        (0..self.gpus.len()).map(GpuHandle)
    }

    pub fn by_index(&self, index: u32) -> NvcdiResult<GpuHandle> {
        self.gpus
            .iter()
            .position(|gpu| gpu.index == index)
            .map(GpuHandle)
            .ok_or_else(|| Report::new(NvcdiError::nvml(format!("no device with index {index}"))))
    }

    pub fn by_uuid(&self, uuid: &str) -> NvcdiResult<UuidMatch> {
        for (i, gpu) in self.gpus.iter().enumerate() {
            if gpu.uuid == uuid {
                return Ok(UuidMatch::Gpu(GpuHandle(i)));
            }
            if let Some(mig) = gpu.migs.iter().find(|m| m.uuid == uuid) {
                return Ok(UuidMatch::Mig {
                    parent: GpuHandle(i),
                    mig: mig.index,
                });
            }
        }
        Err(Report::new(NvcdiError::nvml(format!("no device with UUID {uuid}"))))
    }

    /// Whether any GPU is an Orin iGPU.
    pub fn has_orin(&self) -> bool {
        self.gpus.iter().any(|gpu| gpu.name.contains("Orin (nvgpu)"))
    }
}

fn capture_gpu(nvml: &dyn NvmlInterface, index: u32) -> NvcdiResult<GpuRecord> {
    let device = nvml
        .device_by_index(index)
        .change_context(NvcdiError::nvml("failed to get device handle"))?;
    let uuid = device
        .uuid()
        .change_context(NvcdiError::nvml("failed to get device UUID"))?;
    let minor = device
        .minor_number()
        .change_context(NvcdiError::nvml("failed to get minor number"))?;
    let pci = match device.pci_info() {
        Ok(pci) => Some(pci),
        Err(NvmlError::NotSupported) => None,
        Err(e) => {
            return Err(Report::new(e).change_context(NvcdiError::nvml("failed to get PCI info")));
        }
    };
    let name = device
        .name()
        .change_context(NvcdiError::nvml("failed to get device name"))?;
    let mig_enabled = device
        .is_mig_enabled()
        .change_context(NvcdiError::nvml("failed to get MIG mode"))?;
    let migs = if mig_enabled {
        device
            .mig_devices()
            .change_context(NvcdiError::nvml("failed to get MIG devices"))?
            .into_iter()
            .map(|mig| MigRecord {
                index: mig.index,
                uuid: mig.uuid,
                gpu_instance_id: mig.gpu_instance_id,
                compute_instance_id: mig.compute_instance_id,
            })
            .collect()
    } else {
        Vec::new()
    };

    Ok(GpuRecord {
        index,
        uuid,
        minor,
        pci,
        name,
        mig_enabled,
        migs,
    })
}
