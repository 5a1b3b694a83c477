//! Access to NVML through `nvml-wrapper`, behind traits so device
//! enumeration can be replaced in tests.

use std::ffi::CStr;
use std::ffi::OsStr;
use std::fmt::Debug;
use std::os::raw::c_char;
use std::path::PathBuf;

use nvml_wrapper::device::Device;
use nvml_wrapper::error::nvml_sym;
use nvml_wrapper::error::nvml_try;
use nvml_wrapper::error::NvmlError;
use nvml_wrapper::Nvml;
use nvml_wrapper_sys::bindings::nvmlDevice_t;
use nvml_wrapper_sys::bindings::NvmlLib;

const NVML_LIB: &str = "libnvidia-ml.so";
const NVML_LIB_FALLBACK: &str = "libnvidia-ml.so.1";
const NVML_DEVICE_MIG_ENABLE: u32 = 1;
const NVML_DEVICE_UUID_BUFFER_SIZE: usize = 96;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PciInfo {
    pub bus_id: String,
    pub domain: u32,
    pub bus: u32,
    pub device: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigDeviceInfo {
    pub index: u32,
    pub uuid: String,
    pub gpu_instance_id: u32,
    pub compute_instance_id: u32,
}

/// Opens NVML sessions. A session is released when it is dropped.
pub trait NvmlProvider: Debug + Send + Sync {
    fn open(&self) -> Result<Box<dyn NvmlInterface>, NvmlError>;
}

pub trait NvmlInterface {
    fn device_count(&self) -> Result<u32, NvmlError>;
    fn device_by_index(&self, index: u32) -> Result<Box<dyn DeviceInterface + '_>, NvmlError>;
    fn driver_version(&self) -> Result<String, NvmlError>;
    fn cuda_driver_version(&self) -> Result<i32, NvmlError>;
}

pub trait DeviceInterface {
    fn uuid(&self) -> Result<String, NvmlError>;
    fn minor_number(&self) -> Result<u32, NvmlError>;
    fn pci_info(&self) -> Result<PciInfo, NvmlError>;
    fn name(&self) -> Result<String, NvmlError>;
    fn is_mig_enabled(&self) -> Result<bool, NvmlError>;
    /// The MIG devices of a MIG-enabled GPU, empty otherwise.
    fn mig_devices(&self) -> Result<Vec<MigDeviceInfo>, NvmlError>;
}

/// The system NVML library.
#[derive(Debug, Clone, Default)]
pub struct NvmlLibrary {
    lib_path: Option<PathBuf>,
}

impl NvmlLibrary {
    pub fn new(lib_path: Option<PathBuf>) -> Self {
        Self { lib_path }
    }
}

impl NvmlProvider for NvmlLibrary {
    fn open(&self) -> Result<Box<dyn NvmlInterface>, NvmlError> {
        let (nvml, path) = match &self.lib_path {
            Some(path) => (Nvml::builder().lib_path(path.as_os_str()).init()?, path.as_os_str()),
            None => match Nvml::builder().lib_path(OsStr::new(NVML_LIB)).init() {
                Ok(nvml) => (nvml, OsStr::new(NVML_LIB)),
                Err(e) => {
                    tracing::debug!("Standard NVML init failed ({e}), trying {NVML_LIB_FALLBACK}");
                    let nvml = Nvml::builder().lib_path(OsStr::new(NVML_LIB_FALLBACK)).init()?;
                    (nvml, OsStr::new(NVML_LIB_FALLBACK))
                }
            },
        };
        // SAFETY: loading the library NVML was just initialized from only maps
        // it again; no initialization routine beyond NVML's own runs.
        let raw = unsafe { NvmlLib::new(path)? };
        Ok(Box::new(NvmlSession { nvml: Some(nvml), raw }))
    }
}

/// An open NVML session. `raw` is a second mapping of the same library, used
/// for the MIG queries `nvml-wrapper` does not expose.
struct NvmlSession {
    nvml: Option<Nvml>,
    raw: NvmlLib,
}

impl NvmlSession {
    fn nvml(&self) -> Result<&Nvml, NvmlError> {
        self.nvml.as_ref().ok_or(NvmlError::Uninitialized)
    }
}

impl Drop for NvmlSession {
    fn drop(&mut self) {
        if let Some(nvml) = self.nvml.take() {
            if let Err(e) = nvml.shutdown() {
                tracing::warn!("Failed to shutdown NVML: {e}");
            }
        }
    }
}

impl NvmlInterface for NvmlSession {
    fn device_count(&self) -> Result<u32, NvmlError> {
        self.nvml()?.device_count()
    }

    fn device_by_index(&self, index: u32) -> Result<Box<dyn DeviceInterface + '_>, NvmlError> {
        let device = self.nvml()?.device_by_index(index)?;
        Ok(Box::new(DeviceWrapper {
            device,
            raw: &self.raw,
        }))
    }

    fn driver_version(&self) -> Result<String, NvmlError> {
        self.nvml()?.sys_driver_version()
    }

    fn cuda_driver_version(&self) -> Result<i32, NvmlError> {
        self.nvml()?.sys_cuda_driver_version()
    }
}

struct DeviceWrapper<'nvml> {
    device: Device<'nvml>,
    raw: &'nvml NvmlLib,
}

impl DeviceInterface for DeviceWrapper<'_> {
    fn uuid(&self) -> Result<String, NvmlError> {
        self.device.uuid()
    }

    fn minor_number(&self) -> Result<u32, NvmlError> {
        self.device.minor_number()
    }

    fn pci_info(&self) -> Result<PciInfo, NvmlError> {
        let info = self.device.pci_info()?;
        Ok(PciInfo {
            bus_id: info.bus_id,
            domain: info.domain,
            bus: info.bus,
            device: info.device,
        })
    }

    fn name(&self) -> Result<String, NvmlError> {
        self.device.name()
    }

    fn is_mig_enabled(&self) -> Result<bool, NvmlError> {
        match self.device.mig_mode() {
            Ok(mode) => Ok(mode.current == NVML_DEVICE_MIG_ENABLE),
            Err(NvmlError::NotSupported) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn mig_devices(&self) -> Result<Vec<MigDeviceInfo>, NvmlError> {
        if !self.is_mig_enabled()? {
            return Ok(Vec::new());
        }
        // SAFETY: the device handle comes from the live session that also owns
        // `raw`, and both map the same library.
        unsafe { raw_mig_devices(self.raw, self.device.handle()) }
    }
}

/// Lists the MIG devices below `parent` through the raw NVML bindings.
///
/// # Safety
///
/// `parent` must be a valid device handle of an NVML session that is still
/// initialized, obtained from the library `lib` maps.
unsafe fn raw_mig_devices(lib: &NvmlLib, parent: nvmlDevice_t) -> Result<Vec<MigDeviceInfo>, NvmlError> {
    let max_count = nvml_sym(lib.nvmlDeviceGetMaxMigDeviceCount.as_ref())?;
    let handle_by_index = nvml_sym(lib.nvmlDeviceGetMigDeviceHandleByIndex.as_ref())?;
    let gpu_instance = nvml_sym(lib.nvmlDeviceGetGpuInstanceId.as_ref())?;
    let compute_instance = nvml_sym(lib.nvmlDeviceGetComputeInstanceId.as_ref())?;
    let uuid = nvml_sym(lib.nvmlDeviceGetUUID.as_ref())?;

    let mut max = 0;
    nvml_try(max_count(parent, &mut max))?;

    let mut devices = Vec::new();
    for index in 0..max {
        let mut handle: nvmlDevice_t = std::ptr::null_mut();
        match nvml_try(handle_by_index(parent, index, &mut handle)) {
            Ok(()) => {}
            Err(NvmlError::NotFound) => continue,
            Err(e) => return Err(e),
        }

        let mut gpu_instance_id = 0;
        let mut compute_instance_id = 0;
        nvml_try(gpu_instance(handle, &mut gpu_instance_id))?;
        nvml_try(compute_instance(handle, &mut compute_instance_id))?;

        let mut buf = [0 as c_char; NVML_DEVICE_UUID_BUFFER_SIZE];
        nvml_try(uuid(handle, buf.as_mut_ptr(), buf.len() as u32))?;
        let uuid = CStr::from_ptr(buf.as_ptr()).to_string_lossy().into_owned();

        devices.push(MigDeviceInfo {
            index,
            uuid,
            gpu_instance_id,
            compute_instance_id,
        });
    }
    Ok(devices)
}

/// Normalizes an NVML PCI bus id: lowercase with a 4-digit domain.
pub fn normalize_pci_bus_id(bus_id: &str) -> String {
    let id = bus_id.trim_end_matches('\0').to_lowercase();
    match id.split_once(':') {
        Some((domain, rest)) if domain.len() == 8 && domain.starts_with("0000") => {
            format!("{}:{rest}", &domain[4..])
        }
        _ => id,
    }
}


#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn pci_bus_ids_are_normalized() {
        assert_eq!(normalize_pci_bus_id("00000000:3B:00.0"), "0000:3b:00.0");
        assert_eq!(normalize_pci_bus_id("0000:3b:00.0"), "0000:3b:00.0");
        assert_eq!(normalize_pci_bus_id("0000"), "0000");
        assert_eq!(normalize_pci_bus_id("00000001:AF:00.0"), "0001:af:00.0");
    }

    #[test]
    fn missing_library_fails_to_open() {
        let nvml = NvmlLibrary::new(Some(PathBuf::from("/nonexistent/libnvidia-ml.so.1")));
        assert!(nvml.open().is_err());
    }
}
