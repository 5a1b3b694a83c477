use super::Context;
use crate::discover::empty;
use crate::discover::gated_discoverer;
use crate::generator::DeviceSpecGenerator;
use crate::generator::GeneratorArena;
use crate::mode::Mode;

/// Feature-gated device classes (GDRCopy, GDS, MOFED, NVSwitch), each as a
/// single `all` device.
#[derive(Debug, Clone, Copy)]
pub(crate) struct GatedFactory {
    mode: Mode,
}

impl GatedFactory {
    pub fn new(mode: Mode) -> Self {
        Self { mode }
    }

    pub fn generators(&self, ctx: &Context) -> GeneratorArena {
        let devices = gated_discoverer(self.mode, ctx.driver_root(), &ctx.dev_root).unwrap_or_else(empty);
        GeneratorArena::with_generator(DeviceSpecGenerator::All { devices })
    }
}
