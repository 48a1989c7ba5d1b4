//! Bridge between the playback controller and a native inference module.
//!
//! [`NativeModelBridge`] owns an optional [`NativeModule`]. Everything the
//! controller reads or writes goes through borrows handed out here, so no
//! buffer reference can survive a forward pass.

use std::time::Instant;

use tracing::{debug, info};

use crate::error::VizError;
use crate::native::{ModelLink, NativeModule};
use crate::tensor::{TensorKind, TensorViewMut};

pub struct NativeModelBridge {
    module: Option<Box<dyn NativeModule>>,
    dirty: bool,
    forward_passes: u64,
}

impl NativeModelBridge {
    pub fn new(module: Box<dyn NativeModule>) -> Self {
        Self {
            module: Some(module),
            dirty: false,
            forward_passes: 0,
        }
    }

    /// A bridge with no module attached.
    pub fn detached() -> Self {
        Self {
            module: None,
            dirty: false,
            forward_passes: 0,
        }
    }

    pub fn is_available(&self) -> bool {
        self.module.is_some()
    }

    /// Attach a module, returning the one it replaces.
    pub fn attach(&mut self, module: Box<dyn NativeModule>) -> Option<Box<dyn NativeModule>> {
        info!(
            vocab_size = module.shape().vocab_size,
            n_layer = module.shape().n_layer,
            "Attaching native module"
        );
        self.dirty = true;
        self.module.replace(module)
    }

    /// Detach and return the current module.
    pub fn detach(&mut self) -> Option<Box<dyn NativeModule>> {
        let module = self.module.take();
        if module.is_some() {
            info!("Detached native module");
        }
        module
    }

    pub fn module(&self) -> Option<&dyn NativeModule> {
        self.module.as_deref()
    }

    fn module_mut(&mut self) -> Result<&mut Box<dyn NativeModule>, VizError> {
        self.module.as_mut().ok_or(VizError::BridgeUnavailable)
    }

    /// Borrow a tensor for writing. The view ends before the next call on the
    /// bridge.
    pub fn tensor(&mut self, kind: TensorKind) -> Result<TensorViewMut<'_>, VizError> {
        let module = self.module_mut()?;
        let tensor = module
            .tensor_mut(kind)
            .ok_or(VizError::TensorNotFound(kind))?;
        Ok(tensor.view_mut(kind))
    }

    /// Read-only model link: shape, sequence length and sorted buffer.
    pub fn link(&self) -> Result<ModelLink<'_>, VizError> {
        let module = self.module.as_deref().ok_or(VizError::BridgeUnavailable)?;
        Ok(ModelLink::from_module(module))
    }

    pub fn set_input_len(&mut self, len: usize) -> Result<(), VizError> {
        self.module_mut()?.set_input_len(len)
    }

    /// Run one forward pass on the calling thread. Blocks for the full
    /// duration of the native computation.
    pub fn run_forward_pass(&mut self) -> Result<(), VizError> {
        let module = self.module_mut()?;
        let start = Instant::now();
        module.run_model()?;
        self.forward_passes += 1;
        debug!(
            forward_passes = self.forward_passes,
            elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Forward pass complete"
        );
        Ok(())
    }

    /// Tell the renderer that tensors changed and must be re-read.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Consume the dirty flag. Returns whether tensors changed since the last
    /// call.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// Forward passes run through this bridge.
    pub fn forward_passes(&self) -> u64 {
        self.forward_passes
    }
}
