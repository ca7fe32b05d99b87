//! Backend selection and per-chunk dispatch

use tracing::{debug, info, warn};

use super::accelerated::{self, AcceleratorHandle, CandleAccelerator};
use super::probe::AcceleratorInfo;
use super::{Backend, BackendPreference};
use crate::dsp::compressor::{self, CompressionParams, EnvelopeState};
use crate::dsp::Chunk;
use crate::error::{DrcError, Result};

/// Resolve a preference to the backend this process will use
///
/// `Auto` takes the accelerated path only when a GPU was probed. An explicit
/// `Accelerated` preference always gets tensor kernels, on the host CPU if no
/// GPU is present.
pub fn select_backend(preference: BackendPreference) -> Backend {
    match preference {
        BackendPreference::Reference => Backend::Reference,
        BackendPreference::Accelerated => Backend::Accelerated,
        BackendPreference::Auto => {
            if AcceleratorInfo::detect().is_some() {
                Backend::Accelerated
            } else {
                Backend::Reference
            }
        }
    }
}

/// Owns the accelerator context and routes chunks to a kernel
#[derive(Debug)]
pub struct DeviceDispatch {
    backend: Backend,
    accelerator: Option<AcceleratorHandle>,
}

impl DeviceDispatch {
    /// Probe once and build a dispatcher for the preferred backend
    pub fn from_preference(preference: BackendPreference) -> Self {
        match select_backend(preference) {
            Backend::Reference => Self::reference(),
            Backend::Accelerated => {
                let accelerator = CandleAccelerator::gpu().unwrap_or_else(CandleAccelerator::cpu);
                Self::with_accelerator(AcceleratorHandle::new(accelerator))
            }
        }
    }

    /// Dispatcher that only ever runs the scalar reference kernel
    pub fn reference() -> Self {
        Self {
            backend: Backend::Reference,
            accelerator: None,
        }
    }

    /// Dispatcher bound to an explicit accelerator
    pub fn with_accelerator(accelerator: AcceleratorHandle) -> Self {
        info!(device = %accelerator.name(), "accelerated backend selected");
        Self {
            backend: Backend::Accelerated,
            accelerator: Some(accelerator),
        }
    }

    /// Backend a new job starts on
    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Name of the bound accelerator, if any
    pub fn accelerator_name(&self) -> Option<String> {
        self.accelerator.as_ref().map(AcceleratorHandle::name)
    }

    /// Process one chunk on the job's current backend
    ///
    /// A device fault on the accelerated path moves `backend` to `Reference`
    /// for the rest of the job and reruns the chunk there. Any other error is
    /// returned unchanged.
    pub fn run(
        &self,
        chunk: &Chunk,
        params: &CompressionParams,
        carried: EnvelopeState,
        backend: &mut Backend,
    ) -> Result<(Chunk, EnvelopeState)> {
        if *backend == Backend::Accelerated {
            let outcome = match &self.accelerator {
                Some(handle) => accelerated::process(handle, chunk, params, carried),
                None => Err(DrcError::DeviceFault {
                    reason: "no accelerator bound to this dispatcher".to_string(),
                }),
            };
            match outcome {
                Err(err) if err.is_recoverable() => {
                    warn!(chunk = chunk.index, error = %err, "accelerator fault, continuing on the reference path");
                    *backend = Backend::Reference;
                }
                other => return other,
            }
        }

        debug!(chunk = chunk.index, backend = %backend, "reference kernel");
        compressor::process(chunk, params, carried)
    }
}
