use strata_graphics::{traits::CommandDevice, CommandEncoderDesc};

use crate::Error;

/// Serializes all acceleration structure work through one command encoder
/// and its fence.
///
/// Every submission first waits for the previous one. Buffers handed to
/// [`SyncGate::retire`] are destroyed only once the fence of the work that
/// used them is confirmed signaled.
pub struct SyncGate<D: CommandDevice> {
    encoder: Option<D::CommandEncoder>,
    sync_point: Option<D::SyncPoint>,
    retired: Vec<D::Buffer>,
    timeout_ms: u32,
    submission_count: u64,
}

impl<D: CommandDevice> SyncGate<D> {
    pub fn new(device: &D, name: &str, timeout_ms: u32) -> Result<Self, Error> {
        let encoder = device
            .create_command_encoder(CommandEncoderDesc { name })
            .map_err(|source| Error::Device {
                what: "command encoder creation",
                source,
            })?;
        Ok(Self {
            encoder: Some(encoder),
            sync_point: None,
            retired: Vec::new(),
            timeout_ms,
            submission_count: 0,
        })
    }

    pub fn timeout_ms(&self) -> u32 {
        self.timeout_ms
    }

    /// Number of successful submissions so far.
    pub fn submission_count(&self) -> u64 {
        self.submission_count
    }

    /// True if nothing is in flight.
    pub fn is_idle(&self) -> bool {
        self.sync_point.is_none()
    }

    /// Destroy `buffer` after the last submitted work completes.
    pub fn retire(&mut self, buffer: D::Buffer) {
        self.retired.push(buffer);
    }

    /// Block until the last submission completes, then release retired buffers.
    ///
    /// On timeout nothing is released, since the device may still use it.
    #[profiling::function]
    pub fn wait(&mut self, device: &D) -> Result<(), Error> {
        if let Some(ref sp) = self.sync_point {
            if !device.wait_for(sp, self.timeout_ms) {
                log::error!(
                    "Acceleration structure work is not done after {} ms",
                    self.timeout_ms
                );
                return Err(Error::DeviceTimeout {
                    what: "acceleration structure submission",
                    timeout_ms: self.timeout_ms,
                });
            }
            self.sync_point = None;
        }
        if !self.retired.is_empty() {
            log::trace!("Releasing {} retired buffers", self.retired.len());
            for buffer in self.retired.drain(..) {
                device.destroy_buffer(buffer);
            }
        }
        Ok(())
    }

    /// Wait for the previous work, record new commands with `record`, and submit.
    pub fn submit(
        &mut self,
        device: &D,
        record: impl FnOnce(&mut D::CommandEncoder),
    ) -> Result<(), Error> {
        use strata_graphics::traits::CommandEncoder as _;

        self.wait(device)?;
        let encoder = self.encoder.as_mut().ok_or(Error::GateDestroyed)?;
        encoder.start().map_err(|source| Error::Device {
            what: "command encoder reset",
            source,
        })?;
        record(&mut *encoder);
        let sp = device
            .submit(encoder)
            .map_err(|source| Error::Device {
                what: "acceleration structure submission",
                source,
            })?;
        self.sync_point = Some(sp);
        self.submission_count += 1;
        Ok(())
    }

    /// Wait for the outstanding work and release the encoder.
    /// Later calls do nothing, and later submissions fail.
    ///
    /// If the device does not respond, the encoder and any retired buffers
    /// are leaked rather than destroyed while in use.
    pub fn destroy(&mut self, device: &D) {
        match self.wait(device) {
            Ok(()) => {
                if let Some(mut encoder) = self.encoder.take() {
                    device.destroy_command_encoder(&mut encoder);
                }
            }
            Err(err) => log::error!(
                "Leaking the command encoder and {} buffers: {}",
                self.retired.len(),
                err
            ),
        }
    }
}
