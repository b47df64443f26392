use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use tokio::select;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::runner::{run_workload, ChildOutput, Workload};
use crate::config::MonitorConfig;
use crate::error::WattmonError;
use crate::metrics::{
    acquire_device, DeviceBackend, PowerSource, SampleSink, Sampler, SamplerHandle, SamplerReport,
};

/// Where a profiling run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    DeviceReady,
    SamplerArmed,
    ChildRunning,
    SamplerDisarmed,
    Done,
    Failed,
}

#[derive(Debug)]
pub struct RunReport {
    pub child: ChildOutput,
    /// `None` when the sampler ended with `sampler_error`.
    pub sampler: Option<SamplerReport>,
    pub sampler_error: Option<WattmonError>,
}

/// Runs a workload between two idle windows while a sampler records power.
pub struct Harness {
    config: MonitorConfig,
    shutdown: CancellationToken,
    diagnostics: Box<dyn Write + Send>,
    phase: Phase,
}

impl Harness {
    pub fn new(config: MonitorConfig) -> Self {
        Harness {
            config,
            shutdown: CancellationToken::new(),
            diagnostics: Box::new(io::stderr()),
            phase: Phase::Init,
        }
    }

    /// Token that aborts the run (pre-roll, child or post-roll) when cancelled.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Stream that receives a failed child's stderr. Defaults to our stderr.
    pub fn with_diagnostics(mut self, diagnostics: Box<dyn Write + Send>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Opens the configured device from `backend` and profiles `workload`.
    ///
    /// Fails with `NoDevice` before anything is spawned if no device can be
    /// opened. The device is released when this returns.
    pub async fn run<B: DeviceBackend + ?Sized>(
        &mut self,
        backend: &B,
        sink: SampleSink,
        workload: &Workload,
    ) -> Result<RunReport, WattmonError> {
        let device = match acquire_device(backend, self.config.device_index) {
            Ok(device) => device,
            Err(err) => {
                self.enter(Phase::Failed);
                return Err(err);
            }
        };
        self.profile(device, sink, workload).await
    }

    /// Profiles `workload` on an already opened device.
    pub async fn profile(
        &mut self,
        device: Arc<dyn PowerSource>,
        sink: SampleSink,
        workload: &Workload,
    ) -> Result<RunReport, WattmonError> {
        self.enter(Phase::DeviceReady);

        let sampler = SamplerHandle::spawn(Sampler::new(device, sink, self.config.interval));
        sampler.arm();
        self.enter(Phase::SamplerArmed);

        let outcome = self.run_padded(workload).await;

        // Always reached, whatever the child did.
        let sampled = sampler.shutdown().await;
        self.enter(Phase::SamplerDisarmed);

        let child = match outcome {
            Ok(child) => child,
            Err(err) => {
                if let Err(sampler_err) = sampled {
                    warn!("{}", sampler_err);
                }
                self.enter(Phase::Failed);
                return Err(err);
            }
        };

        let (sampler, sampler_error) = match sampled {
            Ok(report) => {
                info!("Recorded {} samples", report.samples);
                (Some(report), None)
            }
            Err(err) => {
                warn!("Power sampling stopped early: {}", err);
                (None, Some(err))
            }
        };

        debug!(
            "'{}' exited with {:?} after {:?} ({} bytes of stdout discarded)",
            workload,
            child.exit_code,
            child.elapsed,
            child.stdout.len()
        );
        if !child.success() {
            self.report_child_failure(workload, &child);
        }

        self.enter(Phase::Done);
        Ok(RunReport {
            child,
            sampler,
            sampler_error,
        })
    }

    async fn run_padded(&mut self, workload: &Workload) -> Result<ChildOutput, WattmonError> {
        self.pause(self.config.pre_roll).await?;

        self.enter(Phase::ChildRunning);
        let child = run_workload(workload, self.config.timeout, &self.shutdown).await?;

        self.pause(self.config.post_roll).await?;
        Ok(child)
    }

    async fn pause(&self, duration: Duration) -> Result<(), WattmonError> {
        select! {
            _ = sleep(duration) => Ok(()),
            _ = self.shutdown.cancelled() => Err(WattmonError::Interrupted),
        }
    }

    fn report_child_failure(&mut self, workload: &Workload, child: &ChildOutput) {
        match child.exit_code {
            Some(code) => warn!("'{}' exited with status {}", workload, code),
            None => warn!("'{}' was terminated by a signal", workload),
        }
        let written = self
            .diagnostics
            .write_all(&child.stderr)
            .and_then(|_| self.diagnostics.flush());
        if let Err(err) = written {
            warn!("Could not forward child stderr: {}", err);
        }
    }

    fn enter(&mut self, phase: Phase) {
        debug!("{:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }
}
