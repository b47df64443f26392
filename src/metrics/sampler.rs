use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::select;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{PowerSource, Sample, SampleSink};
use crate::error::WattmonError;

/// Shared arm/disarm flag. The coordinator writes it and the sampler reads it.
///
/// Arming wakes a waiting sampler; disarming is only observed at the next
/// iteration boundary.
#[derive(Clone, Default)]
pub struct ArmSignal {
    inner: Arc<ArmInner>,
}

#[derive(Default)]
struct ArmInner {
    armed: AtomicBool,
    notify: Notify,
}

impl ArmSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&self) {
        self.inner.armed.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn disarm(&self) {
        self.inner.armed.store(false, Ordering::SeqCst);
    }

    pub fn is_armed(&self) -> bool {
        self.inner.armed.load(Ordering::SeqCst)
    }

    pub async fn wait_armed(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking so an arm() in between is not lost.
            notified.as_mut().enable();
            if self.is_armed() {
                return;
            }
            notified.await;
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SamplerReport {
    pub samples: u64,
    pub first: Option<i64>,
    pub last: Option<i64>,
}

impl SamplerReport {
    fn record(&mut self, sample: &Sample) {
        self.samples += 1;
        self.first.get_or_insert(sample.timestamp);
        self.last = Some(sample.timestamp);
    }
}

/// Periodic power poller. Does nothing until armed.
pub struct Sampler {
    device: Arc<dyn PowerSource>,
    sink: SampleSink,
    period: Duration,
}

impl Sampler {
    pub fn new(device: Arc<dyn PowerSource>, sink: SampleSink, period: Duration) -> Self {
        Sampler {
            device,
            sink,
            period,
        }
    }

    /// Waits for `signal` to be armed, then emits one sample per period until
    /// the signal is found disarmed after a wait or `cancel` fires.
    ///
    /// A failed power query ends the loop with `DeviceRead`; it is not retried.
    pub async fn run(
        mut self,
        signal: ArmSignal,
        cancel: CancellationToken,
    ) -> Result<SamplerReport, WattmonError> {
        let mut report = SamplerReport::default();

        select! {
            _ = cancel.cancelled() => {
                debug!("sampler cancelled before arming");
                return Ok(report);
            }
            _ = signal.wait_armed() => {}
        }

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;
        debug!("sampler armed, period {:?}", self.period);

        loop {
            let power = self
                .device
                .power_usage()
                .await
                .map_err(WattmonError::DeviceRead)?;
            let sample = Sample::now(power);
            self.sink.write(&sample).map_err(WattmonError::Sink)?;
            report.record(&sample);
            trace!(timestamp = sample.timestamp, power_mw = sample.power_mw, "sample");

            select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if !signal.is_armed() {
                break;
            }
        }

        debug!("sampler stopped after {} samples", report.samples);
        Ok(report)
    }
}

/// Owns the spawned sampler task.
///
/// `shutdown` must be awaited to collect the result. If the handle is dropped
/// instead, the task is cancelled and aborted so it cannot outlive its owner.
pub struct SamplerHandle {
    signal: ArmSignal,
    cancel: CancellationToken,
    task: Option<JoinHandle<Result<SamplerReport, WattmonError>>>,
}

impl SamplerHandle {
    /// Spawns `sampler` disarmed. Does not block the caller.
    pub fn spawn(sampler: Sampler) -> Self {
        let signal = ArmSignal::new();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(sampler.run(signal.clone(), cancel.clone()));
        SamplerHandle {
            signal,
            cancel,
            task: Some(task),
        }
    }

    pub fn arm(&self) {
        self.signal.arm();
    }

    /// Disarms, cancels and waits for the task to finish.
    pub async fn shutdown(mut self) -> Result<SamplerReport, WattmonError> {
        self.signal.disarm();
        self.cancel.cancel();
        let task = match self.task.take() {
            Some(task) => task,
            None => return Ok(SamplerReport::default()),
        };
        match task.await {
            Ok(result) => result,
            Err(join_err) => Err(WattmonError::SamplerAborted(join_err.to_string())),
        }
    }
}

impl Drop for SamplerHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            self.signal.disarm();
            self.cancel.cancel();
            task.abort();
        }
    }
}
