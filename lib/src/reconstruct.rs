//! Concurrent cube reconstruction
//!
//! One assembly task per device, all writing into the same pre-allocated
//! cube. The cube is split along its RX-channel axis into the four disjoint
//! slices of the channel partition before any task starts, so the tasks
//! never share a writable region and need no locking.
use crossbeam_channel::unbounded;
use ndarray::{ArrayViewMut6, Axis};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crate::assemble::{AssemblyReport, FrameAssembler};
use crate::capture::{IQ_WORDS, RX_PER_CHIP, VIRTUAL_TX};
use crate::config::ValidatedConfig;
use crate::device::{validate_partition, Device, CHANNEL_PARTITION, NUM_RX_CHANNELS};
use crate::errors::RepackError;
use crate::scan::ScanLine;
use crate::stream::{ChunkSource, WindowedFrameStream};

/// Shape of the assembled cube for a configuration:
/// `(rx channels, virtual tx, rows, cols, samples, IQ)`
pub fn cube_shape(config: &ValidatedConfig) -> [usize; 6] {
    [
        NUM_RX_CHANNELS,
        VIRTUAL_TX,
        config.rows(),
        config.cols(),
        config.samples_per_chirp(),
        IQ_WORDS,
    ]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceReport {
    pub device: Device,
    pub assembly: AssemblyReport,
}

/// Outcome of a whole reconstruction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepackReport {
    pub devices: Vec<DeviceReport>,
    /// Configured rows the scan log had no entry for
    pub missing_scan_rows: usize,
}

impl RepackReport {
    /// Rows left zero-filled, summed over devices
    pub fn zero_filled_rows(&self) -> usize {
        self.devices
            .iter()
            .map(|d| d.assembly.zero_filled_rows)
            .sum()
    }

    pub fn is_partial(&self) -> bool {
        self.missing_scan_rows > 0 || self.devices.iter().any(|d| d.assembly.is_partial())
    }
}

/// Progress messages sent by the device tasks
enum Progress {
    RowAssembled { device: Device, row: usize },
    Finished { device: Device, rows: usize },
}

pub struct ConcurrentReconstructor<'a> {
    config: &'a ValidatedConfig,
    running: &'a AtomicBool,
}

impl<'a> ConcurrentReconstructor<'a> {
    /// # Arguments
    /// * `config` - The capture configuration
    /// * `running` - Cooperative cancellation flag, checked once per row.
    ///   Only read, never written.
    pub fn new(config: &'a ValidatedConfig, running: &'a AtomicBool) -> Result<Self, RepackError> {
        validate_partition(&CHANNEL_PARTITION)?;
        Ok(Self { config, running })
    }

    /// Assemble every device's frames into `cube`.
    ///
    /// `streams` must hold exactly one stream per device. Fails with the
    /// first task error; the cube content is unspecified in that case. A
    /// failing task stops the other tasks at their next row.
    pub fn reconstruct_into<S: ChunkSource + Send>(
        &self,
        streams: Vec<(Device, WindowedFrameStream<S>)>,
        lines: &[ScanLine],
        mut cube: ArrayViewMut6<i16>,
    ) -> Result<Vec<DeviceReport>, RepackError> {
        let expected = cube_shape(self.config);
        if cube.shape() != expected {
            return Err(RepackError::Validation(format!(
                "cube has shape {:?}, expected {:?}",
                cube.shape(),
                expected
            )));
        }
        for device in Device::ALL {
            let count = streams.iter().filter(|(d, _)| *d == device).count();
            if count != 1 {
                return Err(RepackError::Validation(format!(
                    "expected one stream for {device}, got {count}"
                )));
            }
        }

        // Hand each device the cube slice starting at its first channel.
        let mut slices: HashMap<Device, ArrayViewMut6<i16>> = HashMap::new();
        for (i, slice) in cube.axis_chunks_iter_mut(Axis(0), RX_PER_CHIP).enumerate() {
            let first = i * RX_PER_CHIP;
            if let Some((device, _)) = CHANNEL_PARTITION.iter().find(|(_, r)| r.start == first) {
                slices.insert(*device, slice);
            }
        }

        let assembler = FrameAssembler::new(self.config);
        let running = self.running;
        // Set by the first failing task, scoped to this call
        let abort = AtomicBool::new(false);
        let abort = &abort;

        let results = thread::scope(|scope| {
            let (tx, rx) = unbounded();
            let mut handles = Vec::with_capacity(streams.len());

            for (device, mut stream) in streams {
                let Some(slice) = slices.remove(&device) else {
                    continue;
                };
                let tx = tx.clone();
                let assembler = &assembler;
                log::debug!("Starting assembly of {} into channels {:?}", device, device.channels());

                let handle = scope.spawn(move || {
                    let stop = || !running.load(Ordering::SeqCst) || abort.load(Ordering::SeqCst);
                    let result = assembler.assemble(&mut stream, lines, slice, stop, |row| {
                        let _ = tx.send(Progress::RowAssembled { device, row });
                    });
                    match &result {
                        Ok(report) => {
                            let _ = tx.send(Progress::Finished {
                                device,
                                rows: report.rows_assembled,
                            });
                        }
                        Err(RepackError::Cancelled) => {}
                        Err(e) => {
                            log::error!("Assembly of {} failed: {}", device, e);
                            abort.store(true, Ordering::SeqCst);
                        }
                    }
                    result
                });
                handles.push((device, handle));
            }
            // Only the tasks hold senders now; the loop ends once all are done.
            drop(tx);

            for progress in rx.iter() {
                match progress {
                    Progress::RowAssembled { device, row } => {
                        log::trace!("{}: row {} assembled", device, row);
                    }
                    Progress::Finished { device, rows } => {
                        log::info!("{}: assembled {} row(s)", device, rows);
                    }
                }
            }

            handles
                .into_iter()
                .map(|(device, handle)| (device, handle.join()))
                .collect::<Vec<_>>()
        });

        let mut reports = Vec::with_capacity(results.len());
        let mut cancelled = false;
        let mut failure = None;

        for (device, joined) in results {
            match joined {
                Ok(Ok(assembly)) => reports.push(DeviceReport { device, assembly }),
                Ok(Err(RepackError::Cancelled)) => cancelled = true,
                Ok(Err(e)) => {
                    failure.get_or_insert(e);
                }
                Err(_) => {
                    failure.get_or_insert(RepackError::DeviceTask(device.to_string()));
                }
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }
        if cancelled {
            return Err(RepackError::Cancelled);
        }
        Ok(reports)
    }
}
