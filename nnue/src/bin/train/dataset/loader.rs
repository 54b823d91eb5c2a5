use std::sync::{mpsc, Arc, Mutex};
use std::thread;

use candle_core::{Device, Result as CandleResult, Tensor};
use nnue::encoding::{write_dense, NUM_FEATURES};
use nnue::samples::Samples;

use super::TargetParams;

// Holds x items in the channel per worker
const CHANNEL_BUFFER_MULTIPLIER: usize = 2;

/// Dense inputs and targets of one batch, row-major.
#[derive(Default)]
pub struct Batch {
    pub white: Vec<f32>,
    pub black: Vec<f32>,
    pub stm: Vec<f32>,
    pub targets: Vec<f32>,
}

impl Batch {
    fn with_capacity(size: usize) -> Self {
        Self {
            white: Vec::with_capacity(size * NUM_FEATURES),
            black: Vec::with_capacity(size * NUM_FEATURES),
            stm: Vec::with_capacity(size),
            targets: Vec::with_capacity(size),
        }
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// `(white, black, stm, target)` tensors on `device`.
    pub fn to_tensors(self, device: &Device) -> CandleResult<(Tensor, Tensor, Tensor, Tensor)> {
        let n = self.len();
        Ok((
            Tensor::from_vec(self.white, (n, NUM_FEATURES), device)?,
            Tensor::from_vec(self.black, (n, NUM_FEATURES), device)?,
            Tensor::from_vec(self.stm, (n, 1), device)?,
            Tensor::from_vec(self.targets, (n, 1), device)?,
        ))
    }
}

/// Multi-threaded data loader over samples held in memory.
///
/// Workers encode positions (or reuse cached features), expand them to dense
/// rows and send finished batches through a bounded channel. Batches can
/// arrive out of order.
pub struct DataLoader {
    receiver: mpsc::Receiver<Batch>,
    workers: Vec<thread::JoinHandle<()>>,
    num_samples: usize,
}

impl DataLoader {
    pub fn new(
        samples: Arc<Samples>,
        indices: &[usize],
        batch_size: usize,
        num_workers: usize,
        target: TargetParams,
    ) -> Self {
        let num_workers = num_workers.max(1);
        let (sender, receiver) = mpsc::sync_channel(num_workers * CHANNEL_BUFFER_MULTIPLIER);

        let (work_sender, work_receiver) =
            mpsc::sync_channel::<Vec<usize>>(num_workers * CHANNEL_BUFFER_MULTIPLIER);
        let work_receiver = Arc::new(Mutex::new(work_receiver));

        let workers = Self::spawn_workers(num_workers, work_receiver, sender, samples, target);

        // Distribute batches to workers
        let chunks: Vec<Vec<usize>> = indices
            .chunks(batch_size.max(1))
            .map(<[usize]>::to_vec)
            .collect();
        thread::spawn(move || {
            for chunk in chunks {
                if work_sender.send(chunk).is_err() {
                    break;
                }
            }
        });

        Self {
            receiver,
            workers,
            num_samples: indices.len(),
        }
    }

    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    fn spawn_workers(
        num_workers: usize,
        work_receiver: Arc<Mutex<mpsc::Receiver<Vec<usize>>>>,
        sender: mpsc::SyncSender<Batch>,
        samples: Arc<Samples>,
        target: TargetParams,
    ) -> Vec<thread::JoinHandle<()>> {
        (0..num_workers)
            .map(|_| {
                let rx = Arc::clone(&work_receiver);
                let tx = sender.clone();
                let samples = Arc::clone(&samples);

                thread::spawn(move || loop {
                    let indices = {
                        let Ok(rx) = rx.lock() else { break };
                        match rx.recv() {
                            Ok(indices) => indices,
                            Err(_) => break,
                        }
                    };

                    let batch = Self::build_batch(&samples, &indices, target);
                    if tx.send(batch).is_err() {
                        break;
                    }
                })
            })
            .collect()
    }

    fn build_batch(samples: &Samples, indices: &[usize], target: TargetParams) -> Batch {
        let mut batch = Batch::with_capacity(indices.len());

        for &i in indices {
            let sample = &samples.samples[i];
            let features = match sample.features() {
                Ok(features) => features,
                Err(e) => {
                    log::debug!("Skipping sample '{}': {}", sample.fen, e);
                    continue;
                }
            };

            let row = batch.white.len();
            batch.white.resize(row + NUM_FEATURES, 0.0);
            batch.black.resize(row + NUM_FEATURES, 0.0);
            write_dense(&features.white, &mut batch.white[row..]);
            write_dense(&features.black, &mut batch.black[row..]);

            batch.stm.push(if features.white_to_move { 1.0 } else { 0.0 });
            batch.targets.push(sample.target(
                features.white_to_move,
                target.wdl_scale,
                target.wdl_lambda,
            ));
        }

        batch
    }
}

impl Iterator for DataLoader {
    type Item = Batch;

    fn next(&mut self) -> Option<Self::Item> {
        self.receiver.recv().ok()
    }
}

impl Drop for DataLoader {
    fn drop(&mut self) {
        // Unblock workers waiting on a full channel before joining them
        let (_, closed) = mpsc::sync_channel(0);
        drop(std::mem::replace(&mut self.receiver, closed));

        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}
