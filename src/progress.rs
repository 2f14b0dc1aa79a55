/// Receives one tick per transcoded frame.
pub trait Progress {
    fn advance(&mut self);
}

impl Progress for tqdm::Pbar {
    fn advance(&mut self) {
        if let Err(err) = self.update(1) {
            log::trace!("progress bar update failed: {}", err);
        }
    }
}

pub struct NoProgress;

impl Progress for NoProgress {
    fn advance(&mut self) {}
}

/// Counts ticks; handy for checking how often progress was reported.
#[derive(Debug, Default)]
pub struct Counter(pub u64);

impl Progress for Counter {
    fn advance(&mut self) {
        self.0 += 1;
    }
}
