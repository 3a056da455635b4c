use std::time::{Duration, Instant};

use ndarray::ArrayD;

use crate::{
    client::EdgeClient,
    error::{EdgeErr, Result},
};

/// The timed forward passes of the head over a blank input.
#[derive(Debug, Clone)]
pub struct Benchmark {
    /// The operations of one head pass.
    pub flops: u64,
    pub timings: Vec<Duration>,
}

impl Benchmark {
    /// Returns the throughput of a pass that took `elapsed`, in GFLOP/s.
    pub fn gflops(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }

        self.flops as f64 / secs / 1e9
    }

    pub fn mean(&self) -> Duration {
        if self.timings.is_empty() {
            return Duration::ZERO;
        }

        self.timings.iter().sum::<Duration>() / self.timings.len() as u32
    }
}

impl EdgeClient {
    /// Times the head on this device, nothing is sent to the server.
    ///
    /// # Arguments
    /// * `warmup` - Untimed passes run first.
    /// * `iterations` - Timed passes.
    ///
    /// # Returns
    /// The per pass timings or the first error found.
    pub fn benchmark(&self, warmup: usize, iterations: usize) -> Result<Benchmark> {
        let head = self.head();
        let flops = head.flops()?;
        let x = ArrayD::zeros(head.input_shape());

        for _ in 0..warmup {
            head.forward(x.clone()).map_err(EdgeErr::Compute)?;
        }

        let mut timings = Vec::with_capacity(iterations);
        for _ in 0..iterations {
            let input = x.clone();
            let start = Instant::now();
            head.forward(input).map_err(EdgeErr::Compute)?;
            timings.push(start.elapsed());
        }

        Ok(Benchmark { flops, timings })
    }
}
