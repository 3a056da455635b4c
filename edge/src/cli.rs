use std::{io, path::PathBuf};

use clap::Parser;
use rand::Rng;

use crate::{
    config::{ClientConfig, DEFAULT_ARCHITECTURE, DEFAULT_CACHE_DIR, DEFAULT_PORT},
    data::{self, DEFAULT_DATA_DIR, DEFAULT_SAMPLE_SIZE},
};

/// Classifies chest X-rays, running the head of the model on this device.
#[derive(Debug, Parser)]
#[command(name = "edge")]
pub struct Args {
    /// The server's ip, the local host ip when absent.
    #[arg(long, env = "EDGE_IP")]
    pub ip: Option<String>,

    #[arg(long, env = "EDGE_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    #[arg(long, env = "EDGE_CACHE_DIR", default_value = DEFAULT_CACHE_DIR)]
    pub cache_dir: PathBuf,

    #[arg(long, env = "EDGE_ARCHITECTURE", default_value = DEFAULT_ARCHITECTURE)]
    pub architecture: String,

    #[arg(long, env = "EDGE_MANIFEST")]
    pub manifest: Option<PathBuf>,

    #[arg(long, env = "EDGE_WEIGHTS")]
    pub weights: Option<PathBuf>,

    #[arg(long, env = "EDGE_RETRY_DELAY_MS", default_value_t = 1000)]
    pub retry_delay_ms: u64,

    #[arg(long, env = "EDGE_TIMEOUT_SECS", default_value_t = 30)]
    pub timeout_secs: u64,

    /// Run the whole model here instead of asking the server.
    #[arg(long, env = "EDGE_LOCAL")]
    pub local: bool,

    /// Where X-rays are picked from when none are given, as `<dir>/<class>/*.jpeg`.
    #[arg(long, env = "EDGE_DATA_DIR", default_value = DEFAULT_DATA_DIR)]
    pub data_dir: PathBuf,

    /// How many X-rays to pick from `data_dir`.
    #[arg(long, env = "EDGE_COUNT", default_value_t = DEFAULT_SAMPLE_SIZE)]
    pub count: usize,

    /// Time this many head passes and report the GFLOP/s instead of classifying.
    #[arg(long)]
    pub benchmark: Option<usize>,

    /// Untimed passes before the benchmark.
    #[arg(long, default_value_t = 3)]
    pub warmup: usize,

    pub images: Vec<PathBuf>,
}

impl Args {
    pub fn config(&self) -> ClientConfig {
        let mut config = ClientConfig {
            port: self.port,
            architecture: self.architecture.clone(),
            cache_dir: self.cache_dir.clone(),
            manifest: self.manifest.clone(),
            weights: self.weights.clone(),
            retry_delay_ms: self.retry_delay_ms,
            timeout_secs: self.timeout_secs,
            ..Default::default()
        };

        if let Some(ip) = &self.ip {
            config.host = ip.clone();
        }

        config
    }

    /// Returns the images given, or a random sample of `data_dir` when none were.
    pub fn images<R: Rng + ?Sized>(&self, rng: &mut R) -> io::Result<Vec<PathBuf>> {
        if !self.images.is_empty() {
            return Ok(self.images.clone());
        }

        let images = data::sample_images(&self.data_dir, self.count, rng)?;
        if images.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no images found in {}", self.data_dir.display()),
            ));
        }

        Ok(images)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    #[test]
    fn images_are_optional() {
        let args = Args::try_parse_from(["edge", "--ip", "192.168.3.5", "--port", "8000"]).unwrap();

        assert!(args.images.is_empty());
        assert_eq!(args.count, DEFAULT_SAMPLE_SIZE);
        assert_eq!(args.benchmark, None);

        let config = args.config();
        assert_eq!(config.host, "192.168.3.5");
        assert_eq!(config.port, 8000);
    }

    #[test]
    fn given_images_win_over_the_data_dir() {
        let args = Args::try_parse_from(["edge", "--data-dir", "no/such/dir", "a.jpeg", "b.jpeg"]).unwrap();
        let mut rng = StdRng::seed_from_u64(0);

        let images = args.images(&mut rng).unwrap();
        assert_eq!(images, vec![PathBuf::from("a.jpeg"), PathBuf::from("b.jpeg")]);
    }

    #[test]
    fn empty_data_dir_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("NORMAL")).unwrap();

        let data_dir = dir.path().to_str().unwrap();
        let args = Args::try_parse_from(["edge", "--data-dir", data_dir]).unwrap();
        let mut rng = StdRng::seed_from_u64(0);

        let err = args.images(&mut rng).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn benchmark_takes_a_count() {
        let args = Args::try_parse_from(["edge", "--benchmark", "20", "--warmup", "0"]).unwrap();
        assert_eq!(args.benchmark, Some(20));
        assert_eq!(args.warmup, 0);
    }
}
