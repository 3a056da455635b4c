use std::{
    fs, io,
    path::{Path, PathBuf},
};

use rand::{Rng, seq::SliceRandom};

/// Where the client looks for X-rays when none are given.
pub const DEFAULT_DATA_DIR: &str = "data";

/// How many X-rays are picked from the data directory.
pub const DEFAULT_SAMPLE_SIZE: usize = 16;

/// Picks up to `count` random X-rays out of `dir`, laid out as `<dir>/<class>/<image>.jpeg`.
///
/// # Arguments
/// * `dir` - The data directory.
/// * `count` - How many images to pick at most.
/// * `rng` - The source of the shuffle.
///
/// # Returns
/// The picked paths, or an io error if `dir` can't be read.
pub fn sample_images<R>(dir: &Path, count: usize, rng: &mut R) -> io::Result<Vec<PathBuf>>
where
    R: Rng + ?Sized,
{
    let mut images = Vec::new();

    for class in fs::read_dir(dir)? {
        let class = class?.path();
        if !class.is_dir() {
            continue;
        }

        for entry in fs::read_dir(&class)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "jpeg") {
                images.push(path);
            }
        }
    }

    // read_dir order is platform dependent
    images.sort();
    images.shuffle(rng);
    images.truncate(count);

    Ok(images)
}
