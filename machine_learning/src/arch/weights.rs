use std::collections::HashMap;

use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{MlErr, Result};

/// Receives every parameter tensor of a model as `(name, shape, values)`.
pub type ParamVisitor<'a, 'v> = dyn FnMut(String, Vec<usize>, &'a [f32]) + 'v;

/// Something that can provide the values of named parameter tensors.
pub trait WeightSource {
    /// Fetches the parameter tensor `name`.
    ///
    /// # Arguments
    /// * `name` - The dotted parameter name, e.g. `features.conv0.weight`.
    /// * `shape` - The shape the model expects for it.
    ///
    /// # Returns
    /// The row-major values or an error if the tensor is missing or has another shape.
    fn fetch(&mut self, name: &str, shape: &[usize]) -> Result<Vec<f32>>;
}

/// An in-memory set of flat parameter tensors.
#[derive(Debug, Default, Clone)]
pub struct MapWeights {
    tensors: HashMap<String, Vec<f32>>,
}

impl MapWeights {
    pub fn new<'s, I>(tensors: I) -> Self
    where
        I: IntoIterator<Item = (&'s str, Vec<f32>)>,
    {
        Self {
            tensors: tensors
                .into_iter()
                .map(|(name, values)| (name.to_string(), values))
                .collect(),
        }
    }
}

impl WeightSource for MapWeights {
    fn fetch(&mut self, name: &str, shape: &[usize]) -> Result<Vec<f32>> {
        let values = self
            .tensors
            .get(name)
            .ok_or_else(|| MlErr::MissingWeights {
                name: name.to_string(),
            })?;

        let expected: usize = shape.iter().product();
        if values.len() != expected {
            return Err(MlErr::WeightShape {
                name: name.to_string(),
                got: vec![values.len()],
                expected: shape.to_vec(),
            });
        }

        Ok(values.clone())
    }
}

/// Seeded random parameters, used when there is no trained checkpoint at hand.
///
/// Values are drawn per tensor kind so that forward passes stay numerically
/// tame: normalization scales near one, positive running variances and
/// He-uniform weights for the convolutions and dense layers.
pub struct RandomWeights {
    rng: StdRng,
}

impl RandomWeights {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn draw(&mut self, name: &str, shape: &[usize]) -> f32 {
        let param = name.rsplit('.').next().unwrap_or(name);
        let is_norm = shape.len() == 1 && name.contains("norm");

        match param {
            "running_var" => self.rng.random_range(0.5..1.5),
            "running_mean" => self.rng.random_range(-0.1..0.1),
            "weight" if is_norm => self.rng.random_range(0.9..1.1),
            "weight" => {
                let fan_in: usize = shape[1..].iter().product();
                let limit = (6.0 / fan_in.max(1) as f32).sqrt();
                self.rng.random_range(-limit..limit)
            }
            _ => self.rng.random_range(-0.05..0.05),
        }
    }
}

impl WeightSource for RandomWeights {
    fn fetch(&mut self, name: &str, shape: &[usize]) -> Result<Vec<f32>> {
        let n = shape.iter().product();
        Ok((0..n).map(|_| self.draw(name, shape)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_weights_check_the_element_count() {
        let mut src = MapWeights::new([("fc.weight", vec![0.0; 6])]);

        assert_eq!(src.fetch("fc.weight", &[2, 3]).unwrap().len(), 6);
        assert!(matches!(
            src.fetch("fc.weight", &[3, 3]),
            Err(MlErr::WeightShape { .. })
        ));
        assert!(matches!(
            src.fetch("fc.bias", &[2]),
            Err(MlErr::MissingWeights { .. })
        ));
    }

    #[test]
    fn random_weights_are_seeded() {
        let a = RandomWeights::new(3).fetch("conv.weight", &[4, 2, 3, 3]).unwrap();
        let b = RandomWeights::new(3).fetch("conv.weight", &[4, 2, 3, 3]).unwrap();
        assert_eq!(a, b);

        let var = RandomWeights::new(3)
            .fetch("norm0.running_var", &[16])
            .unwrap();
        assert!(var.iter().all(|&v| v > 0.0));
    }
}
