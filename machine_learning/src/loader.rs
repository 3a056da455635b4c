//! Reading and writing models: JSON manifests, safetensors checkpoints and
//! the partition blobs kept in the cache.
//!
//! A blob is a safetensors buffer whose metadata holds the JSON description of
//! the model under the `model` key, parameters are stored as `<stage>.<param>`.

use std::{collections::HashMap, fs, path::Path};

use log::info;
use safetensors::{Dtype, SafeTensors, tensor::TensorView};

use crate::{
    MlErr, Result,
    arch::{NetworkGraph, Sequential, densenet, weights::WeightSource},
};

const MODEL_KEY: &str = "model";

/// The parameters of a safetensors buffer.
pub struct SafeTensorWeights<'data> {
    tensors: SafeTensors<'data>,
}

impl<'data> SafeTensorWeights<'data> {
    pub fn new(bytes: &'data [u8]) -> Result<Self> {
        Ok(Self {
            tensors: SafeTensors::deserialize(bytes)?,
        })
    }
}

impl WeightSource for SafeTensorWeights<'_> {
    fn fetch(&mut self, name: &str, shape: &[usize]) -> Result<Vec<f32>> {
        let view = self
            .tensors
            .tensor(name)
            .map_err(|_| MlErr::MissingWeights {
                name: name.to_string(),
            })?;

        if view.dtype() != Dtype::F32 {
            return Err(MlErr::Checkpoint(format!(
                "the tensor {name} is {:?}, only F32 is supported",
                view.dtype()
            )));
        }

        if view.shape() != shape {
            return Err(MlErr::WeightShape {
                name: name.to_string(),
                got: view.shape().to_vec(),
                expected: shape.to_vec(),
            });
        }

        let values = view
            .data()
            .chunks_exact(size_of::<f32>())
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        Ok(values)
    }
}

/// Serializes every parameter `visit` reports into a safetensors buffer.
fn serialize_params<'a, F>(visit: F, metadata: Option<HashMap<String, String>>) -> Result<Vec<u8>>
where
    F: FnOnce(&mut dyn FnMut(String, Vec<usize>, &'a [f32])),
{
    let mut params = Vec::new();
    visit(&mut |name: String, shape: Vec<usize>, values: &'a [f32]| {
        params.push((name, shape, values))
    });

    let views = params
        .into_iter()
        .map(|(name, shape, values)| {
            let view = TensorView::new(Dtype::F32, shape, bytemuck::cast_slice(values))?;
            Ok((name, view))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(safetensors::serialize(views, &metadata)?)
}

/// Encodes `model` into a cache blob, identical models give identical blobs.
pub fn encode_blob(model: &Sequential) -> Result<Vec<u8>> {
    let description = serde_json::to_string(model)?;
    let metadata = HashMap::from([(MODEL_KEY.to_string(), description)]);

    serialize_params(|visitor| model.visit_params(visitor), Some(metadata))
}

/// Decodes a cache blob written by `encode_blob`.
///
/// # Returns
/// The model, with its shapes inferred again, or a `Checkpoint` error if the
/// blob is not a model or doesn't agree with itself.
pub fn decode_blob(blob: &[u8]) -> Result<Sequential> {
    let (_, metadata) = SafeTensors::read_metadata(blob)?;
    let description = metadata
        .metadata()
        .as_ref()
        .and_then(|m| m.get(MODEL_KEY))
        .ok_or_else(|| MlErr::Checkpoint("the blob has no model description".to_string()))?;

    let skeleton: Sequential = serde_json::from_str(description)?;
    let mut weights = SafeTensorWeights::new(blob)?;
    let mut stages = skeleton.stages().to_vec();

    for stage in &mut stages {
        stage.load_params(&mut weights)?;
    }

    let model = Sequential::new(
        skeleton.architecture().to_string(),
        skeleton.input_shape().to_vec(),
        stages,
    )?;

    if model.output_shape() != skeleton.output_shape() {
        return Err(MlErr::Checkpoint(format!(
            "the blob declares an output of {:?} but its stages produce {:?}",
            skeleton.output_shape(),
            model.output_shape()
        )));
    }

    Ok(model)
}

/// Reads a JSON manifest describing a `NetworkGraph`, parameters aside.
pub fn load_manifest(path: &Path) -> Result<NetworkGraph> {
    Ok(serde_json::from_slice(&fs::read(path)?)?)
}

/// Fills in the parameters of `graph` from a safetensors checkpoint.
///
/// # Arguments
/// * `graph` - The graph to load.
/// * `weights` - The path to the safetensors file.
pub fn load_weights(mut graph: NetworkGraph, weights: &Path) -> Result<NetworkGraph> {
    let bytes = fs::read(weights)?;
    graph.load_params(&mut SafeTensorWeights::new(&bytes)?)?;

    info!(
        architecture = graph.architecture.as_str(),
        stages = graph.stages.len();
        "loaded checkpoint"
    );

    Ok(graph)
}

/// Loads the full model of `architecture`.
///
/// # Arguments
/// * `architecture` - The name of the network.
/// * `manifest` - A manifest describing the graph, a DenseNet preset is used when absent.
/// * `weights` - The safetensors checkpoint.
///
/// # Returns
/// The loaded graph or a `MissingPartition` error when there is no checkpoint.
pub fn load_graph(
    architecture: &str,
    manifest: Option<&Path>,
    weights: Option<&Path>,
) -> Result<NetworkGraph> {
    let weights = weights.ok_or_else(|| MlErr::MissingPartition {
        architecture: architecture.to_string(),
    })?;

    let graph = match manifest {
        Some(path) => load_manifest(path)?,
        None => densenet::by_name(architecture)?,
    };

    if graph.architecture != architecture {
        return Err(MlErr::Checkpoint(format!(
            "the manifest describes {}, expected {architecture}",
            graph.architecture
        )));
    }

    load_weights(graph, weights)
}

/// Writes `graph` as a manifest plus a safetensors checkpoint.
pub fn save_checkpoint(graph: &NetworkGraph, manifest: &Path, weights: &Path) -> Result<()> {
    fs::write(manifest, serde_json::to_vec_pretty(graph)?)?;

    let bytes = serialize_params(
        |visitor| graph.stages.iter().for_each(|s| s.visit_params(visitor)),
        None,
    )?;
    fs::write(weights, bytes)?;

    Ok(())
}
