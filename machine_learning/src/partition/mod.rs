//! Splits a network into the head that runs on the edge and the tail that
//! runs on the server.

mod cache;

use log::{debug, info};

pub use cache::{CacheKey, FsPartitionCache, MemoryPartitionCache, PartitionCache, Role};

use crate::{
    MlErr, Result,
    arch::{NetworkGraph, Sequential, Stage, layers::StageKind},
};

/// The two halves of a network.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub head: Sequential,
    pub tail: Sequential,
}

impl Partition {
    fn check_boundary(&self) -> Result<()> {
        if self.head.output_shape() != self.tail.input_shape() {
            return Err(MlErr::BoundaryMismatch {
                head: self.head.output_shape().to_vec(),
                tail: self.tail.input_shape().to_vec(),
            });
        }

        Ok(())
    }
}

/// Whether `stage` belongs to the trailing output stages replaced by the epilogue.
fn is_output_stage(stage: &Stage) -> bool {
    matches!(
        stage.kind,
        StageKind::Activation { .. }
            | StageKind::GlobalAvgPool
            | StageKind::Flatten
            | StageKind::Classifier(_)
    )
}

/// Splits `graph` at its first pool-downsample stage.
///
/// The head keeps every stage up to and including the split point. The tail
/// keeps the rest, with its trailing output stages replaced by the epilogue
/// `relu -> global average pool -> flatten -> classifier`.
///
/// # Arguments
/// * `graph` - The loaded network.
///
/// # Returns
/// The partition, or a `NoSplitPoint` or `MissingClassifier` error.
pub fn split(graph: &NetworkGraph) -> Result<Partition> {
    let architecture = &graph.architecture;

    let split = graph.split_point().ok_or_else(|| MlErr::NoSplitPoint {
        architecture: architecture.clone(),
    })?;

    let classifier = graph
        .stages
        .last()
        .filter(|stage| stage.is_classifier())
        .ok_or_else(|| MlErr::MissingClassifier {
            architecture: architecture.clone(),
        })?;

    let (head, rest) = graph.stages.split_at(split + 1);
    let body = rest.len()
        - rest
            .iter()
            .rev()
            .take_while(|stage| is_output_stage(stage))
            .count();

    let mut tail = rest[..body].to_vec();
    tail.extend([
        Stage::new("relu", StageKind::relu()),
        Stage::new("avgpool", StageKind::GlobalAvgPool),
        Stage::new("flatten", StageKind::Flatten),
        classifier.clone(),
    ]);

    let head = Sequential::new(architecture.clone(), graph.input_shape.clone(), head.to_vec())?;
    let tail = Sequential::new(architecture.clone(), head.output_shape().to_vec(), tail)?;
    let partition = Partition { head, tail };
    partition.check_boundary()?;

    Ok(partition)
}

/// Computes partitions and keeps them in a `PartitionCache`.
#[derive(Debug)]
pub struct ModelPartitioner<C> {
    cache: C,
}

impl<C: PartitionCache> ModelPartitioner<C> {
    pub fn new(cache: C) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Partitions `graph`, reusing the cached halves when both are present.
    ///
    /// # Arguments
    /// * `graph` - The loaded network.
    ///
    /// # Returns
    /// The partition or a configuration error, nothing is cached on error.
    pub fn partition(&self, graph: &NetworkGraph) -> Result<Partition> {
        if let Some(partition) = self.cached(&graph.architecture)? {
            return Ok(partition);
        }

        self.compute(graph)
    }

    /// Partitions the network `architecture`, only calling `load_graph` when
    /// the cache doesn't hold both halves.
    ///
    /// # Arguments
    /// * `architecture` - The name of the network.
    /// * `load_graph` - Loads the full network, usually from a checkpoint.
    ///
    /// # Returns
    /// The partition, or a `MissingPartition` error if there is neither a
    /// cached partition nor a checkpoint.
    pub fn partition_or_load<F>(&self, architecture: &str, load_graph: F) -> Result<Partition>
    where
        F: FnOnce() -> Result<NetworkGraph>,
    {
        if let Some(partition) = self.cached(architecture)? {
            return Ok(partition);
        }

        let graph = load_graph()?;
        self.compute(&graph)
    }

    /// Loads the cached partition of `architecture`.
    ///
    /// # Returns
    /// `None` unless both halves are cached, a `BoundaryMismatch` error if
    /// they don't fit together.
    pub fn cached(&self, architecture: &str) -> Result<Option<Partition>> {
        let head = self.cache.load(&CacheKey::new(architecture, Role::Head))?;
        let tail = self.cache.load(&CacheKey::new(architecture, Role::Tail))?;

        let (Some(head), Some(tail)) = (head, tail) else {
            debug!(architecture = architecture; "partition not cached");
            return Ok(None);
        };

        let partition = Partition {
            head: Sequential::from_blob(&head)?,
            tail: Sequential::from_blob(&tail)?,
        };
        partition.check_boundary()?;

        let (head_flops, tail_flops) = (partition.head.flops()?, partition.tail.flops()?);
        info!(
            architecture = architecture,
            head_flops = head_flops,
            tail_flops = tail_flops;
            "loaded cached partition"
        );
        Ok(Some(partition))
    }

    fn compute(&self, graph: &NetworkGraph) -> Result<Partition> {
        let partition = split(graph)?;
        let head = partition.head.to_blob()?;
        let tail = partition.tail.to_blob()?;

        let architecture = graph.architecture.as_str();
        let (head_flops, tail_flops) = (partition.head.flops()?, partition.tail.flops()?);
        self.cache
            .store(&CacheKey::new(architecture, Role::Head), &head)?;
        self.cache
            .store(&CacheKey::new(architecture, Role::Tail), &tail)?;

        info!(
            architecture = architecture,
            head_stages = partition.head.stages().len(),
            tail_stages = partition.tail.stages().len(),
            head_flops = head_flops,
            tail_flops = tail_flops;
            "partition computed"
        );

        Ok(partition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::{
        layers::{Conv2d, Dense, MaxPool2d},
        weights::RandomWeights,
    };

    fn toy(stages: Vec<Stage>) -> NetworkGraph {
        let mut graph = NetworkGraph::new("toy", vec![1, 1, 8, 8], stages);
        graph.load_params(&mut RandomWeights::new(5)).unwrap();
        graph
    }

    fn conv(name: &str, cin: usize, cout: usize) -> Stage {
        Stage::new(name, StageKind::Conv(Conv2d::new(cin, cout, 3, 1, 1, true)))
    }

    fn pool(name: &str) -> Stage {
        Stage::new(name, StageKind::PoolDownsample(MaxPool2d::new(2, 2, 0)))
    }

    fn classifier(features: usize) -> Stage {
        Stage::new("classifier", StageKind::Classifier(Dense::new(features, 2)))
    }

    fn names(model: &Sequential) -> Vec<&str> {
        model.stages().iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn tail_gets_the_epilogue() {
        let graph = toy(vec![
            conv("conv0", 1, 4),
            pool("pool0"),
            conv("conv1", 4, 6),
            pool("pool1"),
            Stage::new("act", StageKind::relu()),
            Stage::new("flatten", StageKind::Flatten),
            classifier(6 * 2 * 2),
        ]);

        // the classifier takes the flattened 6x2x2 map, the epilogue pools it down to 6
        assert!(matches!(split(&graph), Err(MlErr::InvalidStage { .. })));

        let graph = toy(vec![
            conv("conv0", 1, 4),
            pool("pool0"),
            conv("conv1", 4, 6),
            Stage::new("act", StageKind::relu()),
            Stage::new("gap", StageKind::GlobalAvgPool),
            Stage::new("flatten", StageKind::Flatten),
            classifier(6),
        ]);
        let partition = split(&graph).unwrap();

        assert_eq!(names(&partition.head), ["conv0", "pool0"]);
        assert_eq!(
            names(&partition.tail),
            ["conv1", "relu", "avgpool", "flatten", "classifier"]
        );
        assert_eq!(partition.head.output_shape(), &[1, 4, 4, 4]);
        assert_eq!(partition.tail.input_shape(), &[1, 4, 4, 4]);
        assert_eq!(partition.tail.output_shape(), &[1, 2]);
    }

    #[test]
    fn later_pools_stay_in_the_tail() {
        let graph = toy(vec![
            conv("conv0", 1, 4),
            pool("pool0"),
            pool("pool1"),
            classifier(4),
        ]);
        let partition = split(&graph).unwrap();

        assert_eq!(names(&partition.head), ["conv0", "pool0"]);
        assert_eq!(partition.tail.stages()[0].name, "pool1");
    }

    #[test]
    fn graph_without_pool_downsample_is_rejected() {
        let cache = MemoryPartitionCache::new();
        let partitioner = ModelPartitioner::new(&cache);
        let graph = toy(vec![
            conv("conv0", 1, 4),
            Stage::new("gap", StageKind::GlobalAvgPool),
            Stage::new("flatten", StageKind::Flatten),
            classifier(4),
        ]);

        let err = partitioner.partition(&graph).unwrap_err();
        assert!(matches!(err, MlErr::NoSplitPoint { .. }));
        assert!(cache.is_empty());
    }

    #[test]
    fn graph_without_classifier_is_rejected() {
        let graph = toy(vec![conv("conv0", 1, 4), pool("pool0")]);
        assert!(matches!(
            split(&graph),
            Err(MlErr::MissingClassifier { .. })
        ));
    }

    #[test]
    fn cache_hits_skip_the_checkpoint() {
        let cache = MemoryPartitionCache::new();
        let partitioner = ModelPartitioner::new(&cache);
        let graph = toy(vec![conv("conv0", 1, 4), pool("pool0"), classifier(4)]);

        let first = partitioner.partition(&graph).unwrap();
        assert_eq!(cache.stores(), 2);

        let second = partitioner
            .partition_or_load("toy", || panic!("the cache should have been used"))
            .unwrap();
        assert_eq!(second, first);
        assert_eq!(cache.stores(), 2);

        let missing = partitioner.partition_or_load("other", || {
            Err(MlErr::MissingPartition {
                architecture: "other".to_string(),
            })
        });
        assert!(matches!(missing, Err(MlErr::MissingPartition { .. })));
    }

    #[test]
    fn mismatched_cached_halves_are_rejected() {
        let cache = MemoryPartitionCache::new();
        let partitioner = ModelPartitioner::new(&cache);

        let a = toy(vec![conv("conv0", 1, 4), pool("pool0"), classifier(4)]);
        let b = toy(vec![conv("conv0", 1, 6), pool("pool0"), classifier(6)]);
        let a = split(&a).unwrap();
        let b = split(&b).unwrap();

        cache
            .store(&CacheKey::new("toy", Role::Head), &a.head.to_blob().unwrap())
            .unwrap();
        cache
            .store(&CacheKey::new("toy", Role::Tail), &b.tail.to_blob().unwrap())
            .unwrap();

        assert!(matches!(
            partitioner.cached("toy"),
            Err(MlErr::BoundaryMismatch { .. })
        ));
    }
}
