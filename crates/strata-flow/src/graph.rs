//! The asset graph.
//!
//! Construction validates the whole graph up front: repeated keys, upstreams
//! that were never declared and cycles are all rejected before anything
//! runs. Afterwards the graph is immutable and shared by every run.

use std::collections::{HashMap, HashSet};

use crate::asset::{AssetDefinition, AssetKey};
use crate::dag::Dag;
use crate::error::{Error, Result};

/// How far a selection is expanded before running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectionOptions {
    /// Also run every transitive upstream of the selection.
    pub upstream: bool,
    /// Also run every transitive downstream of the selection.
    pub downstream: bool,
}

impl SelectionOptions {
    /// Runs exactly the selected assets.
    #[must_use]
    pub const fn exact() -> Self {
        Self {
            upstream: false,
            downstream: false,
        }
    }

    /// Includes transitive upstreams.
    #[must_use]
    pub const fn with_upstream(mut self) -> Self {
        self.upstream = true;
        self
    }

    /// Includes transitive downstreams.
    #[must_use]
    pub const fn with_downstream(mut self) -> Self {
        self.downstream = true;
        self
    }
}

/// Collects asset definitions, then validates them into an [`AssetGraph`].
#[derive(Debug, Default)]
pub struct AssetGraphBuilder {
    assets: Vec<AssetDefinition>,
}

impl AssetGraphBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares an asset. Declaration order breaks ordering ties.
    #[must_use]
    pub fn asset(mut self, definition: AssetDefinition) -> Self {
        self.assets.push(definition);
        self
    }

    /// Validates and builds the graph.
    ///
    /// # Errors
    ///
    /// - `Error::DuplicateAsset` if two definitions share a key
    /// - `Error::DependencyNotFound` if an upstream was never declared
    /// - `Error::CycleDetected` if dependencies form a cycle
    pub fn build(self) -> Result<AssetGraph> {
        let mut dag = Dag::new();
        let mut index = HashMap::with_capacity(self.assets.len());
        for (i, asset) in self.assets.iter().enumerate() {
            if index.insert(asset.key.clone(), i).is_some() {
                return Err(Error::DuplicateAsset {
                    asset_key: asset.key.to_string(),
                });
            }
            dag.add_node(asset.key.clone());
        }

        for asset in &self.assets {
            let to = dag
                .index_of(&asset.key)
                .ok_or_else(|| Error::DagNodeNotFound {
                    node: asset.key.to_string(),
                })?;
            for upstream in &asset.upstream {
                let from = dag
                    .index_of(upstream)
                    .ok_or_else(|| Error::DependencyNotFound {
                        asset_key: asset.key.to_string(),
                        dependency: upstream.to_string(),
                    })?;
                dag.add_edge(from, to)?;
            }
        }

        let order = dag.toposort()?;
        tracing::debug!(assets = order.len(), "built asset graph");
        Ok(AssetGraph {
            assets: self.assets,
            index,
            dag,
            order,
        })
    }
}

/// A validated, acyclic graph of assets.
#[derive(Debug)]
pub struct AssetGraph {
    assets: Vec<AssetDefinition>,
    index: HashMap<AssetKey, usize>,
    dag: Dag<AssetKey>,
    order: Vec<AssetKey>,
}

impl AssetGraph {
    /// Returns a builder.
    #[must_use]
    pub fn builder() -> AssetGraphBuilder {
        AssetGraphBuilder::new()
    }

    /// Returns the number of assets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.dag.node_count()
    }

    /// Returns true if the graph has no assets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// Returns an asset by key.
    #[must_use]
    pub fn get(&self, key: &AssetKey) -> Option<&AssetDefinition> {
        self.index.get(key).map(|&i| &self.assets[i])
    }

    /// Returns an asset by key.
    ///
    /// # Errors
    ///
    /// Returns `Error::AssetNotFound` for an unknown key.
    pub fn require(&self, key: &AssetKey) -> Result<&AssetDefinition> {
        self.get(key).ok_or_else(|| Error::AssetNotFound {
            asset_key: key.to_string(),
        })
    }

    /// Returns every asset in declaration order.
    #[must_use]
    pub fn assets(&self) -> &[AssetDefinition] {
        &self.assets
    }

    /// Returns every key in topological order.
    #[must_use]
    pub fn topological_order(&self) -> &[AssetKey] {
        &self.order
    }

    /// Returns the direct downstreams of an asset in declaration order.
    ///
    /// # Errors
    ///
    /// Returns `Error::AssetNotFound` for an unknown key.
    pub fn downstream(&self, key: &AssetKey) -> Result<Vec<AssetKey>> {
        self.dag.downstream(self.node(key)?)
    }

    /// Returns the direct upstreams of an asset in declaration order.
    ///
    /// # Errors
    ///
    /// Returns `Error::AssetNotFound` for an unknown key.
    pub fn upstream(&self, key: &AssetKey) -> Result<Vec<AssetKey>> {
        self.dag.upstream(self.node(key)?)
    }

    /// Closes a selection under the requested expansion and returns the
    /// induced subgraph in topological order, ties broken by declaration
    /// order.
    ///
    /// # Errors
    ///
    /// Returns `Error::AssetNotFound` if the selection names an unknown key.
    pub fn close_selection(
        &self,
        selection: &[AssetKey],
        options: SelectionOptions,
    ) -> Result<Vec<AssetKey>> {
        let mut closed: HashSet<AssetKey> = HashSet::new();
        for key in selection {
            let node = self.node(key)?;
            closed.insert(key.clone());
            if options.upstream {
                closed.extend(self.dag.ancestors(node)?);
            }
            if options.downstream {
                closed.extend(self.dag.descendants(node)?);
            }
        }

        // Induced subgraph, nodes inserted in declaration order.
        let mut induced = Dag::new();
        for asset in self.assets.iter().filter(|a| closed.contains(&a.key)) {
            induced.add_node(asset.key.clone());
        }
        for asset in self.assets.iter().filter(|a| closed.contains(&a.key)) {
            for upstream in asset.upstream.iter().filter(|u| closed.contains(*u)) {
                let from = induced.add_node(upstream.clone());
                let to = induced.add_node(asset.key.clone());
                induced.add_edge(from, to)?;
            }
        }
        induced.toposort()
    }

    fn node(&self, key: &AssetKey) -> Result<petgraph::graph::NodeIndex> {
        self.dag.index_of(key).ok_or_else(|| Error::AssetNotFound {
            asset_key: key.to_string(),
        })
    }
}
