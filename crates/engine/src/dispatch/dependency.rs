//! Dependency resolution seam used before NATIVE and SCRIPTED dispatch.

use std::collections::HashMap;

use anyhow::{Result, bail};

/// Runtime resources materialized for one dependency coordinate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedDependencies {
    pub coordinate: String,
    /// Resource locations, direct coordinate first.
    pub resources: Vec<String>,
}

/// Resolves a coordinate plus its transitive coordinates into runtime resources.
pub trait DependencyResolver: Send + Sync {
    fn resolve(&self, coordinate: &str, transitive: &[String]) -> Result<ResolvedDependencies>;
}

/// Resolver for deployments where every routine is linked in-process.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDependencies;

impl DependencyResolver for NoDependencies {
    fn resolve(&self, coordinate: &str, _transitive: &[String]) -> Result<ResolvedDependencies> {
        Ok(ResolvedDependencies {
            coordinate: coordinate.to_string(),
            resources: Vec::new(),
        })
    }
}

/// Resolver backed by a fixed coordinate to resource table.
#[derive(Debug, Clone, Default)]
pub struct StaticDependencyResolver {
    known: HashMap<String, String>,
}

impl StaticDependencyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_artifact(mut self, coordinate: impl Into<String>, resource: impl Into<String>) -> Self {
        self.known.insert(coordinate.into(), resource.into());
        self
    }
}

impl DependencyResolver for StaticDependencyResolver {
    fn resolve(&self, coordinate: &str, transitive: &[String]) -> Result<ResolvedDependencies> {
        let mut resources = Vec::with_capacity(transitive.len() + 1);
        for requested in std::iter::once(coordinate).chain(transitive.iter().map(String::as_str)) {
            let Some(resource) = self.known.get(requested) else {
                bail!("artifact '{requested}' is not available");
            };
            resources.push(resource.clone());
        }
        Ok(ResolvedDependencies {
            coordinate: coordinate.to_string(),
            resources,
        })
    }
}
