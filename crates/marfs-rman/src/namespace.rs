//! The namespace tree a run is dispatched over.

use marfs_hash::Ring;
use std::sync::Arc;

use crate::backend::Backends;

/// One namespace: its reference directories, collaborators, and children.
#[derive(Debug, Clone)]
pub struct Namespace {
    /// Name within the parent.
    pub name: String,
    /// Ring whose nodes are the namespace's reference directories.
    pub reftable: Arc<Ring>,
    /// Collaborators serving this namespace.
    pub backends: Backends,
    /// Child namespaces, in configuration order.
    pub subspaces: Vec<Namespace>,
}

impl Namespace {
    /// A namespace with no children.
    pub fn new(name: impl Into<String>, reftable: Arc<Ring>, backends: Backends) -> Self {
        Self {
            name: name.into(),
            reftable,
            backends,
            subspaces: Vec::new(),
        }
    }

    /// Adds a child namespace.
    pub fn with_subspace(mut self, child: Namespace) -> Self {
        self.subspaces.push(child);
        self
    }

    /// The reference directories to scan.
    pub fn ref_dirs(&self) -> Vec<String> {
        self.reftable.nodes().iter().map(|n| n.name.clone()).collect()
    }

    /// Every namespace in depth-first pre-order, paired with its path.
    ///
    /// The root's path is `/`; children append their name.
    pub fn depth_first(&self) -> Vec<(String, &Namespace)> {
        let mut out = Vec::new();
        self.collect("/".to_string(), &mut out);
        out
    }

    fn collect<'a>(&'a self, path: String, out: &mut Vec<(String, &'a Namespace)>) {
        let base = path.trim_end_matches('/').to_string();
        out.push((path, self));
        for child in &self.subspaces {
            child.collect(format!("{}/{}", base, child.name), out);
        }
    }

    /// Finds a namespace by path, or by name when no path matches.
    pub fn find(&self, target: &str) -> Option<(String, &Namespace)> {
        let order = self.depth_first();
        if let Some(hit) = order.iter().find(|(path, _)| path == target) {
            return Some(hit.clone());
        }
        order.into_iter().find(|(_, ns)| ns.name == target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{memory_backends, reftable};

    fn ns(name: &str) -> Namespace {
        let (backends, ..) = memory_backends(&["d"]).unwrap();
        Namespace::new(name, Arc::new(reftable(&["d"]).unwrap()), backends)
    }

    fn tree() -> Namespace {
        ns("root")
            .with_subspace(ns("a").with_subspace(ns("a1")).with_subspace(ns("a2")))
            .with_subspace(ns("b"))
    }

    #[test]
    fn test_depth_first_order() {
        let paths: Vec<String> = tree().depth_first().into_iter().map(|(p, _)| p).collect();
        assert_eq!(paths, vec!["/", "/a", "/a/a1", "/a/a2", "/b"]);
    }

    #[test]
    fn test_find() {
        let root = tree();
        assert_eq!(root.find("/a/a2").unwrap().1.name, "a2");
        assert_eq!(root.find("a1").unwrap().0, "/a/a1");
        assert_eq!(root.find("root").unwrap().0, "/");
        assert!(root.find("zzz").is_none());
    }

    #[test]
    fn test_ref_dirs() {
        let (backends, ..) = memory_backends(&["x"]).unwrap();
        let ns = Namespace::new("n", Arc::new(reftable(&["r0", "r1"]).unwrap()), backends);
        assert_eq!(ns.ref_dirs(), vec!["r0".to_string(), "r1".to_string()]);
    }
}
