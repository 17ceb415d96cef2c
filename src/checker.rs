//! Static dependency graph validation
//!
//! [`DependencyGraphValidator`] walks every registration transitively
//! before anything is instantiated. It builds one reference tree per root
//! registration and reports the first missing registration or cycle.

use crate::constructor::{ParamKind, select_constructor};
use crate::descriptor::ServiceDescriptor;
use crate::{DiError, Result, ServiceKey};
use ahash::RandomState;
use std::any::TypeId;
use std::collections::HashMap;

#[cfg(feature = "logging")]
use tracing::debug;

/// One contract's position in a reference tree
#[derive(Debug, Clone)]
struct ReferenceNode {
    parent: Option<usize>,
    key: ServiceKey,
    children: Vec<usize>,
}

/// Detects missing references and circular references across registrations.
///
/// Registrations with a pre-built instance or a factory are leaves: their
/// dependencies are unknown. Configuration carriers are skipped entirely.
pub struct DependencyGraphValidator<'a> {
    descriptors: &'a [ServiceDescriptor],
    by_contract: HashMap<TypeId, usize, RandomState>,
    nodes: Vec<ReferenceNode>,
    roots: Vec<usize>,
}

impl<'a> DependencyGraphValidator<'a> {
    /// Create a validator over a set of registrations
    pub fn new(descriptors: &'a [ServiceDescriptor]) -> Self {
        let by_contract = descriptors
            .iter()
            .enumerate()
            .map(|(index, d)| (d.contract().id(), index))
            .collect();
        Self {
            descriptors,
            by_contract,
            nodes: Vec::new(),
            roots: Vec::new(),
        }
    }

    /// Build every reference tree, then re-walk each one for cycles.
    pub fn validate(&mut self) -> Result<()> {
        for descriptor in self.descriptors {
            if descriptor.is_options() {
                continue;
            }
            let root = self.create_tree(descriptor, None)?;
            self.roots.push(root);
        }

        for &root in &self.roots {
            self.check_circularity(root)?;
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "service_container",
            roots = self.roots.len(),
            nodes = self.nodes.len(),
            "Validated service graph"
        );

        Ok(())
    }

    /// Total nodes across all trees built so far
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn create_tree(&mut self, descriptor: &ServiceDescriptor, parent: Option<usize>) -> Result<usize> {
        let node = self.push_node(parent, descriptor.contract());
        if !descriptor.needs_constructor() {
            return Ok(node);
        }

        let metadata = descriptor.metadata.as_ref().ok_or(DiError::NoPublicConstructor {
            service: descriptor.contract().name(),
            implementation: descriptor.implementation().name(),
        })?;
        let selected = select_constructor(descriptor.contract(), metadata, |key| {
            self.by_contract.contains_key(&key.id())
        })?
        .and_then(|index| metadata.constructors.get(index))
        .ok_or(DiError::NoUsableConstructor {
            service: descriptor.contract().name(),
            implementation: descriptor.implementation().name(),
        })?;

        for param in &selected.params {
            let child = match param.kind {
                ParamKind::Scope => continue,
                ParamKind::Options { .. } => match self.by_contract.get(&param.key.id()) {
                    Some(&index) => index,
                    // Satisfied by the options source at resolution time
                    None => continue,
                },
                ParamKind::Service | ParamKind::Scalar => *self
                    .by_contract
                    .get(&param.key.id())
                    .ok_or(DiError::MissingReference {
                        service: descriptor.implementation().name(),
                        missing: param.key.name(),
                    })?,
            };

            self.check_parent_circularity(node, param.key, node)?;
            let descriptors = self.descriptors;
            let child_node = self.create_tree(&descriptors[child], Some(node))?;
            self.nodes[node].children.push(child_node);
        }

        Ok(node)
    }

    fn push_node(&mut self, parent: Option<usize>, key: ServiceKey) -> usize {
        self.nodes.push(ReferenceNode {
            parent,
            key,
            children: Vec::new(),
        });
        self.nodes.len() - 1
    }

    fn check_circularity(&self, node: usize) -> Result<()> {
        let item = &self.nodes[node];
        if let Some(parent) = item.parent {
            self.check_parent_circularity(parent, item.key, node)?;
        }
        for &child in &item.children {
            self.check_parent_circularity(node, self.nodes[child].key, child)?;
            self.check_circularity(child)?;
        }
        Ok(())
    }

    /// Fail if `key` appears at `current` or any of its ancestors
    fn check_parent_circularity(&self, current: usize, key: ServiceKey, entrypoint: usize) -> Result<()> {
        let mut cursor = Some(current);
        while let Some(index) = cursor {
            let node = &self.nodes[index];
            if node.key == key {
                return Err(DiError::CircularReference {
                    service: self.nodes[entrypoint].key.name(),
                    circular: key.name(),
                });
            }
            cursor = node.parent;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Constructor, Lifetime, Options, Scope};
    use std::sync::Arc;

    struct A;
    struct B;
    struct C;

    fn descriptor<T: Send + Sync + 'static>(constructors: Vec<Constructor<T>>) -> ServiceDescriptor {
        ServiceDescriptor::from_constructors::<T, T>(Lifetime::Transient, constructors, 0)
    }

    fn check(descriptors: &[ServiceDescriptor]) -> Result<()> {
        DependencyGraphValidator::new(descriptors).validate()
    }

    #[test]
    fn test_missing_reference_names_dependency() {
        let descriptors = vec![descriptor(vec![Constructor::new(|_: Arc<B>| A)])];
        let err = check(&descriptors).err().unwrap();
        assert_eq!(
            err,
            DiError::MissingReference {
                service: std::any::type_name::<A>(),
                missing: std::any::type_name::<B>(),
            }
        );
    }

    #[test]
    fn test_direct_cycle() {
        let descriptors = vec![
            descriptor(vec![Constructor::new(|_: Arc<B>| A)]),
            descriptor(vec![Constructor::new(|_: Arc<A>| B)]),
        ];
        assert!(matches!(
            check(&descriptors).err().unwrap(),
            DiError::CircularReference { .. }
        ));
    }

    #[test]
    fn test_self_reference() {
        let descriptors = vec![descriptor(vec![Constructor::new(|_: Arc<A>| A)])];
        assert!(matches!(
            check(&descriptors).err().unwrap(),
            DiError::CircularReference { .. }
        ));
    }

    #[test]
    fn test_indirect_cycle() {
        let descriptors = vec![
            descriptor(vec![Constructor::new(|_: Arc<B>| A)]),
            descriptor(vec![Constructor::new(|_: Arc<C>| B)]),
            descriptor(vec![Constructor::new(|_: Arc<A>| C)]),
        ];
        assert!(matches!(
            check(&descriptors).err().unwrap(),
            DiError::CircularReference { .. }
        ));
    }

    #[test]
    fn test_shared_dependency_is_not_a_cycle() {
        let descriptors = vec![
            descriptor(vec![Constructor::new(|_: (Arc<B>, Arc<C>)| A)]),
            descriptor(vec![Constructor::new(|_: Arc<C>| B)]),
            descriptor(vec![Constructor::new(|_: ()| C)]),
        ];
        let mut validator = DependencyGraphValidator::new(&descriptors);
        validator.validate().unwrap();
        // A(B(C), C) + B(C) + C
        assert_eq!(validator.node_count(), 7);
    }

    #[test]
    fn test_instances_and_factories_are_leaves() {
        let descriptors = vec![
            descriptor(vec![Constructor::new(|_: Arc<B>| A)]),
            ServiceDescriptor::instance::<B>(crate::storage::erase(Arc::new(B)), 1),
        ];
        check(&descriptors).unwrap();
    }

    #[test]
    fn test_scope_and_unregistered_options_are_skipped() {
        #[derive(Default)]
        struct Settings;

        let descriptors = vec![descriptor(vec![Constructor::new(
            |_: (Option<Scope>, Options<Settings>)| A,
        )])];
        check(&descriptors).unwrap();
    }

    #[test]
    fn test_no_constructors() {
        let descriptors = vec![descriptor::<A>(vec![])];
        assert!(matches!(
            check(&descriptors).err().unwrap(),
            DiError::NoPublicConstructor { .. }
        ));
    }
}
