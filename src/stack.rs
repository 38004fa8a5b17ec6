//! The diagram stack: named, scoped container of live diagrams.
//!
//! Diagrams are kept in insertion order and addressed by name with a linear
//! scan (the hot search depth in real scripts is tens of entries). The stack
//! doubles as a region allocator: [`DiagramStack::mark`] returns the current
//! top, and [`DiagramStack::restore`] destroys every diagram pushed after
//! it. Method scripts wrap their scratch diagrams ("r1".."r9") in a
//! mark/restore pair instead of erasing them one by one.

use crate::arith::Scalar;
use crate::diagram::Diagram;
use crate::error::{EngineError, Result};
use crate::symmetry::SymmetryRegistry;

/// Hard ceiling on live diagrams; deep sector scripts stay well below it.
pub const MAX_STACK_DEPTH: usize = 1024;

/// Opaque checkpoint returned by [`DiagramStack::mark`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StackPos(usize);

/// Ordered collection of live diagrams.
#[derive(Debug)]
pub struct DiagramStack<T: Scalar> {
    items: Vec<Diagram<T>>,
}

impl<T: Scalar> DiagramStack<T> {
    pub fn new() -> Self {
        DiagramStack { items: Vec::new() }
    }

    /// Number of live diagrams.
    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Append a diagram; overflow is a resource error.
    pub fn push(&mut self, dg: Diagram<T>) -> Result<()> {
        if self.items.len() >= MAX_STACK_DEPTH {
            return Err(EngineError::Resource(format!(
                "diagram stack overflow (limit {MAX_STACK_DEPTH})"
            )));
        }
        self.items.push(dg);
        Ok(())
    }

    /// Position of a diagram by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.items.iter().position(|d| d.name == name)
    }

    /// Find a diagram by name.
    pub fn find(&self, name: &str) -> Option<&Diagram<T>> {
        self.items.iter().find(|d| d.name == name)
    }

    /// Find a diagram by name, mutably.
    pub fn find_mut(&mut self, name: &str) -> Option<&mut Diagram<T>> {
        self.items.iter_mut().find(|d| d.name == name)
    }

    /// Replace the diagram named `name` with `dg`, destroying the old one.
    /// The position in the stack (and hence every mark) is preserved; the
    /// caller is responsible for setting `dg.name`.
    pub fn replace(&mut self, name: &str, dg: Diagram<T>) -> Result<()> {
        let idx = self
            .index_of(name)
            .ok_or_else(|| EngineError::no_such_diagram("replace", name))?;
        self.items[idx] = dg;
        Ok(())
    }

    /// Install a diagram under its own name: replace an existing entry or
    /// push a new one.
    pub fn install(&mut self, dg: Diagram<T>) -> Result<()> {
        match self.index_of(&dg.name) {
            Some(idx) => {
                self.items[idx] = dg;
                Ok(())
            }
            None => self.push(dg),
        }
    }

    /// Remove a diagram by name, releasing all its resources. Note that this
    /// shifts the positions of everything above it, so it must not be mixed
    /// with marks taken earlier.
    pub fn erase(&mut self, name: &str) -> Result<()> {
        let idx = self
            .index_of(name)
            .ok_or_else(|| EngineError::no_such_diagram("erase", name))?;
        self.items.remove(idx);
        Ok(())
    }

    /// Take a diagram out of the stack (for operations that rebuild it).
    pub fn take(&mut self, name: &str) -> Option<Diagram<T>> {
        let idx = self.index_of(name)?;
        Some(self.items.remove(idx))
    }

    /// Current top; diagrams pushed later are destroyed by
    /// [`DiagramStack::restore`].
    pub fn mark(&self) -> StackPos {
        StackPos(self.items.len())
    }

    /// Destroy every diagram pushed after `pos`.
    pub fn restore(&mut self, pos: StackPos) {
        self.items.truncate(pos.0);
    }

    /// Disjoint mutable/shared access to a target and a source diagram.
    /// `op` names the caller for error messages; the two names must differ.
    pub fn pair_mut(
        &mut self,
        target: &str,
        source: &str,
        op: &str,
    ) -> Result<(&mut Diagram<T>, &Diagram<T>)> {
        let ti = self
            .index_of(target)
            .ok_or_else(|| EngineError::no_such_diagram(op, target))?;
        let si = self
            .index_of(source)
            .ok_or_else(|| EngineError::no_such_diagram(op, source))?;
        if ti == si {
            return Err(EngineError::Configuration(format!(
                "{op}: target and source are the same diagram '{target}'"
            )));
        }
        if ti < si {
            let (lo, hi) = self.items.split_at_mut(si);
            Ok((&mut lo[ti], &hi[0]))
        } else {
            let (lo, hi) = self.items.split_at_mut(ti);
            Ok((&mut hi[0], &lo[si]))
        }
    }

    /// Iterate over live diagrams in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Diagram<T>> {
        self.items.iter()
    }

    /// Log a table of live diagrams with their patterns and footprints.
    pub fn log_contents(&self, symmetry: &SymmetryRegistry) {
        for (idx, dg) in self.items.iter().enumerate() {
            let (ram, disk) = dg.memory_used();
            let n_unique = dg
                .blocks
                .iter()
                .filter(|b| b.uniqueness.is_unique)
                .count();
            tracing::info!(
                idx,
                name = %dg.name,
                qparts = %dg.qparts_string(),
                valence = %dg.valence_string(),
                order = %dg.order_string(),
                irrep = %symmetry.irrep_name(dg.symmetry),
                blocks = dg.blocks.len(),
                unique = n_unique,
                ram_bytes = ram,
                disk_bytes = disk,
                "stack entry"
            );
        }
    }
}

impl<T: Scalar> Default for DiagramStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagram::tests::one_irrep_fixture;

    #[test]
    fn push_find_erase() {
        let fx = one_irrep_fixture(16);
        let mut stack: DiagramStack<f64> = DiagramStack::new();
        let dg = Diagram::template("a", "hp", "00", "00", "12", false, 0, &fx.env()).unwrap();
        stack.push(dg).unwrap();
        assert!(stack.find("a").is_some());
        assert!(stack.find("b").is_none());
        stack.erase("a").unwrap();
        assert!(stack.find("a").is_none());
        assert!(stack.erase("a").is_err());
    }

    #[test]
    fn mark_restore_reclaims_scratch() {
        let fx = one_irrep_fixture(16);
        let mut stack: DiagramStack<f64> = DiagramStack::new();
        stack
            .push(Diagram::template("keep", "hp", "00", "00", "12", false, 0, &fx.env()).unwrap())
            .unwrap();
        let pos = stack.mark();
        for name in ["r1", "r2", "r3"] {
            stack
                .push(
                    Diagram::template(name, "hp", "00", "00", "12", false, 0, &fx.env()).unwrap(),
                )
                .unwrap();
        }
        assert_eq!(stack.len(), 4);
        stack.restore(pos);
        assert_eq!(stack.len(), 1);
        assert!(stack.find("keep").is_some());
        assert!(stack.find("r2").is_none());
    }

    #[test]
    fn install_replaces_in_place() {
        let fx = one_irrep_fixture(16);
        let mut stack: DiagramStack<f64> = DiagramStack::new();
        stack
            .push(Diagram::template("a", "hp", "00", "00", "12", false, 0, &fx.env()).unwrap())
            .unwrap();
        stack
            .push(Diagram::template("b", "hp", "00", "00", "12", false, 0, &fx.env()).unwrap())
            .unwrap();
        let replacement =
            Diagram::template("a", "ph", "00", "00", "12", false, 0, &fx.env()).unwrap();
        stack.install(replacement).unwrap();
        assert_eq!(stack.len(), 2);
        assert_eq!(stack.index_of("a"), Some(0));
        assert_eq!(stack.find("a").unwrap().qparts_string(), "ph");
    }

    #[test]
    fn pair_mut_gives_disjoint_access() {
        let fx = one_irrep_fixture(16);
        let mut stack: DiagramStack<f64> = DiagramStack::new();
        stack
            .push(Diagram::template("a", "hp", "00", "00", "12", false, 0, &fx.env()).unwrap())
            .unwrap();
        stack
            .push(Diagram::template("b", "hp", "00", "00", "12", false, 0, &fx.env()).unwrap())
            .unwrap();
        let (ta, sb) = stack.pair_mut("a", "b", "test").unwrap();
        assert_eq!(ta.name, "a");
        assert_eq!(sb.name, "b");
        assert!(stack.pair_mut("a", "a", "test").is_err());
    }
}
