//! Variable sources for substitution.

use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasher;

/// Resolves a variable name to its value.
///
/// `None` means unset, which is different from set-to-empty.
pub trait Lookup {
    fn lookup(&self, name: &str) -> Option<String>;
}

impl<T: Lookup + ?Sized> Lookup for &T {
    fn lookup(&self, name: &str) -> Option<String> {
        (**self).lookup(name)
    }
}

impl<S: BuildHasher> Lookup for HashMap<String, String, S> {
    fn lookup(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

impl Lookup for BTreeMap<String, String> {
    fn lookup(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// Adapts a closure into a [`Lookup`].
pub struct LookupFn<F>(pub F);

impl<F> Lookup for LookupFn<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn lookup(&self, name: &str) -> Option<String> {
        (self.0)(name)
    }
}

/// Reads the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvLookup;

impl Lookup for EnvLookup {
    fn lookup(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// A lookup that never finds anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyLookup;

impl Lookup for EmptyLookup {
    fn lookup(&self, _name: &str) -> Option<String> {
        None
    }
}
