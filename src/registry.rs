use std::collections::HashMap;

/// A name-to-factory table for one plugin family. Tables are assembled once
/// at startup and never mutated afterwards; registering the same name twice
/// is a programming error and panics before any traffic flows.
pub struct Registry<F> {
    family: &'static str,
    entries: HashMap<&'static str, F>,
}

impl<F: Copy> Registry<F> {
    pub fn new(family: &'static str) -> Self {
        Registry {
            family,
            entries: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: &'static str, factory: F) {
        if self.entries.insert(name, factory).is_some() {
            panic!("{} '{}' is already registered", self.family, name);
        }
    }

    pub fn get(&self, name: &str) -> crate::Result<F> {
        self.entries
            .get(name)
            .copied()
            .ok_or_else(|| format!("'{}' {} does not exist", name, self.family).into())
    }
}
