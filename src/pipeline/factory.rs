//! Element factory for creating elements by name.

use crate::element::Element;
use crate::elements::{CapsFilter, FakeSink, FakeSrc, Identity, Interleave, MemSrc, Queue};
use crate::error::{Error, Result};
use crate::pipeline::bin::Bin;
use crate::pipeline::parser::ParsedElement;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

/// Constructor of an element with the given instance name.
pub type ElementConstructor = fn(&str) -> Element;

/// Registry of element constructors.
///
/// Elements created without an explicit name are called after their
/// factory with a per-factory counter: `identity0`, `identity1`, ...
pub struct ElementFactory {
    constructors: HashMap<String, ElementConstructor>,
    counters: Mutex<HashMap<String, u32>>,
}

impl ElementFactory {
    /// Create a new factory with built-in elements registered.
    pub fn new() -> Self {
        let mut factory = Self {
            constructors: HashMap::new(),
            counters: Mutex::new(HashMap::new()),
        };

        factory.register("fakesrc", |name| Element::new(name, FakeSrc::default()));
        factory.register("fakesink", |name| Element::new(name, FakeSink::default()));
        factory.register("identity", |name| Element::new(name, Identity::default()));
        factory.register("capsfilter", |name| Element::new(name, CapsFilter::default()));
        factory.register("queue", |name| Element::new(name, Queue::default()));
        factory.register("memsrc", |name| Element::new(name, MemSrc::default()));
        factory.register("interleave", |name| Element::new(name, Interleave::default()));
        factory.register("bin", |name| Bin::new(name).element().clone());

        factory
    }

    /// Register a custom element constructor, replacing one of the same name.
    pub fn register(&mut self, name: &str, constructor: ElementConstructor) {
        self.constructors.insert(name.to_string(), constructor);
    }

    /// Create an element from factory `factory`, named `name` or auto-named.
    pub fn make(&self, factory: &str, name: Option<&str>) -> Result<Element> {
        let constructor = self
            .constructors
            .get(factory)
            .ok_or_else(|| Error::ElementNotFound(factory.to_string()))?;
        let name = match name {
            Some(name) => name.to_string(),
            None => {
                let mut counters = self.counters.lock();
                let counter = counters.entry(factory.to_string()).or_insert(0);
                let name = format!("{factory}{counter}");
                *counter += 1;
                name
            }
        };
        debug!(factory, element = %name, "element created");
        Ok(constructor(&name))
    }

    /// Create an element from a parsed description and apply its properties.
    pub fn create(&self, parsed: &ParsedElement) -> Result<Element> {
        let name = parsed.instance_name();
        let element = self.make(&parsed.factory, name.as_deref())?;
        for (key, value) in &parsed.properties {
            if key != "name" {
                element.set_property(key, value.clone())?;
            }
        }
        Ok(element)
    }

    /// Check if an element type is registered.
    pub fn is_registered(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// List all available element names.
    pub fn list_elements(&self) -> Vec<String> {
        let mut names: Vec<String> = self.constructors.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ElementFactory {
    fn default() -> Self {
        Self::new()
    }
}
