//! Lexical environments for the tree-walking evaluator
//!
//! An environment is a cheaply clonable handle; all clones alias the same
//! scope. Lookup walks the parent chain outward. A closure stored in the
//! environment it captures forms a reference-counted cycle, which is accepted
//! for the lifetime of a run.

use crate::value::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub struct Environment {
    inner: Arc<Mutex<EnvInner>>,
}

struct EnvInner {
    store: HashMap<String, Value>,
    parent: Option<Environment>,
}

impl Environment {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(EnvInner {
                store: HashMap::new(),
                parent: None,
            })),
        }
    }

    /// A child scope whose lookups fall through to `parent`.
    pub fn enclosed(parent: &Environment) -> Self {
        Self {
            inner: Arc::new(Mutex::new(EnvInner {
                store: HashMap::new(),
                parent: Some(parent.clone()),
            })),
        }
    }

    /// Resolve a name, walking outward through enclosing scopes.
    pub fn get(&self, name: &str) -> Option<Value> {
        let mut env = self.clone();
        loop {
            // Locks are taken one scope at a time so a child and its parent
            // are never held together.
            let parent = {
                let inner = env.inner.lock().expect("environment poisoned");
                if let Some(value) = inner.store.get(name) {
                    return Some(value.clone());
                }
                inner.parent.clone()
            };
            match parent {
                Some(p) => env = p,
                None => return None,
            }
        }
    }

    /// Bind a name in this scope, shadowing any outer binding.
    pub fn define(&self, name: impl Into<String>, value: Value) {
        self.inner
            .lock()
            .expect("environment poisoned")
            .store
            .insert(name.into(), value);
    }

    /// Rebind `name` in the nearest scope that already defines it. Returns
    /// false when no scope defines it.
    pub fn assign(&self, name: &str, value: Value) -> bool {
        let mut env = self.clone();
        loop {
            let parent = {
                let mut inner = env.inner.lock().expect("environment poisoned");
                if let Some(slot) = inner.store.get_mut(name) {
                    *slot = value;
                    return true;
                }
                inner.parent.clone()
            };
            match parent {
                Some(p) => env = p,
                None => return false,
            }
        }
    }

    /// Assignment as the language defines it: rebind in the nearest scope
    /// that already defines the name, else define in this scope.
    pub fn set(&self, name: &str, value: Value) {
        if !self.assign(name, value.clone()) {
            self.define(name, value);
        }
    }

    /// Whether this scope (not its parents) defines `name`.
    pub fn defines_locally(&self, name: &str) -> bool {
        self.inner
            .lock()
            .expect("environment poisoned")
            .store
            .contains_key(name)
    }

    /// Names bound directly in this scope, sorted.
    pub fn local_names(&self) -> Vec<String> {
        let inner = self.inner.lock().expect("environment poisoned");
        let mut names: Vec<String> = inner.store.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<environment>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_define_and_get() {
        let env = Environment::new();
        env.define("x", Value::Int(1));
        assert_eq!(env.get("x"), Some(Value::Int(1)));
        assert_eq!(env.get("y"), None);
    }

    #[test]
    fn test_lookup_walks_outward() {
        let outer = Environment::new();
        outer.define("x", Value::Int(1));
        let inner = Environment::enclosed(&outer);
        assert_eq!(inner.get("x"), Some(Value::Int(1)));
    }

    #[test]
    fn test_shadowing() {
        let outer = Environment::new();
        outer.define("x", Value::Int(1));
        let inner = Environment::enclosed(&outer);
        inner.define("x", Value::Int(2));
        assert_eq!(inner.get("x"), Some(Value::Int(2)));
        assert_eq!(outer.get("x"), Some(Value::Int(1)));
    }

    #[test]
    fn test_set_rebinds_nearest_defining_scope() {
        let outer = Environment::new();
        outer.define("x", Value::Int(1));
        let inner = Environment::enclosed(&outer);
        inner.set("x", Value::Int(5));
        assert_eq!(outer.get("x"), Some(Value::Int(5)));
        assert!(!inner.defines_locally("x"));
    }

    #[test]
    fn test_set_defines_in_current_scope_when_unbound() {
        let outer = Environment::new();
        let inner = Environment::enclosed(&outer);
        inner.set("fresh", Value::Int(3));
        assert!(inner.defines_locally("fresh"));
        assert_eq!(outer.get("fresh"), None);
    }

    #[test]
    fn test_clones_alias_the_same_scope() {
        let env = Environment::new();
        let alias = env.clone();
        alias.define("x", Value::Int(9));
        assert_eq!(env.get("x"), Some(Value::Int(9)));
    }
}
