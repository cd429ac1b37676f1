//! Name → info tables for functions and constants.
//!
//! Both registries share one implementation, [`Registry`], parameterized over the entry type.
//! A registry is a cheap handle (`Clone` shares the same table); [`Registry::read_only`] hands
//! out a lookup-only view of the live table and [`Registry::snapshot`] a detached copy.

pub mod builtins;

use crate::error::RegistryError;
use ahash::AHashMap;
use std::borrow::Cow;
use std::fmt;
use std::sync::{Arc, RwLock};

pub use builtins::{register_default_constants, register_default_functions, RandomSource};

pub type NativeFn = Arc<dyn Fn(&[f64]) -> f64 + Send + Sync>;

/// A host function, tagged with its calling convention at registration time.
#[derive(Clone)]
pub enum Callable {
    /// Always called with exactly `arity` arguments.
    Fixed { arity: usize, func: NativeFn },
    /// Called with however many arguments the formula supplies.
    Variadic(NativeFn),
}

impl Callable {
    pub fn fixed(arity: usize, func: impl Fn(&[f64]) -> f64 + Send + Sync + 'static) -> Self {
        Callable::Fixed {
            arity,
            func: Arc::new(func),
        }
    }

    pub fn variadic(func: impl Fn(&[f64]) -> f64 + Send + Sync + 'static) -> Self {
        Callable::Variadic(Arc::new(func))
    }

    pub fn nullary(func: impl Fn() -> f64 + Send + Sync + 'static) -> Self {
        Self::fixed(0, move |_| func())
    }

    pub fn unary(func: impl Fn(f64) -> f64 + Send + Sync + 'static) -> Self {
        Self::fixed(1, move |args| func(args[0]))
    }

    pub fn binary(func: impl Fn(f64, f64) -> f64 + Send + Sync + 'static) -> Self {
        Self::fixed(2, move |args| func(args[0], args[1]))
    }

    /// `None` for variadic functions.
    pub fn arity(&self) -> Option<usize> {
        match self {
            Callable::Fixed { arity, .. } => Some(*arity),
            Callable::Variadic(_) => None,
        }
    }

    pub fn is_variadic(&self) -> bool {
        matches!(self, Callable::Variadic(_))
    }

    #[inline]
    pub fn call(&self, args: &[f64]) -> f64 {
        match self {
            Callable::Fixed { func, .. } | Callable::Variadic(func) => func(args),
        }
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callable::Fixed { arity, .. } => f.debug_struct("Fixed").field("arity", arity).finish(),
            Callable::Variadic(_) => f.write_str("Variadic"),
        }
    }
}

/// Entry stored in a [`Registry`].
pub trait RegistryEntry: Send + Sync + 'static {
    fn name(&self) -> &str;
    fn is_overwritable(&self) -> bool;
    /// Checks that `replacement` may take the place of `self`. Only called when `self` is
    /// overwritable.
    fn check_replacement(&self, replacement: &Self) -> Result<(), RegistryError>;
}

#[derive(Debug, Clone)]
pub struct FunctionInfo {
    name: String,
    callable: Callable,
    is_idempotent: bool,
    is_overwritable: bool,
}

impl FunctionInfo {
    pub fn new(
        name: impl Into<String>,
        callable: Callable,
        is_idempotent: bool,
        is_overwritable: bool,
    ) -> Self {
        Self {
            name: name.into(),
            callable,
            is_idempotent,
            is_overwritable,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn callable(&self) -> &Callable {
        &self.callable
    }

    pub fn arity(&self) -> Option<usize> {
        self.callable.arity()
    }

    pub fn is_variadic(&self) -> bool {
        self.callable.is_variadic()
    }

    pub fn is_idempotent(&self) -> bool {
        self.is_idempotent
    }

    pub fn is_overwritable(&self) -> bool {
        self.is_overwritable
    }
}

impl RegistryEntry for FunctionInfo {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_overwritable(&self) -> bool {
        self.is_overwritable
    }

    fn check_replacement(&self, replacement: &Self) -> Result<(), RegistryError> {
        match (self.callable.arity(), replacement.callable.arity()) {
            (Some(existing), Some(requested)) if existing != requested => {
                Err(RegistryError::ArityMismatch {
                    name: self.name.clone(),
                    existing,
                    requested,
                })
            }
            (Some(_), None) | (None, Some(_)) => Err(RegistryError::VariadicMismatch {
                name: self.name.clone(),
            }),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstantInfo {
    name: String,
    value: f64,
    is_overwritable: bool,
}

impl ConstantInfo {
    pub fn new(name: impl Into<String>, value: f64, is_overwritable: bool) -> Self {
        Self {
            name: name.into(),
            value,
            is_overwritable,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn is_overwritable(&self) -> bool {
        self.is_overwritable
    }
}

impl RegistryEntry for ConstantInfo {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_overwritable(&self) -> bool {
        self.is_overwritable
    }

    fn check_replacement(&self, _replacement: &Self) -> Result<(), RegistryError> {
        Ok(())
    }
}

pub type FunctionRegistry = Registry<FunctionInfo>;
pub type ConstantRegistry = Registry<ConstantInfo>;
pub type ReadOnlyFunctionRegistry = ReadOnlyRegistry<FunctionInfo>;
pub type ReadOnlyConstantRegistry = ReadOnlyRegistry<ConstantInfo>;

/// Thread-safe name → entry table.
///
/// The comparer (ordinal vs. ASCII/Unicode case-insensitive) is fixed at construction.
/// Registration holds the write lock for the whole check-then-insert sequence, so readers
/// never observe a half-applied overwrite.
pub struct Registry<E> {
    case_sensitive: bool,
    entries: Arc<RwLock<AHashMap<String, Arc<E>>>>,
}

impl<E> Clone for Registry<E> {
    fn clone(&self) -> Self {
        Self {
            case_sensitive: self.case_sensitive,
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<E: RegistryEntry> Registry<E> {
    pub fn new(case_sensitive: bool) -> Self {
        Self {
            case_sensitive,
            entries: Arc::new(RwLock::new(AHashMap::new())),
        }
    }

    pub fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    /// Register `entry`, returning `true` if it replaced an existing (overwritable) entry.
    pub fn register(&self, entry: E) -> Result<bool, RegistryError> {
        if !is_valid_name(entry.name()) {
            return Err(RegistryError::InvalidName {
                name: entry.name().to_string(),
            });
        }

        let key = normalize_key(entry.name(), self.case_sensitive).into_owned();
        let mut entries = self.entries.write().expect("registry lock poisoned");
        let replaced = match entries.get(&key) {
            Some(existing) => {
                if !existing.is_overwritable() {
                    log::warn!("refusing to overwrite protected name {:?}", entry.name());
                    return Err(RegistryError::NotOverwritable {
                        name: entry.name().to_string(),
                    });
                }
                if let Err(err) = existing.check_replacement(&entry) {
                    log::warn!("rejected registration of {:?}: {err}", entry.name());
                    return Err(err);
                }
                true
            }
            None => false,
        };
        log::trace!(
            "registered {:?} (overwritable: {}, replaced: {replaced})",
            entry.name(),
            entry.is_overwritable()
        );
        entries.insert(key, Arc::new(entry));
        Ok(replaced)
    }

    pub fn get(&self, name: &str) -> Option<Arc<E>> {
        let key = normalize_key(name, self.case_sensitive);
        self.entries
            .read()
            .expect("registry lock poisoned")
            .get(key.as_ref())
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        let key = normalize_key(name, self.case_sensitive);
        self.entries
            .read()
            .expect("registry lock poisoned")
            .contains_key(key.as_ref())
    }

    /// All entries, ordered by name.
    pub fn entries(&self) -> Vec<Arc<E>> {
        let mut out: Vec<Arc<E>> = self
            .entries
            .read()
            .expect("registry lock poisoned")
            .values()
            .cloned()
            .collect();
        out.sort_by(|a, b| a.name().cmp(b.name()));
        out
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lookup-only view of this (live) registry.
    pub fn read_only(&self) -> ReadOnlyRegistry<E> {
        ReadOnlyRegistry {
            inner: self.clone(),
        }
    }

    /// Independent copy of the current entries. Later registrations on either side are not
    /// visible to the other.
    pub fn snapshot(&self) -> Registry<E> {
        let entries = self.entries.read().expect("registry lock poisoned").clone();
        Registry {
            case_sensitive: self.case_sensitive,
            entries: Arc::new(RwLock::new(entries)),
        }
    }
}

impl<E: RegistryEntry> fmt::Debug for Registry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .entries()
            .iter()
            .map(|e| e.name().to_string())
            .collect();
        f.debug_struct("Registry")
            .field("case_sensitive", &self.case_sensitive)
            .field("names", &names)
            .finish()
    }
}

/// A registry handle that cannot register.
pub struct ReadOnlyRegistry<E> {
    inner: Registry<E>,
}

impl<E> Clone for ReadOnlyRegistry<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E: RegistryEntry> ReadOnlyRegistry<E> {
    pub fn get(&self, name: &str) -> Option<Arc<E>> {
        self.inner.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains(name)
    }

    pub fn entries(&self) -> Vec<Arc<E>> {
        self.inner.entries()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn is_case_sensitive(&self) -> bool {
        self.inner.case_sensitive
    }
}

impl<E: RegistryEntry> fmt::Debug for ReadOnlyRegistry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReadOnlyRegistry").field(&self.inner).finish()
    }
}

fn normalize_key(name: &str, case_sensitive: bool) -> Cow<'_, str> {
    if case_sensitive {
        Cow::Borrowed(name)
    } else {
        Cow::Owned(name.to_lowercase())
    }
}

/// Names must be lexable as a single identifier token.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn non_overwritable_entry_rejects_second_registration() {
        let registry = FunctionRegistry::new(false);
        registry
            .register(FunctionInfo::new("sin", Callable::unary(f64::sin), true, false))
            .unwrap();
        let err = registry
            .register(FunctionInfo::new("sin", Callable::unary(f64::cos), true, false))
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::NotOverwritable {
                name: "sin".to_string()
            }
        );
    }

    #[test]
    fn overwrite_must_keep_arity() {
        let registry = FunctionRegistry::new(true);
        registry
            .register(FunctionInfo::new("f", Callable::unary(|x| x), true, true))
            .unwrap();
        let err = registry
            .register(FunctionInfo::new("f", Callable::binary(|a, b| a + b), true, true))
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::ArityMismatch {
                name: "f".to_string(),
                existing: 1,
                requested: 2
            }
        );

        let err = registry
            .register(FunctionInfo::new(
                "f",
                Callable::variadic(|args| args.len() as f64),
                true,
                true,
            ))
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::VariadicMismatch {
                name: "f".to_string()
            }
        );

        let replaced = registry
            .register(FunctionInfo::new("f", Callable::unary(|x| x * 2.0), true, true))
            .unwrap();
        assert!(replaced);
        assert_eq!(registry.get("f").unwrap().callable().call(&[4.0]), 8.0);
    }

    #[test]
    fn case_insensitive_lookup() {
        let registry = ConstantRegistry::new(false);
        registry
            .register(ConstantInfo::new("Answer", 42.0, true))
            .unwrap();
        assert_eq!(registry.get("ANSWER").unwrap().value(), 42.0);
        assert_eq!(registry.get("answer").unwrap().name(), "Answer");

        let registry = ConstantRegistry::new(true);
        registry
            .register(ConstantInfo::new("Answer", 42.0, true))
            .unwrap();
        assert!(registry.get("answer").is_none());
    }

    #[test]
    fn read_only_view_tracks_live_registry_but_snapshot_does_not() {
        let registry = ConstantRegistry::new(true);
        let view = registry.read_only();
        let snapshot = registry.snapshot();

        registry.register(ConstantInfo::new("x", 1.0, true)).unwrap();
        assert_eq!(view.get("x").unwrap().value(), 1.0);
        assert!(!snapshot.contains("x"));
    }

    #[test]
    fn invalid_names_are_rejected() {
        let registry = ConstantRegistry::new(true);
        for name in ["", "1abc", "a-b", "a b"] {
            assert!(matches!(
                registry.register(ConstantInfo::new(name, 1.0, true)),
                Err(RegistryError::InvalidName { .. })
            ));
        }
    }

    #[test]
    fn entries_are_sorted_by_name() {
        let registry = ConstantRegistry::new(true);
        for name in ["b", "c", "a"] {
            registry.register(ConstantInfo::new(name, 0.0, true)).unwrap();
        }
        let names: Vec<String> = registry
            .entries()
            .iter()
            .map(|e| e.name().to_string())
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }
}
