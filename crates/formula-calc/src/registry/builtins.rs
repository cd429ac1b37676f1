//! Default function and constant sets.

use super::{Callable, ConstantInfo, ConstantRegistry, FunctionInfo, FunctionRegistry};
use crate::error::RegistryError;
use crate::eval::COMPARISON_EPSILON;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex};

/// Shared random-number generator backing the `random()` function.
///
/// Passed in explicitly at registration so engines can be seeded deterministically.
#[derive(Clone, Debug)]
pub struct RandomSource {
    rng: Arc<Mutex<StdRng>>,
}

impl RandomSource {
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: Arc::new(Mutex::new(StdRng::from_entropy())),
        }
    }

    /// Uniform sample from `[0, 1)`.
    pub fn next_f64(&self) -> f64 {
        self.rng
            .lock()
            .expect("random source mutex poisoned")
            .gen::<f64>()
    }
}

type Builtin = fn(&[f64]) -> f64;

const FIXED: &[(&str, usize, Builtin)] = &[
    ("sin", 1, |a| a[0].sin()),
    ("cos", 1, |a| a[0].cos()),
    ("csc", 1, |a| 1.0 / a[0].sin()),
    ("sec", 1, |a| 1.0 / a[0].cos()),
    ("asin", 1, |a| a[0].asin()),
    ("acos", 1, |a| a[0].acos()),
    ("tan", 1, |a| a[0].tan()),
    ("cot", 1, |a| 1.0 / a[0].tan()),
    ("atan", 1, |a| a[0].atan()),
    ("acot", 1, |a| (1.0 / a[0]).atan()),
    ("loge", 1, |a| a[0].ln()),
    ("log10", 1, |a| a[0].log10()),
    ("logn", 2, |a| a[0].ln() / a[1].ln()),
    ("sqrt", 1, |a| a[0].sqrt()),
    ("abs", 1, |a| a[0].abs()),
    ("if", 3, |a| if a[0] != 0.0 { a[1] } else { a[2] }),
    ("ifless", 4, |a| if a[0] < a[1] { a[2] } else { a[3] }),
    ("ifmore", 4, |a| if a[0] > a[1] { a[2] } else { a[3] }),
    ("ifequal", 4, |a| {
        if (a[0] - a[1]).abs() < COMPARISON_EPSILON {
            a[2]
        } else {
            a[3]
        }
    }),
    ("ceiling", 1, |a| a[0].ceil()),
    ("floor", 1, |a| a[0].floor()),
    ("truncate", 1, |a| a[0].trunc()),
    // Midpoints round to the nearest even integer.
    ("round", 1, |a| a[0].round_ties_even()),
];

const VARIADIC: &[(&str, Builtin)] = &[
    ("max", |a| a.iter().copied().reduce(f64::max).unwrap_or(f64::NAN)),
    ("min", |a| a.iter().copied().reduce(f64::min).unwrap_or(f64::NAN)),
    ("avg", |a| {
        if a.is_empty() {
            f64::NAN
        } else {
            a.iter().sum::<f64>() / a.len() as f64
        }
    }),
    ("median", median),
    ("sum", |a| a.iter().sum()),
];

fn median(args: &[f64]) -> f64 {
    if args.is_empty() {
        return f64::NAN;
    }
    let mut sorted = args.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Seed the built-in function set. All entries are non-overwritable; everything except
/// `random` is idempotent.
pub fn register_default_functions(
    registry: &FunctionRegistry,
    random: &RandomSource,
) -> Result<(), RegistryError> {
    for &(name, arity, func) in FIXED {
        registry.register(FunctionInfo::new(
            name,
            Callable::fixed(arity, func),
            true,
            false,
        ))?;
    }
    for &(name, func) in VARIADIC {
        registry.register(FunctionInfo::new(
            name,
            Callable::variadic(func),
            true,
            false,
        ))?;
    }

    let random = random.clone();
    registry.register(FunctionInfo::new(
        "random",
        Callable::nullary(move || random.next_f64()),
        false,
        false,
    ))?;
    Ok(())
}

pub fn register_default_constants(registry: &ConstantRegistry) -> Result<(), RegistryError> {
    registry.register(ConstantInfo::new("e", std::f64::consts::E, false))?;
    registry.register(ConstantInfo::new("pi", std::f64::consts::PI, false))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(registry: &FunctionRegistry, name: &str, args: &[f64]) -> f64 {
        registry.get(name).unwrap().callable().call(args)
    }

    #[test]
    fn default_functions_behave() {
        let registry = FunctionRegistry::new(false);
        register_default_functions(&registry, &RandomSource::from_seed(7)).unwrap();

        assert_eq!(call(&registry, "max", &[1.0, 5.0, 3.0]), 5.0);
        assert_eq!(call(&registry, "min", &[1.0, 5.0, -3.0]), -3.0);
        assert_eq!(call(&registry, "avg", &[1.0, 2.0, 6.0]), 3.0);
        assert_eq!(call(&registry, "median", &[9.0, 1.0, 4.0, 2.0]), 3.0);
        assert_eq!(call(&registry, "sum", &[]), 0.0);
        assert_eq!(call(&registry, "if", &[0.0, 1.0, 2.0]), 2.0);
        assert_eq!(call(&registry, "ifless", &[1.0, 2.0, 3.0, 4.0]), 3.0);
        assert_eq!(call(&registry, "round", &[2.5]), 2.0);
        assert_eq!(call(&registry, "round", &[3.5]), 4.0);
        assert!((call(&registry, "logn", &[8.0, 2.0]) - 3.0).abs() < 1e-12);
        assert!(call(&registry, "max", &[]).is_nan());
    }

    #[test]
    fn random_is_not_idempotent_and_is_seeded() {
        let a = FunctionRegistry::new(false);
        let b = FunctionRegistry::new(false);
        register_default_functions(&a, &RandomSource::from_seed(42)).unwrap();
        register_default_functions(&b, &RandomSource::from_seed(42)).unwrap();

        let info = a.get("random").unwrap();
        assert!(!info.is_idempotent());
        let first = call(&a, "random", &[]);
        assert!((0.0..1.0).contains(&first));
        assert_eq!(first, call(&b, "random", &[]));
    }

    #[test]
    fn defaults_are_protected() {
        let constants = ConstantRegistry::new(false);
        register_default_constants(&constants).unwrap();
        assert!(constants
            .register(ConstantInfo::new("PI", 3.0, true))
            .is_err());
    }
}
