//! The calculation engine: registries, parser, optimizer, backend and formula cache wired
//! together behind `calculate` / `build`.

use crate::bytecode::BytecodeExecutor;
use crate::cache::FormulaCache;
use crate::error::{CalcError, EvalError};
use crate::eval::{CompiledFormula, Executor, Interpreter, Variables};
use crate::optimizer::Optimizer;
use crate::parser::parse_formula;
use crate::registry::{
    register_default_constants, register_default_functions, Callable, ConstantInfo,
    ConstantRegistry, FunctionInfo, FunctionRegistry, RandomSource,
};
use crate::{LocaleConfig, Operation, ParseOptions};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Which backend evaluates built formulas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Walk the operation tree on every evaluation.
    Interpreted,
    /// Lower the tree to bytecode once and run it on a small stack VM.
    #[default]
    Compiled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    pub locale: LocaleConfig,
    pub execution_mode: ExecutionMode,
    pub cache_enabled: bool,
    /// Number of formulas kept before eviction kicks in (default: 500).
    pub cache_maximum_size: usize,
    /// Number of least recently used formulas dropped per eviction (default: 50).
    pub cache_reduction_size: usize,
    pub optimizer_enabled: bool,
    pub case_sensitive: bool,
    /// Seed the trigonometric, rounding and statistical function set.
    pub default_functions: bool,
    /// Seed `e` and `pi`.
    pub default_constants: bool,
    /// Seed for `random()`. `None` seeds from system entropy.
    pub random_seed: Option<u64>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            locale: LocaleConfig::en_us(),
            execution_mode: ExecutionMode::Compiled,
            cache_enabled: true,
            cache_maximum_size: 500,
            cache_reduction_size: 50,
            optimizer_enabled: true,
            case_sensitive: false,
            default_functions: true,
            default_constants: true,
            random_seed: None,
        }
    }
}

impl EngineOptions {
    pub fn validate(&self) -> Result<(), CalcError> {
        if self.cache_maximum_size == 0 {
            return Err(CalcError::InvalidOptions(
                "cache_maximum_size must be greater than zero".to_string(),
            ));
        }
        if self.cache_reduction_size == 0 || self.cache_reduction_size > self.cache_maximum_size
        {
            return Err(CalcError::InvalidOptions(format!(
                "cache_reduction_size must be between 1 and {}",
                self.cache_maximum_size
            )));
        }
        if self.locale.decimal_separator == self.locale.argument_separator {
            return Err(CalcError::InvalidOptions(format!(
                "decimal and argument separator are both {:?}",
                self.locale.decimal_separator
            )));
        }
        Ok(())
    }

    fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            locale: self.locale,
            case_sensitive: self.case_sensitive,
        }
    }
}

/// A built formula, ready to evaluate against variable bindings.
///
/// Cloning is cheap and clones share the compiled evaluator.
#[derive(Clone)]
pub struct Formula {
    evaluator: CompiledFormula,
    case_sensitive: bool,
}

impl Formula {
    pub fn evaluate(&self, variables: &Variables) -> Result<f64, EvalError> {
        if self.case_sensitive {
            (self.evaluator)(variables)
        } else {
            (self.evaluator)(&lowercase_keys(variables))
        }
    }

    /// Evaluate with bindings whose names are already normalized.
    pub(crate) fn evaluate_normalized(&self, variables: &Variables) -> Result<f64, EvalError> {
        (self.evaluator)(variables)
    }
}

impl fmt::Debug for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Formula")
            .field("case_sensitive", &self.case_sensitive)
            .finish_non_exhaustive()
    }
}

pub struct CalculationEngine {
    options: EngineOptions,
    functions: FunctionRegistry,
    constants: ConstantRegistry,
    cache: Option<FormulaCache<Formula>>,
    executor: Box<dyn Executor>,
    optimizer: Optimizer,
}

impl CalculationEngine {
    pub fn new(options: EngineOptions) -> Result<Self, CalcError> {
        let random = match options.random_seed {
            Some(seed) => RandomSource::from_seed(seed),
            None => RandomSource::from_entropy(),
        };
        Self::with_random_source(options, random)
    }

    /// Like [`CalculationEngine::new`], drawing `random()` from `random` instead of
    /// `options.random_seed`.
    pub fn with_random_source(
        options: EngineOptions,
        random: RandomSource,
    ) -> Result<Self, CalcError> {
        options.validate()?;

        let functions = FunctionRegistry::new(options.case_sensitive);
        let constants = ConstantRegistry::new(options.case_sensitive);
        if options.default_functions {
            register_default_functions(&functions, &random)?;
        }
        if options.default_constants {
            register_default_constants(&constants)?;
        }

        let cache = options
            .cache_enabled
            .then(|| FormulaCache::new(options.cache_maximum_size, options.cache_reduction_size));
        let executor: Box<dyn Executor> = match options.execution_mode {
            ExecutionMode::Interpreted => Box::new(Interpreter),
            ExecutionMode::Compiled => Box::new(BytecodeExecutor),
        };

        debug!(
            "calculation engine ready: mode={:?} cache={} optimizer={} case_sensitive={} functions={} constants={}",
            options.execution_mode,
            options.cache_enabled,
            options.optimizer_enabled,
            options.case_sensitive,
            functions.len(),
            constants.len(),
        );

        Ok(Self {
            options,
            functions,
            constants,
            cache,
            executor,
            optimizer: Optimizer::new(),
        })
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Evaluate `formula` once against `variables`.
    ///
    /// Variable names may not shadow a function or a protected constant. Registered constants
    /// are visible to the formula without being passed in.
    pub fn calculate(&self, formula: &str, variables: &Variables) -> Result<f64, CalcError> {
        if formula.trim().is_empty() {
            return Err(CalcError::EmptyFormula);
        }

        let normalized;
        let variables = if self.options.case_sensitive {
            variables
        } else {
            normalized = lowercase_keys(variables);
            &normalized
        };
        self.verify_variable_names(variables)?;

        let formula = self.build(formula)?;
        Ok(formula.evaluate_normalized(variables)?)
    }

    /// Build (or fetch from the cache) a reusable evaluator for `formula`.
    pub fn build(&self, formula: &str) -> Result<Formula, CalcError> {
        if formula.trim().is_empty() {
            return Err(CalcError::EmptyFormula);
        }
        match &self.cache {
            Some(cache) => {
                cache.get_or_create(formula, || self.create_formula(formula, &self.constants))
            }
            None => self.create_formula(formula, &self.constants),
        }
    }

    /// Build `formula` with `constants` inlined as literals.
    ///
    /// The entries shadow overwritable registered constants for this formula only. The cache key
    /// is `formula@name:value,...` in ascending name order.
    pub fn build_with_constants(
        &self,
        formula: &str,
        constants: &BTreeMap<String, f64>,
    ) -> Result<Formula, CalcError> {
        if constants.is_empty() {
            return self.build(formula);
        }
        if formula.trim().is_empty() {
            return Err(CalcError::EmptyFormula);
        }

        let create = || -> Result<Formula, CalcError> {
            let local = self.constants.snapshot();
            for (name, value) in constants {
                local.register(ConstantInfo::new(name.as_str(), *value, true))?;
            }
            self.create_formula(formula, &local)
        };
        match &self.cache {
            Some(cache) => cache.get_or_create(&constants_cache_key(formula, constants), create),
            None => create(),
        }
    }

    /// Parse `formula` into the tree the engine would evaluate, optimized if the optimizer is
    /// enabled.
    pub fn parse(&self, formula: &str) -> Result<Operation, CalcError> {
        self.parse_with(formula, &self.constants)
    }

    /// Register a function. Replacing an overwritable function keeps its arity and kind.
    pub fn add_function(
        &self,
        name: &str,
        callable: Callable,
        is_idempotent: bool,
        is_overwritable: bool,
    ) -> Result<(), CalcError> {
        let replaced = self.functions.register(FunctionInfo::new(
            name,
            callable,
            is_idempotent,
            is_overwritable,
        ))?;
        // Cached formulas may have parsed this name as a variable. Replacements are picked up
        // per call.
        if !replaced {
            self.clear_cache();
        }
        Ok(())
    }

    /// Register an overwritable constant.
    pub fn add_constant(&self, name: &str, value: f64) -> Result<(), CalcError> {
        self.constants
            .register(ConstantInfo::new(name, value, true))?;
        // Constants are inlined while building, so every cached formula may be stale.
        self.clear_cache();
        Ok(())
    }

    pub fn function_exists(&self, name: &str) -> bool {
        self.functions.contains(name)
    }

    pub fn constant_exists(&self, name: &str) -> bool {
        self.constants.contains(name)
    }

    /// Registered functions, ordered by name.
    pub fn functions(&self) -> Vec<Arc<FunctionInfo>> {
        self.functions.entries()
    }

    /// Registered constants, ordered by name.
    pub fn constants(&self) -> Vec<Arc<ConstantInfo>> {
        self.constants.entries()
    }

    /// The formula cache, if caching is enabled.
    pub fn cache(&self) -> Option<&FormulaCache<Formula>> {
        self.cache.as_ref()
    }

    fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }

    fn verify_variable_names(&self, variables: &Variables) -> Result<(), CalcError> {
        for name in variables.keys() {
            if let Some(constant) = self.constants.get(name) {
                if !constant.is_overwritable() {
                    return Err(CalcError::ReservedConstantName { name: name.clone() });
                }
            }
            if self.functions.contains(name) {
                return Err(CalcError::FunctionNameAsVariable { name: name.clone() });
            }
        }
        Ok(())
    }

    fn parse_with(
        &self,
        formula: &str,
        constants: &ConstantRegistry,
    ) -> Result<Operation, CalcError> {
        let functions = self.functions.read_only();
        let constants = constants.read_only();
        let tree = parse_formula(
            formula,
            &self.options.parse_options(),
            &functions,
            &constants,
        )?;
        if !self.options.optimizer_enabled {
            return Ok(tree);
        }
        Ok(self.optimizer.optimize(tree, &functions, &constants)?)
    }

    fn create_formula(
        &self,
        formula: &str,
        constants: &ConstantRegistry,
    ) -> Result<Formula, CalcError> {
        let tree = self.parse_with(formula, constants)?;
        debug!("built `{formula}` as `{tree}`");
        let evaluator =
            self.executor
                .compile(tree, self.functions.read_only(), constants.read_only());
        Ok(Formula {
            evaluator,
            case_sensitive: self.options.case_sensitive,
        })
    }
}

impl fmt::Debug for CalculationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CalculationEngine")
            .field("options", &self.options)
            .field("functions", &self.functions.len())
            .field("constants", &self.constants.len())
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

fn lowercase_keys(variables: &Variables) -> Variables {
    variables
        .iter()
        .map(|(name, value)| (name.to_lowercase(), *value))
        .collect()
}

fn constants_cache_key(formula: &str, constants: &BTreeMap<String, f64>) -> String {
    let pairs: Vec<String> = constants
        .iter()
        .map(|(name, value)| format!("{name}:{value}"))
        .collect();
    format!("{formula}@{}", pairs.join(","))
}
