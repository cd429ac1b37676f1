#![no_main]

use formula_calc::{CalculationEngine, EngineOptions, ExecutionMode, Variables};
use libfuzzer_sys::fuzz_target;

const MAX_EVAL_FORMULA_CHARS: usize = 1_024;
const MAX_INPUT_BYTES: usize = MAX_EVAL_FORMULA_CHARS * 4; // max UTF-8 bytes per char

fn engine(mode: ExecutionMode, optimizer_enabled: bool) -> Option<CalculationEngine> {
    CalculationEngine::new(EngineOptions {
        execution_mode: mode,
        optimizer_enabled,
        cache_enabled: false,
        random_seed: Some(0),
        ..EngineOptions::default()
    })
    .ok()
}

fuzz_target!(|data: &[u8]| {
    let data = if data.len() > MAX_INPUT_BYTES {
        &data[..MAX_INPUT_BYTES]
    } else {
        data
    };
    let input = String::from_utf8_lossy(data);
    if input.chars().count() > MAX_EVAL_FORMULA_CHARS || input.contains("random") {
        return;
    }

    let vars = Variables::from([
        ("x".to_string(), 1.5),
        ("y".to_string(), -2.0),
        ("z".to_string(), 0.0),
    ]);

    let (Some(interpreted), Some(compiled)) = (
        engine(ExecutionMode::Interpreted, false),
        engine(ExecutionMode::Compiled, false),
    ) else {
        return;
    };

    // Both backends must agree on every well-formed formula.
    let a = interpreted.calculate(&input, &vars);
    let b = compiled.calculate(&input, &vars);
    match (a, b) {
        (Ok(a), Ok(b)) => assert!(a == b || (a.is_nan() && b.is_nan()), "{input:?}: {a} != {b}"),
        (Err(_), Err(_)) => {}
        (a, b) => panic!("{input:?}: {a:?} vs {b:?}"),
    }

    if let Some(optimized) = engine(ExecutionMode::Compiled, true) {
        let _ = optimized.calculate(&input, &vars);
    }
});
