#![no_main]

use formula_calc::registry::{
    register_default_constants, register_default_functions, ConstantRegistry, FunctionRegistry,
    RandomSource,
};
use formula_calc::{lex, parse_formula, LocaleConfig, ParseOptions};
use libfuzzer_sys::fuzz_target;

/// Keep the harness bounded; deep inputs only slow the fuzzer down.
const MAX_FUZZ_FORMULA_CHARS: usize = 4_096;
const MAX_INPUT_BYTES: usize = MAX_FUZZ_FORMULA_CHARS * 4; // max UTF-8 bytes per char

fn truncate_to_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    let data = if data.len() > MAX_INPUT_BYTES {
        &data[..MAX_INPUT_BYTES]
    } else {
        data
    };

    // Accept arbitrary bytes as input; treat invalid UTF-8 lossy.
    let input = String::from_utf8_lossy(&data[1..]);
    let formula = truncate_to_chars(&input, MAX_FUZZ_FORMULA_CHARS);

    // Vary parse options to explore the locale and case-folding code paths.
    let selector = data[0];
    let opts = ParseOptions {
        locale: if selector & 0b1 == 0 {
            LocaleConfig::en_us()
        } else {
            LocaleConfig::de_de()
        },
        case_sensitive: selector & 0b10 != 0,
    };

    let functions = FunctionRegistry::new(opts.case_sensitive);
    let constants = ConstantRegistry::new(opts.case_sensitive);
    if register_default_functions(&functions, &RandomSource::from_seed(0)).is_err()
        || register_default_constants(&constants).is_err()
    {
        return;
    }
    let (functions, constants) = (functions.read_only(), constants.read_only());

    let _ = lex(formula, &opts.locale);
    if let Ok(tree) = parse_formula(formula, &opts, &functions, &constants) {
        // Printed trees use `.` decimals and `,` separators.
        let printed = tree.to_string();
        let _ = parse_formula(&printed, &ParseOptions::default(), &functions, &constants);
    }
});
