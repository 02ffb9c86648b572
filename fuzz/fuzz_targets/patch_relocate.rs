#![no_main]

use libfuzzer_sys::fuzz_target;
use smol_str::SmolStr;
use vigil_runtime::bytecode::{patch_before_line, CodeUnit, LineEntry};
use vigil_runtime::value::Value;

const MAX_CODE_BYTES: usize = 2048;

fn unit_from(bytes: &[u8], qualname: &str) -> CodeUnit {
    let code: Vec<u8> = bytes.iter().copied().take(MAX_CODE_BYTES).collect();
    // A line start every few units keeps the line table plausible
    // without constraining the instruction bytes.
    let lines = code
        .chunks(8)
        .enumerate()
        .map(|(i, _)| LineEntry {
            offset: i * 4,
            line: (i + 1) as u32,
        })
        .collect();
    CodeUnit {
        name: SmolStr::new_static("fuzz"),
        qualname: qualname.into(),
        file: SmolStr::new_static("fuzz.vg"),
        arg_count: 0,
        flags: 0,
        code,
        consts: vec![Value::Nil, Value::Int(1)],
        names: vec![SmolStr::new_static("a")],
        locals: vec![SmolStr::new_static("x")],
        lines,
    }
}

fuzz_target!(|data: &[u8]| {
    if data.len() < 4 {
        return;
    }
    let (head, tail) = data.split_at(data.len() / 2);
    let target = unit_from(head, "fuzz.target");
    let fragment = unit_from(tail, "fuzz.fragment");
    let before_line = u32::from(data[0] % 32);

    // Arbitrary bytes must produce Ok or a typed error, never a panic.
    // On success the result must still decode and must not invent
    // source lines.
    if let Ok(patched) = patch_before_line(&target, &fragment, before_line) {
        let instructions = patched
            .instructions()
            .expect("patched stream must decode");
        assert!(!instructions.is_empty());
        for entry in &patched.lines {
            assert!(target.lines.iter().any(|t| t.line == entry.line));
        }
    }
});
