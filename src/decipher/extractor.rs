//! Binds catalog entries to a concrete script instance
//!
//! Each released script renames every identifier, but the routine bodies
//! still match the catalog shapes. The extractor locates the signature
//! sub-routine object and its invoking routine, binds the four canonical
//! operations to whatever keys they hide behind, and translates the ordered
//! call sequence into a [`SignatureProgram`]. On the n side it locates the
//! transform routine and compiles its operand array, alias statements and
//! indexed call list into an [`NDecodeProgram`].

use crate::decipher::catalog::{
    n_action_regex, n_alias_regex, n_array_elements_regex, n_routine_regex,
    signature_definitions_regex, signature_invocation_regex, signature_key_regex,
    table_switch_regex, NOpKind, SigOpKind, JS_CAPTURING_DQ, JS_CAPTURING_SQ, JS_VAR,
    N_PATTERNS, SIGNATURE_PATTERNS,
};
use crate::decipher::engine::{
    NAction, NDecodeProgram, NTransform, SigStep, SignatureProgram, SlotSpec,
};
use crate::decipher::interpreter::{AppendPlacement, SwitchMachine};
use crate::error::DescrambleError;
use regex::Regex;
use tracing::debug;

/// Compile the signature cipher call sequence out of the script
pub fn extract_signature_program(script: &str) -> Result<SignatureProgram, DescrambleError> {
    let defs = signature_definitions_regex()?.captures(script).ok_or_else(|| {
        DescrambleError::StructuralMismatch("signature sub-routine object not found".to_string())
    })?;
    let invocation = signature_invocation_regex()?.captures(script).ok_or_else(|| {
        DescrambleError::StructuralMismatch("signature invoking routine not found".to_string())
    })?;

    let obj_name = &defs[1];
    let obj_body = &defs[2];
    let call_body = &invocation[1];

    // bind each canonical operation to whichever key carries its body
    let mut bindings: Vec<(String, SigOpKind)> = Vec::new();
    for pattern in &SIGNATURE_PATTERNS {
        if let Some(cap) = signature_key_regex(pattern)?.captures(obj_body) {
            bindings.push((strip_quotes(&cap[1]).to_string(), pattern.kind));
        }
    }
    if bindings.len() < SIGNATURE_PATTERNS.len() {
        return Err(DescrambleError::StructuralMismatch(format!(
            "only {}/{} signature operations bound",
            bindings.len(),
            SIGNATURE_PATTERNS.len()
        )));
    }
    debug!(object = obj_name, "bound signature operations");

    let call_re = Regex::new(&format!(
        r"(?:a=)?{obj}(?:\.({JS_VAR})|\[{JS_CAPTURING_SQ}\]|\[{JS_CAPTURING_DQ}\])\(a,(\d+)\)",
        obj = regex::escape(obj_name),
    ))?;

    let mut steps = Vec::new();
    for cap in call_re.captures_iter(call_body) {
        let key = cap
            .get(1)
            .or_else(|| cap.get(2))
            .or_else(|| cap.get(3))
            .map(|m| m.as_str())
            .unwrap_or_default();
        let operand: i64 = cap[4].parse()?;

        let kind = bindings
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, kind)| *kind)
            .ok_or_else(|| {
                DescrambleError::StructuralMismatch(format!(
                    "call references unbound key {key:?}"
                ))
            })?;

        steps.push(match kind {
            SigOpKind::Reverse => SigStep::Reverse,
            SigOpKind::Slice => SigStep::Slice(operand),
            SigOpKind::Splice => SigStep::Splice(operand),
            SigOpKind::Swap => SigStep::Swap(operand),
        });
    }

    debug!(steps = steps.len(), "compiled signature program");
    Ok(SignatureProgram::new(steps))
}

/// Compile the n-parameter transform routine out of the script
pub fn extract_n_program(script: &str) -> Result<NDecodeProgram, DescrambleError> {
    let routine = n_routine_regex()?.captures(script).ok_or_else(|| {
        DescrambleError::StructuralMismatch("n transform routine not found".to_string())
    })?;

    let array_body = routine.name("array").map(|m| m.as_str()).unwrap_or_default();
    let alias_body = routine.name("aliases").map(|m| m.as_str()).unwrap_or_default();
    let action_body = routine.name("actions").map(|m| m.as_str()).unwrap_or_default();
    let fallback_prefix = routine
        .name("fb_sq")
        .or_else(|| routine.name("fb_dq"))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default();

    let mut slots = Vec::new();
    for cap in n_array_elements_regex()?.captures_iter(array_body) {
        slots.push(parse_slot(&cap)?);
    }

    // later aliases win; applied after the initial parse
    for cap in n_alias_regex()?.captures_iter(alias_body) {
        let index: usize = cap[1].parse()?;
        if index >= slots.len() {
            slots.resize(index + 1, SlotSpec::Null);
        }
        slots[index] = SlotSpec::SlotArray;
    }

    let mut actions = Vec::new();
    for cap in n_action_regex()?.captures_iter(action_body) {
        let target: usize = cap[1].parse()?;
        let arg_re = Regex::new(r"c\[(\d+)\]")?;
        let mut args = Vec::new();
        for raw in cap[2].split(',') {
            let arg = arg_re.captures(raw.trim()).ok_or_else(|| {
                DescrambleError::StructuralMismatch(format!(
                    "action argument is not a slot reference: {raw:?}"
                ))
            })?;
            args.push(arg[1].parse::<usize>()?);
        }
        actions.push(NAction { target, args });
    }

    debug!(
        slots = slots.len(),
        actions = actions.len(),
        "compiled n decode program"
    );
    Ok(NDecodeProgram {
        slots,
        actions,
        fallback_prefix,
    })
}

/// Classify one operand array element against the catalog
fn parse_slot(cap: &regex::Captures<'_>) -> Result<SlotSpec, DescrambleError> {
    for (i, pattern) in N_PATTERNS.iter().enumerate() {
        let name = format!("f{i}");
        if let Some(m) = cap.name(&name) {
            return Ok(SlotSpec::Transform(compile_transform(pattern.kind, m.as_str())?));
        }
    }
    if let Some(m) = cap.name("num") {
        return Ok(SlotSpec::Int(m.as_str().parse()?));
    }
    if let Some(m) = cap.name("var") {
        // identifiers are fixed by the routine shape: a is the input string,
        // b the character array, c the operand array itself. Anything else
        // is left unusable and trips the fallback path at apply time.
        return Ok(match m.as_str() {
            "c" => SlotSpec::SlotArray,
            "b" => SlotSpec::CharArray,
            "a" => SlotSpec::Input,
            _ => SlotSpec::Null,
        });
    }
    if let Some(m) = cap.name("sq").or_else(|| cap.name("dq")) {
        return Ok(SlotSpec::Text(m.as_str().to_string()));
    }
    Err(DescrambleError::StructuralMismatch(
        "unclassifiable operand array element".to_string(),
    ))
}

/// Map a matched catalog entry to its executable transform; table ciphers
/// defer to the statement interpreter.
fn compile_transform(kind: NOpKind, body: &str) -> Result<NTransform, DescrambleError> {
    Ok(match kind {
        NOpKind::RemoveIndex => NTransform::RemoveIndex,
        NOpKind::SwapFront | NOpKind::SwapSplice => NTransform::SwapFront,
        NOpKind::Append => NTransform::Append,
        NOpKind::ReverseLoop | NOpKind::Reverse => NTransform::Reverse,
        NOpKind::RotateSplice | NOpKind::RotatePop => NTransform::RotateRight,
        NOpKind::TableBraced | NOpKind::TableBare => {
            let switch_body = table_switch_regex(kind)?
                .captures(body)
                .and_then(|c| c.get(1).map(|m| m.as_str().to_string()))
                .ok_or_else(|| {
                    DescrambleError::StructuralMismatch(
                        "table cipher switch body did not re-match".to_string(),
                    )
                })?;
            let placement = match kind {
                NOpKind::TableBraced => AppendPlacement::AfterSwitch,
                _ => AppendPlacement::InsideCases,
            };
            let machine = SwitchMachine::parse(&switch_body)?;
            NTransform::Table(machine.simulate(placement))
        }
    })
}

fn strip_quotes(key: &str) -> &str {
    key.strip_prefix('\'')
        .and_then(|k| k.strip_suffix('\''))
        .or_else(|| key.strip_prefix('"').and_then(|k| k.strip_suffix('"')))
        .unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decipher::testscript::{synthetic_script, SIG_CALLS_DEFAULT};

    #[test]
    fn binds_signature_operations_under_arbitrary_keys() {
        let script = synthetic_script(SIG_CALLS_DEFAULT);
        let program = extract_signature_program(&script).unwrap();
        assert_eq!(
            program.steps(),
            &[
                SigStep::Swap(3),
                SigStep::Reverse,
                SigStep::Splice(2),
                SigStep::Slice(1),
            ]
        );
    }

    #[test]
    fn missing_invoking_routine_is_a_structural_mismatch() {
        let script = synthetic_script(SIG_CALLS_DEFAULT).replace("a.join", "a.concat");
        let err = extract_signature_program(&script).unwrap_err();
        assert!(err.is_structural(), "got {err:?}");
    }

    #[test]
    fn unbound_key_in_call_sequence_is_a_structural_mismatch() {
        // reference a key the object never defines
        let script = synthetic_script("Qz.xx(a,1);");
        let err = extract_signature_program(&script).unwrap_err();
        assert!(err.is_structural());
    }

    #[test]
    fn unrecognized_operation_body_fails_compilation() {
        // mangle the reverse body so no catalog shape matches it
        let script = synthetic_script(SIG_CALLS_DEFAULT).replace("a.reverse()", "a.rotate()");
        let err = extract_signature_program(&script).unwrap_err();
        assert!(err.is_structural());
    }

    #[test]
    fn n_routine_slots_cover_all_element_kinds() {
        let script = synthetic_script(SIG_CALLS_DEFAULT);
        let program = extract_n_program(&script).unwrap();
        assert_eq!(program.fallback_prefix, "fallback_marker_");
        assert!(matches!(program.slots[0], SlotSpec::CharArray));
        assert!(matches!(program.slots[1], SlotSpec::Int(-3)));
        assert!(matches!(program.slots[2], SlotSpec::Transform(NTransform::Reverse)));
        // slot 5 was declared null but overridden by a c-alias statement
        assert!(matches!(program.slots[5], SlotSpec::SlotArray));
        assert!(matches!(program.slots[6], SlotSpec::Text(ref s) if s == "seed"));
    }

    #[test]
    fn action_list_preserves_source_order() {
        let script = synthetic_script(SIG_CALLS_DEFAULT);
        let program = extract_n_program(&script).unwrap();
        assert_eq!(program.actions.len(), 3);
        assert_eq!(program.actions[0].target, 2);
        assert_eq!(program.actions[0].args, vec![0]);
    }

    #[test]
    fn script_without_n_routine_is_a_structural_mismatch() {
        let err = extract_n_program("var x = 1;").unwrap_err();
        assert!(err.is_structural());
    }
}
