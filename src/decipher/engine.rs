//! Compiled transformation programs and their execution
//!
//! The engine ties the catalog, the extractor and the statement interpreter
//! together: [`CatalogState::compile`] turns a raw script body into an
//! immutable pair of programs, and the decode methods replay those programs
//! over protected URL components. Decoding against a fixed catalog is
//! deterministic and side-effect free.

use crate::decipher::extractor::{extract_n_program, extract_signature_program};
use crate::decipher::interpreter::TableTransducer;
use crate::error::DescrambleError;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};
use tracing::debug;

/// One step of the signature cipher, operand already bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigStep {
    Reverse,
    Slice(i64),
    Splice(i64),
    Swap(i64),
}

/// Ordered signature cipher steps for one script instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureProgram {
    steps: Vec<SigStep>,
}

impl SignatureProgram {
    pub fn new(steps: Vec<SigStep>) -> Self {
        SignatureProgram { steps }
    }

    pub fn steps(&self) -> &[SigStep] {
        &self.steps
    }
}

/// Executable n-transform operation bound from the catalog
#[derive(Debug, Clone, PartialEq)]
pub enum NTransform {
    RemoveIndex,
    SwapFront,
    Append,
    Reverse,
    RotateRight,
    Table(TableTransducer),
}

/// One operand array slot of the n-transform routine
#[derive(Debug, Clone, PartialEq)]
pub enum SlotSpec {
    Int(i64),
    Text(String),
    /// The operand array itself (`c[i]=c` alias)
    SlotArray,
    /// The input split into characters
    CharArray,
    /// The original input string
    Input,
    Null,
    Transform(NTransform),
}

/// One indexed call of the n-transform routine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NAction {
    pub target: usize,
    pub args: Vec<usize>,
}

/// Compiled n-transform: operand slots, ordered actions and the literal
/// fallback prefix captured from the routine's catch clause
#[derive(Debug, Clone, PartialEq)]
pub struct NDecodeProgram {
    pub slots: Vec<SlotSpec>,
    pub actions: Vec<NAction>,
    pub fallback_prefix: String,
}

/// Both compiled programs for one script instance. Replaced wholesale on
/// reload, never mutated in place.
#[derive(Debug, Clone)]
pub struct CatalogState {
    signature: SignatureProgram,
    n: NDecodeProgram,
    compiled_at: Instant,
}

impl CatalogState {
    /// Run the full extraction pass over a script body. Fails with a
    /// structural mismatch when any required pattern is absent; the caller's
    /// previous state, if any, is left untouched.
    pub fn compile(script: &str) -> Result<Self, DescrambleError> {
        let signature = extract_signature_program(script)?;
        let n = extract_n_program(script)?;
        debug!(script_len = script.len(), "compiled catalog state");
        Ok(CatalogState {
            signature,
            n,
            compiled_at: Instant::now(),
        })
    }

    #[cfg(test)]
    pub(crate) fn from_parts(signature: SignatureProgram, n: NDecodeProgram) -> Self {
        CatalogState {
            signature,
            n,
            compiled_at: Instant::now(),
        }
    }

    pub fn signature_program(&self) -> &SignatureProgram {
        &self.signature
    }

    pub fn n_program(&self) -> &NDecodeProgram {
        &self.n
    }

    pub fn age(&self) -> Duration {
        self.compiled_at.elapsed()
    }

    /// Replay the signature program over the cipher text. Apply failures
    /// here are not recovered; they surface as errors.
    ///
    /// The slice step computes a shortened copy that the original routine
    /// never reassigns, so it is deliberately a no-op here too.
    pub fn decode_signature(&self, sig: &str) -> Result<String, DescrambleError> {
        let mut chars: Vec<char> = sig.chars().collect();

        for step in self.signature.steps() {
            match *step {
                SigStep::Reverse => chars.reverse(),
                SigStep::Slice(_) => {}
                SigStep::Splice(count) => {
                    let count = usize::try_from(count).unwrap_or(0).min(chars.len());
                    chars.drain(..count);
                }
                SigStep::Swap(index) => {
                    let index = usize::try_from(index).map_err(|_| {
                        DescrambleError::SignatureApply(format!("negative swap index {index}"))
                    })?;
                    if index >= chars.len() {
                        return Err(DescrambleError::SignatureApply(format!(
                            "swap index {index} out of range for length {}",
                            chars.len()
                        )));
                    }
                    chars.swap(0, index);
                }
            }
        }

        Ok(chars.into_iter().collect())
    }

    /// Evaluate the n-transform program. Any failure while applying an
    /// action short-circuits the decode and yields the fallback-prefixed
    /// input, matching the platform's degrade-gracefully behavior.
    pub fn decode_n(&self, value: &str) -> String {
        let chars = Rc::new(RefCell::new(value.chars().collect::<Vec<char>>()));
        let slots: Rc<RefCell<Vec<Value>>> =
            Rc::new(RefCell::new(Vec::with_capacity(self.n.slots.len())));

        for spec in &self.n.slots {
            let slot = match spec {
                SlotSpec::Int(n) => Value::Int(*n),
                SlotSpec::Text(s) => Value::Text(s.clone()),
                SlotSpec::SlotArray => Value::Slots(Rc::clone(&slots)),
                SlotSpec::CharArray => Value::Chars(Rc::clone(&chars)),
                SlotSpec::Input => Value::Text(value.to_string()),
                SlotSpec::Null => Value::Null,
                SlotSpec::Transform(t) => Value::Transform(Rc::new(t.clone())),
            };
            slots.borrow_mut().push(slot);
        }

        let mut failure = None;
        for action in &self.n.actions {
            if let Err(reason) = apply_action(action, &slots) {
                debug!(target = action.target, reason, "n action failed, falling back");
                failure = Some(reason);
                break;
            }
        }

        // the slot array may alias itself; clear it to break the Rc cycle
        slots.borrow_mut().clear();

        match failure {
            Some(_) => format!("{}{}", self.n.fallback_prefix, value),
            None => chars.borrow().iter().collect(),
        }
    }
}

/// Materialized slot value during one decode call
#[derive(Clone)]
enum Value {
    Int(i64),
    Text(String),
    Chars(Rc<RefCell<Vec<char>>>),
    Slots(Rc<RefCell<Vec<Value>>>),
    Transform(Rc<NTransform>),
    Null,
}

enum ArrayArg {
    Chars(Rc<RefCell<Vec<char>>>),
    Slots(Rc<RefCell<Vec<Value>>>),
}

fn apply_action(action: &NAction, slots: &Rc<RefCell<Vec<Value>>>) -> Result<(), String> {
    let target = slots
        .borrow()
        .get(action.target)
        .cloned()
        .ok_or_else(|| format!("target slot {} out of range", action.target))?;
    let Value::Transform(transform) = target else {
        return Err(format!("slot {} is not callable", action.target));
    };

    let mut args = Vec::with_capacity(action.args.len());
    for &index in &action.args {
        let value = slots
            .borrow()
            .get(index)
            .cloned()
            .ok_or_else(|| format!("argument slot {index} out of range"))?;
        args.push(value);
    }

    apply_transform(&transform, &args)
}

fn apply_transform(transform: &NTransform, args: &[Value]) -> Result<(), String> {
    match transform {
        NTransform::RemoveIndex => {
            let index = int_arg(args.get(1))?;
            match array_arg(args.first())? {
                ArrayArg::Chars(a) => remove_index(&mut a.borrow_mut(), index),
                ArrayArg::Slots(a) => remove_index(&mut a.borrow_mut(), index),
            }
        }
        NTransform::SwapFront => {
            let index = int_arg(args.get(1))?;
            match array_arg(args.first())? {
                ArrayArg::Chars(a) => swap_front(&mut a.borrow_mut(), index),
                ArrayArg::Slots(a) => swap_front(&mut a.borrow_mut(), index),
            }
        }
        NTransform::Append => match array_arg(args.first())? {
            ArrayArg::Chars(a) => {
                // the character array holds single characters only; anything
                // else trips the fallback path
                let pushed = match args.get(1) {
                    Some(Value::Text(s)) if s.chars().count() == 1 => s.chars().next().unwrap(),
                    other => {
                        return Err(format!(
                            "cannot append {} to the character array",
                            value_kind(other)
                        ))
                    }
                };
                a.borrow_mut().push(pushed);
                Ok(())
            }
            ArrayArg::Slots(a) => {
                let value = args.get(1).cloned().ok_or("append needs a value")?;
                a.borrow_mut().push(value);
                Ok(())
            }
        },
        NTransform::Reverse => {
            match array_arg(args.first())? {
                ArrayArg::Chars(a) => a.borrow_mut().reverse(),
                ArrayArg::Slots(a) => a.borrow_mut().reverse(),
            }
            Ok(())
        }
        NTransform::RotateRight => {
            let count = int_arg(args.get(1))?;
            match array_arg(args.first())? {
                ArrayArg::Chars(a) => rotate_right(&mut a.borrow_mut(), count),
                ArrayArg::Slots(a) => rotate_right(&mut a.borrow_mut(), count),
            }
        }
        NTransform::Table(transducer) => {
            let ArrayArg::Chars(a) = array_arg(args.first())? else {
                return Err("table cipher needs the character array".to_string());
            };
            let seed = match args.get(1) {
                Some(Value::Text(s)) => s.clone(),
                other => return Err(format!("table cipher seed is {}", value_kind(other))),
            };
            let result = transducer.apply(&mut a.borrow_mut(), &seed);
            result
        }
    }
}

fn array_arg(value: Option<&Value>) -> Result<ArrayArg, String> {
    match value {
        Some(Value::Chars(a)) => Ok(ArrayArg::Chars(Rc::clone(a))),
        Some(Value::Slots(a)) => Ok(ArrayArg::Slots(Rc::clone(a))),
        other => Err(format!("expected an array, got {}", value_kind(other))),
    }
}

fn int_arg(value: Option<&Value>) -> Result<i64, String> {
    match value {
        Some(Value::Int(n)) => Ok(*n),
        other => Err(format!("expected a number, got {}", value_kind(other))),
    }
}

fn value_kind(value: Option<&Value>) -> &'static str {
    match value {
        Some(Value::Int(_)) => "a number",
        Some(Value::Text(_)) => "a string",
        Some(Value::Chars(_)) => "the character array",
        Some(Value::Slots(_)) => "the slot array",
        Some(Value::Transform(_)) => "a transform",
        Some(Value::Null) => "null",
        None => "nothing",
    }
}

/// Normalize a possibly negative index the way the script bodies do:
/// `(e % len + len) % len`
fn normalize_index(index: i64, len: usize) -> Result<usize, String> {
    if len == 0 {
        return Err("empty array".to_string());
    }
    Ok(index.rem_euclid(len as i64) as usize)
}

fn remove_index<T>(items: &mut Vec<T>, index: i64) -> Result<(), String> {
    let index = normalize_index(index, items.len())?;
    items.remove(index);
    Ok(())
}

fn swap_front<T>(items: &mut [T], index: i64) -> Result<(), String> {
    let index = normalize_index(index, items.len())?;
    items.swap(0, index);
    Ok(())
}

fn rotate_right<T>(items: &mut [T], count: i64) -> Result<(), String> {
    let count = normalize_index(count, items.len())?;
    items.rotate_right(count);
    Ok(())
}
