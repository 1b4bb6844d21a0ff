//! Static catalog of recognized transformation shapes
//!
//! The platform's player script is minified with arbitrary identifiers, but
//! the bodies of the transformation routines come from a small fixed set.
//! This module holds those shapes as structural regex patterns over the raw
//! script text, for both obfuscation surfaces: the signature cipher object
//! and the n-parameter transform routine. Matching is boolean - a body either
//! is one of the known shapes or the script cannot be compiled.

use crate::error::DescrambleError;
use regex::Regex;

/// Identifier as it appears in the minified script
pub(crate) const JS_VAR: &str = r"[a-zA-Z_$][a-zA-Z0-9_$]*";

const JS_SQ_STRING: &str = r"'[^'\\]*(?:\\[\s\S][^'\\]*)*'";
const JS_DQ_STRING: &str = r#""[^"\\]*(?:\\[\s\S][^"\\]*)*""#;
const JS_EMPTY_STRING: &str = r#"(?:''|"")"#;

/// Capturing single/double quoted string contents (one group each)
pub(crate) const JS_CAPTURING_SQ: &str = r"'([^'\\]*(?:\\[\s\S][^'\\]*)*)'";
pub(crate) const JS_CAPTURING_DQ: &str = r#""([^"\\]*(?:\\[\s\S][^"\\]*)*)""#;

fn js_string() -> String {
    format!("(?:{JS_SQ_STRING}|{JS_DQ_STRING})")
}

fn js_key_string() -> String {
    format!("(?:{JS_VAR}|{})", js_string())
}

fn js_property_string() -> String {
    format!(r"(?:\.{JS_VAR}|\[{}\])", js_string())
}

/// The four canonical signature cipher operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigOpKind {
    Reverse,
    Slice,
    Splice,
    Swap,
}

/// A recognized signature operation body, matched right after its object key
pub struct SigPattern {
    pub kind: SigOpKind,
    pub body: &'static str,
}

pub const SIGNATURE_PATTERNS: [SigPattern; 4] = [
    SigPattern {
        kind: SigOpKind::Reverse,
        body: r":function\(a\)\{(?:return )?a\.reverse\(\)\}",
    },
    SigPattern {
        kind: SigOpKind::Slice,
        body: r":function\(a,b\)\{return a\.slice\(b\)\}",
    },
    SigPattern {
        kind: SigOpKind::Splice,
        body: r":function\(a,b\)\{a\.splice\(0,b\)\}",
    },
    SigPattern {
        kind: SigOpKind::Swap,
        body: r":function\(a,b\)\{var c=a\[0\];a\[0\]=a\[b(?:%a\.length)?\];a\[b(?:%a\.length)?\]=c(?:;return a)?\}",
    },
];

/// Matches the object literal defining the signature sub-routines.
/// Group 1: object name, group 2: object body.
pub(crate) fn signature_definitions_regex() -> Result<Regex, DescrambleError> {
    let key = js_key_string();
    let bodies = SIGNATURE_PATTERNS
        .iter()
        .map(|p| format!("{key}{}", p.body))
        .collect::<Vec<_>>()
        .join("|");
    Ok(Regex::new(&format!(
        r"var ({JS_VAR})=\{{((?:(?:{bodies}),?\r?\n?)+)\}};"
    ))?)
}

/// Matches the routine invoking the signature sub-routines in order.
/// Group 1: the call sequence body.
pub(crate) fn signature_invocation_regex() -> Result<Regex, DescrambleError> {
    let prop = js_property_string();
    Ok(Regex::new(&format!(
        r"function(?: {JS_VAR})?\(a\)\{{a=a\.split\({JS_EMPTY_STRING}\);\s*((?:(?:a=)?{JS_VAR}{prop}\(a,\d+\);)*)return a\.join\({JS_EMPTY_STRING}\)\}}"
    ))?)
}

/// Binds one signature operation body to its key in the object literal.
/// Group 1: the key (identifier or quoted string).
pub(crate) fn signature_key_regex(pattern: &SigPattern) -> Result<Regex, DescrambleError> {
    Ok(Regex::new(&format!("({}){}", js_key_string(), pattern.body))?)
}

/// The recognized n-transform operation bodies, in catalog order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NOpKind {
    /// `d.splice(e,1)` - remove the element at a normalized index
    RemoveIndex,
    /// swap element 0 with a normalized index, via a temporary
    SwapFront,
    /// `d.push(e)`
    Append,
    /// reverse, written as a pop-from-back push loop
    ReverseLoop,
    /// `d.reverse()`
    Reverse,
    /// rotate right, written as splice-reverse-unshift
    RotateSplice,
    /// swap element 0 with a normalized index, via nested splices
    SwapSplice,
    /// table cipher, switch wrapped in braces with the append after it
    TableBraced,
    /// table cipher, bare switch with appends only inside the cases
    TableBare,
    /// rotate right, written as an unshift-pop loop
    RotatePop,
}

impl NOpKind {
    pub fn is_table_cipher(&self) -> bool {
        matches!(self, NOpKind::TableBraced | NOpKind::TableBare)
    }
}

/// A recognized n-transform operation body
pub struct NPattern {
    pub kind: NOpKind,
    pub body: &'static str,
}

const TABLE_BRACED_BODY: &str = r#"function\(d,e\)\{for\(var f=64,h=\[\];\+\+f-h\.length-32;\)\{switch\(f\)\{[\s\S]*?\}h\.push\(String\.fromCharCode\(f\)\)\}d\.forEach\(function\(l,m,n\)\{this\.push\(n\[m\]=h\[\(h\.indexOf\(l\)-h\.indexOf\(this\[m\]\)\+m-32\+f--\)%h\.length\]\)\},e\.split\((?:''|"")\)\)\}"#;

const TABLE_BARE_BODY: &str = r#"function\(d,e\)\{for\(var f=64,h=\[\];\+\+f-h\.length-32;\)switch\(f\)\{[\s\S]*?\}d\.forEach\(function\(l,m,n\)\{this\.push\(n\[m\]=h\[\(h\.indexOf\(l\)-h\.indexOf\(this\[m\]\)\+m-32\+f--\)%h\.length\]\)\},e\.split\((?:''|"")\)\)\}"#;

pub const N_PATTERNS: [NPattern; 10] = [
    NPattern {
        kind: NOpKind::RemoveIndex,
        body: r"function\(d,e\)\{e=\(e%d\.length\+d\.length\)%d\.length;d\.splice\(e,1\)\}",
    },
    NPattern {
        kind: NOpKind::SwapFront,
        body: r"function\(d,e\)\{e=\(e%d\.length\+d\.length\)%d\.length;var f=d\[0\];d\[0\]=d\[e\];d\[e\]=f\}",
    },
    NPattern {
        kind: NOpKind::Append,
        body: r"function\(d,e\)\{d\.push\(e\)\}",
    },
    NPattern {
        kind: NOpKind::ReverseLoop,
        body: r"function\(d\)\{for\(var e=d\.length;e;\)d\.push\(d\.splice\(--e,1\)\[0\]\)\}",
    },
    NPattern {
        kind: NOpKind::Reverse,
        body: r"function\(d\)\{d\.reverse\(\)\}",
    },
    NPattern {
        kind: NOpKind::RotateSplice,
        body: r"function\(d,e\)\{e=\(e%d\.length\+d\.length\)%d\.length;d\.splice\(-e\)\.reverse\(\)\.forEach\(function\(f\)\{d\.unshift\(f\)\}\)\}",
    },
    NPattern {
        kind: NOpKind::SwapSplice,
        body: r"function\(d,e\)\{e=\(e%d\.length\+d\.length\)%d\.length;d\.splice\(0,1,d\.splice\(e,1,d\[0\]\)\[0\]\)\}",
    },
    NPattern {
        kind: NOpKind::TableBraced,
        body: TABLE_BRACED_BODY,
    },
    NPattern {
        kind: NOpKind::TableBare,
        body: TABLE_BARE_BODY,
    },
    NPattern {
        kind: NOpKind::RotatePop,
        body: r"function\(d,e\)\{for\(e=\(e%d\.length\+d\.length\)%d\.length;e--;\)d\.unshift\(d\.pop\(\)\)\}",
    },
];

/// Extracts the switch body out of a matched table cipher (group 1)
pub(crate) fn table_switch_regex(kind: NOpKind) -> Result<Regex, DescrambleError> {
    let pattern = match kind {
        NOpKind::TableBraced => TABLE_BRACED_BODY.replacen(r"[\s\S]*?", r"([\s\S]*?)", 1),
        NOpKind::TableBare => TABLE_BARE_BODY.replacen(r"[\s\S]*?", r"([\s\S]*?)", 1),
        other => {
            return Err(DescrambleError::StructuralMismatch(format!(
                "{other:?} is not a table cipher"
            )))
        }
    };
    Ok(Regex::new(&pattern)?)
}

/// Matches the whole n-transform routine.
/// Named groups: `array` (operand array literal), `aliases` (slot-to-array
/// copies), `actions` (indexed call sequence), `fb_sq`/`fb_dq` (fallback
/// prefix from the catch clause, one per quoting style).
pub(crate) fn n_routine_regex() -> Result<Regex, DescrambleError> {
    let alias = r"c\[\d+\]=c(?:;|,)";
    let action = r"c\[\d+\]\([\s\S]*?\)(?:;|,)?";
    Ok(Regex::new(&format!(
        r"function(?: {JS_VAR})?\(a\)\{{var b=a\.split\({JS_EMPTY_STRING}\),c=\[(?P<array>[\s\S]*?)\];\r?\n?(?P<aliases>(?:{alias})*?)\r?\n?try\{{(?P<actions>(?:{action})*?)\}}catch\(d\)\{{return(?:'(?P<fb_sq>[^'\\]*(?:\\[\s\S][^'\\]*)*)'|{dq})\+a\}}\r?\n?return b\.join\({JS_EMPTY_STRING}\)\}}",
        dq = r#""(?P<fb_dq>[^"\\]*(?:\\[\s\S][^"\\]*)*)""#,
    ))?)
}

/// Matches one slot-to-array alias. Group 1: the slot index.
pub(crate) fn n_alias_regex() -> Result<Regex, DescrambleError> {
    Ok(Regex::new(r"c\[(\d+)\]=c(?:;|,)")?)
}

/// Matches one indexed call. Group 1: target slot, group 2: argument list.
pub(crate) fn n_action_regex() -> Result<Regex, DescrambleError> {
    Ok(Regex::new(r"c\[(\d+)\]\(([\s\S]*?)\)(?:;|,)?")?)
}

/// Scans the operand array literal. One named group per catalog entry
/// (`f0`..`f9`), plus `num`, `var`, `sq`/`dq` string contents. Separators
/// between elements are skipped by the scan itself.
pub(crate) fn n_array_elements_regex() -> Result<Regex, DescrambleError> {
    let mut alternatives: Vec<String> = N_PATTERNS
        .iter()
        .enumerate()
        .map(|(i, p)| format!("(?P<f{i}>{})", p.body))
        .collect();
    alternatives.push(r"(?P<num>-?\d+)".to_string());
    alternatives.push(format!("(?P<var>{JS_VAR})"));
    alternatives.push(JS_CAPTURING_SQ.replacen('(', "(?P<sq>", 1));
    alternatives.push(JS_CAPTURING_DQ.replacen('(', "(?P<dq>", 1));
    Ok(Regex::new(&alternatives.join("|"))?)
}

/// Tokenizes the table cipher's switch body. One named group per statement
/// kind; counter adjustments are re-parsed with [`adjust_regex`].
pub(crate) fn switch_tokens_regex() -> Result<Regex, DescrambleError> {
    Ok(Regex::new(
        r"(?P<case>case \d+:)|(?P<default>default:)|(?P<adjust>f-=\d+;|f\+=\d+;|f=\d+;?)|(?P<append>h\.push\(String\.fromCharCode\(f\)\);?)|(?P<cont>continue;?)|(?P<brk>break;?)",
    )?)
}

/// Parses a counter adjustment. Group 1: operator, group 2: literal.
pub(crate) fn adjust_regex() -> Result<Regex, DescrambleError> {
    Ok(Regex::new(r"f(-=|\+=|=)(\d+);?")?)
}
