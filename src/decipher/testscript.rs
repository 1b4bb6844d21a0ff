//! Synthetic script bodies for tests: canonical catalog shapes under
//! arbitrary identifiers, assembled the way a real minified script lays
//! them out.

/// Call sequence binding to swap(3), reverse, splice(2), slice(1)
pub(crate) const SIG_CALLS_DEFAULT: &str = r#"Qz.mK(a,3);a=Qz.wB(a,0);Qz["j9"](a,2);Qz.d$(a,1);"#;

/// reverse b, rotate it right by c[1], reverse it back
pub(crate) const N_ACTIONS_DEFAULT: &str = "c[2](c[0]),c[3](c[0],c[1]),c[2](c[0]);";

/// calls reverse on a null slot; must trip the fallback path
pub(crate) const N_ACTIONS_FAILING: &str = "c[2](c[4]);";

pub(crate) fn synthetic_script(sig_calls: &str) -> String {
    synthetic_script_with(sig_calls, N_ACTIONS_DEFAULT)
}

pub(crate) fn synthetic_script_with(sig_calls: &str, n_actions: &str) -> String {
    format!(
        "{}{}{}",
        signature_section(sig_calls),
        "var unrelated=42;",
        n_section(n_actions)
    )
}

/// Variant whose n routine runs a braced table cipher over the character
/// array, seeded with the original input
pub(crate) fn synthetic_table_script() -> String {
    let table_fn = r#"function(d,e){for(var f=64,h=[];++f-h.length-32;){switch(f){case 65:f-=33;break}h.push(String.fromCharCode(f))}d.forEach(function(l,m,n){this.push(n[m]=h[(h.indexOf(l)-h.indexOf(this[m])+m-32+f--)%h.length])},e.split(""))}"#;
    format!(
        "{}function Wn(a){{var b=a.split(\"\"),c=[b,a,{table_fn}];\ntry{{c[2](c[0],c[1]);}}catch(d){{return\"fallback_marker_\"+a}}\nreturn b.join(\"\")}}",
        signature_section(SIG_CALLS_DEFAULT)
    )
}

fn signature_section(sig_calls: &str) -> String {
    let defs = concat!(
        "var Qz={mK:function(a,b){var c=a[0];a[0]=a[b%a.length];a[b%a.length]=c},",
        "wB:function(a){a.reverse()},",
        "\"j9\":function(a,b){a.splice(0,b)},",
        "d$:function(a,b){return a.slice(b)}};"
    );
    format!("{defs}function Xr(a){{a=a.split(\"\");{sig_calls}return a.join(\"\")}}")
}

fn n_section(n_actions: &str) -> String {
    let elements = concat!(
        "b,-3,",
        "function(d){d.reverse()},",
        "function(d,e){for(e=(e%d.length+d.length)%d.length;e--;)d.unshift(d.pop())},",
        "null,null,\"seed\",2"
    );
    format!(
        "function Wn(a){{var b=a.split(\"\"),c=[{elements}];\nc[5]=c;\ntry{{{n_actions}}}catch(d){{return\"fallback_marker_\"+a}}\nreturn b.join(\"\")}}"
    )
}
