//! Native functions handed to the prelude.
//!
//! They are collected on a single `host` object that is passed to the
//! prelude as an argument and never bound in the global scope, so scripts
//! only reach them through the wrappers the prelude builds.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use boa_engine::object::builtins::JsArray;
use boa_engine::object::{JsObject, ObjectInitializer};
use boa_engine::{js_string, Context, JsError, JsNativeError, JsResult, JsValue, NativeFunction};
use boa_gc::{Finalize, Trace};
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{info, warn};

use super::{nesting, pathops};
use crate::policy::{ImportTarget, Policy, PolicyViolation};
use crate::render::layout::wrap_text;
use crate::sandbox::confiner::ConfinedOutput;
use crate::sandbox::diagnostic::truncate;

/// Modules the prelude implements without any host capability.
pub const UTILITY_MODULES: &[&str] = &[
    "random", "datetime", "re", "json", "math", "textwrap", "base64", "io",
];

/// Total console output a script may produce before further lines are dropped.
const MAX_CONSOLE_BYTES: usize = 64 * 1024;

const MAX_CONSOLE_LINE_CHARS: usize = 1000;

/// State shared by all natives of one runtime.
pub struct HostState {
    pub policy: Arc<Policy>,
    pub outputs: Rc<BTreeMap<String, ConfinedOutput>>,
    console_bytes: Cell<usize>,
}

impl HostState {
    pub fn new(policy: Arc<Policy>, outputs: Rc<BTreeMap<String, ConfinedOutput>>) -> Self {
        Self {
            policy,
            outputs,
            console_bytes: Cell::new(0),
        }
    }

    /// Decides what `require(name)` resolves to, as the name of a prelude
    /// module.
    pub fn gate(&self, name: &str) -> Result<String, PolicyViolation> {
        let top = name.trim().split('.').next().unwrap_or_default().to_string();
        match self.policy.resolve_import(name) {
            Some(ImportTarget::PathHelper) => Ok(crate::policy::PATH_HELPER.to_string()),
            Some(ImportTarget::Capability(cap))
                if UTILITY_MODULES.contains(&cap.as_str()) || self.outputs.contains_key(&cap) =>
            {
                Ok(cap)
            }
            _ => {
                warn!("Denied import of '{top}'");
                Err(PolicyViolation::ImportDenied(top))
            }
        }
    }
}

#[derive(Clone, Trace, Finalize)]
struct Host {
    #[unsafe_ignore_trace]
    state: Rc<HostState>,
}

/// Builds the `host` object passed to the prelude.
pub fn host_object(state: Rc<HostState>, context: &mut Context) -> JsObject {
    let host = Host { state };
    let mut init = ObjectInitializer::new(context);
    init.function(
        NativeFunction::from_copy_closure_with_captures(gate, host.clone()),
        js_string!("gate"),
        1,
    )
    .function(
        NativeFunction::from_copy_closure_with_captures(emit, host.clone()),
        js_string!("emit"),
        3,
    )
    .function(
        NativeFunction::from_copy_closure_with_captures(console, host),
        js_string!("log"),
        2,
    )
    .function(NativeFunction::from_fn_ptr(now), js_string!("now"), 0)
    .function(NativeFunction::from_fn_ptr(strftime), js_string!("strftime"), 2)
    .function(NativeFunction::from_fn_ptr(random), js_string!("random"), 0)
    .function(NativeFunction::from_fn_ptr(randint), js_string!("randint"), 2)
    .function(NativeFunction::from_fn_ptr(wrap), js_string!("wrap"), 2)
    .function(NativeFunction::from_fn_ptr(b64encode), js_string!("b64encode"), 2)
    .function(NativeFunction::from_fn_ptr(b64decode), js_string!("b64decode"), 2)
    .function(NativeFunction::from_fn_ptr(path), js_string!("path"), 2)
    .function(NativeFunction::from_fn_ptr(depth), js_string!("depth"), 1);
    init.build()
}

/// An `Error` object whose `name` is `name`.
pub fn named_error(name: &str, message: &str, context: &mut Context) -> JsError {
    let error = JsNativeError::error().with_message(message.to_string()).to_opaque(context);
    if let Err(err) = error.set(js_string!("name"), js_string!(name), false, context) {
        return err;
    }
    JsError::from_opaque(error.into())
}

fn arg_string(args: &[JsValue], index: usize, context: &mut Context) -> JsResult<String> {
    match args.get(index) {
        Some(value) if !value.is_undefined() => {
            Ok(value.to_string(context)?.to_std_string_escaped())
        }
        _ => Ok(String::new()),
    }
}

fn arg_number(args: &[JsValue], index: usize, context: &mut Context) -> JsResult<f64> {
    args.get(index).cloned().unwrap_or_default().to_number(context)
}

fn arg_bool(args: &[JsValue], index: usize) -> bool {
    args.get(index).is_some_and(JsValue::to_boolean)
}

fn string_array(items: impl IntoIterator<Item = String>, context: &mut Context) -> JsValue {
    let values: Vec<JsValue> = items.into_iter().map(|s| JsValue::from(js_string!(s))).collect();
    JsArray::from_iter(values, context).into()
}

// ── capability natives ──────────────────────────────

fn gate(_this: &JsValue, args: &[JsValue], host: &Host, context: &mut Context) -> JsResult<JsValue> {
    let name = arg_string(args, 0, context)?;
    match host.state.gate(&name) {
        Ok(module) => Ok(js_string!(module).into()),
        Err(violation) => Err(named_error("ImportError", &violation.to_string(), context)),
    }
}

/// `emit(capability, name, modelJson)`: renders and saves through the
/// confined capability, returning the base name written.
fn emit(_this: &JsValue, args: &[JsValue], host: &Host, context: &mut Context) -> JsResult<JsValue> {
    let capability = arg_string(args, 0, context)?;
    let requested = arg_string(args, 1, context)?;
    let model_json = arg_string(args, 2, context)?;

    let Some(output) = host.state.outputs.get(&capability) else {
        let message = format!("output capability '{capability}' is not granted");
        return Err(named_error("PolicyViolation", &message, context));
    };
    let model: serde_json::Value = serde_json::from_str(&model_json)
        .map_err(|e| JsNativeError::typ().with_message(format!("invalid {capability} model: {e}")))?;

    match output.save(&requested, &model) {
        Ok(path) => {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            Ok(js_string!(name).into())
        }
        Err(err) => {
            let kind = if err.downcast_ref::<PolicyViolation>().is_some() {
                "PolicyViolation"
            } else {
                "OutputError"
            };
            Err(named_error(kind, &format!("{err:#}"), context))
        }
    }
}

/// `log(level, text)`: script console output, routed to the log on stderr.
fn console(_this: &JsValue, args: &[JsValue], host: &Host, context: &mut Context) -> JsResult<JsValue> {
    let level = arg_string(args, 0, context)?;
    let text = arg_string(args, 1, context)?;

    let used = host.state.console_bytes.get();
    if used >= MAX_CONSOLE_BYTES {
        return Ok(JsValue::undefined());
    }
    host.state.console_bytes.set(used + text.len());

    let line = truncate(&text, MAX_CONSOLE_LINE_CHARS);
    match level.as_str() {
        "warn" | "error" => warn!(target: "docsandbox::script", "{line}"),
        _ => info!(target: "docsandbox::script", "{line}"),
    }
    Ok(JsValue::undefined())
}

// ── utility natives ─────────────────────────────────

fn now(_this: &JsValue, _args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    Ok(JsValue::from(Utc::now().timestamp_millis()))
}

/// `strftime(millis, format)`, always in UTC.
fn strftime(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let millis = arg_number(args, 0, context)?;
    let format = arg_string(args, 1, context)?;

    let Some(time) = DateTime::<Utc>::from_timestamp_millis(millis as i64) else {
        return Err(JsNativeError::range().with_message("timestamp out of range").into());
    };
    let items: Vec<Item<'_>> = StrftimeItems::new(&format).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(named_error("ValueError", &format!("invalid format string '{format}'"), context));
    }
    Ok(js_string!(time.format_with_items(items.iter()).to_string()).into())
}

fn random(_this: &JsValue, _args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    Ok(JsValue::from(rand::thread_rng().gen::<f64>()))
}

/// Inclusive on both ends.
fn randint(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let low = arg_number(args, 0, context)?;
    let high = arg_number(args, 1, context)?;
    if !low.is_finite() || !high.is_finite() {
        return Err(JsNativeError::typ().with_message("randint bounds must be finite").into());
    }
    let (low, high) = (low.floor() as i64, high.floor() as i64);
    if low > high {
        return Err(named_error("ValueError", &format!("empty range for randint({low}, {high})"), context));
    }
    Ok(JsValue::from(rand::thread_rng().gen_range(low..=high)))
}

fn wrap(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let text = arg_string(args, 0, context)?;
    let width = match args.get(1) {
        Some(value) if !value.is_undefined() => value.to_number(context)?,
        _ => 70.0,
    };
    let width = if width.is_finite() && width >= 1.0 { width as usize } else { 1 };
    Ok(string_array(wrap_text(&text, width), context))
}

fn b64encode(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let text = arg_string(args, 0, context)?;
    let encoded = if arg_bool(args, 1) {
        URL_SAFE.encode(text.as_bytes())
    } else {
        STANDARD.encode(text.as_bytes())
    };
    Ok(js_string!(encoded).into())
}

fn b64decode(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let text = arg_string(args, 0, context)?;
    let decoded = if arg_bool(args, 1) {
        URL_SAFE.decode(text.trim())
    } else {
        STANDARD.decode(text.trim())
    };
    match decoded {
        Ok(bytes) => Ok(js_string!(String::from_utf8_lossy(&bytes).into_owned()).into()),
        Err(e) => Err(named_error("ValueError", &format!("invalid base64: {e}"), context)),
    }
}

/// `depth(text)`: bracket nesting of text handed to `JSON.parse`.
fn depth(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let text = arg_string(args, 0, context)?;
    Ok(JsValue::from(nesting::max_depth(&text) as f64))
}

/// `path(op, ...args)`: the operations behind `os.path`.
fn path(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let op = arg_string(args, 0, context)?;
    let mut parts = Vec::with_capacity(args.len().saturating_sub(1));
    for index in 1..args.len() {
        parts.push(arg_string(args, index, context)?);
    }
    let first = parts.first().map(String::as_str).unwrap_or_default();

    let result = match op.as_str() {
        "join" => js_string!(pathops::join(&parts)).into(),
        "basename" => js_string!(pathops::basename(first)).into(),
        "dirname" => js_string!(pathops::dirname(first)).into(),
        "normpath" => js_string!(pathops::normpath(first)).into(),
        "isabs" => JsValue::from(pathops::isabs(first)),
        "splitext" => {
            let (root, ext) = pathops::splitext(first);
            string_array([root, ext], context)
        }
        other => {
            return Err(JsNativeError::typ()
                .with_message(format!("unknown path operation '{other}'"))
                .into())
        }
    };
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(policy: Policy) -> HostState {
        HostState::new(Arc::new(policy), Rc::new(BTreeMap::new()))
    }

    #[test]
    fn test_gate_utilities_and_path_helper() {
        let host = state(Policy::default());
        assert_eq!(host.gate("json").unwrap(), "json");
        assert_eq!(host.gate("os").unwrap(), "os");
        assert_eq!(host.gate("os.path").unwrap(), "os");
    }

    #[test]
    fn test_gate_denies_unlisted() {
        let host = state(Policy::default());
        for name in ["socket", "sys", "subprocess", "socket.socket", ""] {
            assert!(
                matches!(host.gate(name), Err(PolicyViolation::ImportDenied(_))),
                "{name:?} should be denied"
            );
        }
        assert_eq!(
            host.gate("socket.socket").unwrap_err().to_string(),
            "import of 'socket' is denied"
        );
    }

    #[test]
    fn test_gate_denies_output_without_installed_capability() {
        // docx is importable by default, but nothing was installed
        let host = state(Policy::default());
        assert!(host.gate("docx").is_err());
    }

    #[test]
    fn test_gate_denies_allowed_but_unknown_module() {
        let policy = Policy::new(vec!["sockets".to_string()], Vec::<(String, Vec<String>)>::new());
        assert!(state(policy).gate("sockets").is_err());
    }
}
