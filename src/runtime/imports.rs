//! ECMAScript module imports.
//!
//! Scripts are evaluated as classic scripts and only `require()` resolves
//! modules. A dynamic `import()` still reaches the engine's module loader,
//! so the loader here refuses every specifier and remembers it; a static
//! `import` declaration never parses, and `static_import` finds it so the
//! failure can be reported as an import instead of a syntax error.

use std::cell::RefCell;

use boa_engine::module::{Module, ModuleLoader, Referrer};
use boa_engine::{Context, JsNativeError, JsResult, JsString};
use tracing::debug;

/// Module loader that loads nothing and records what was asked for.
#[derive(Debug, Default)]
pub struct ImportRecorder {
    requested: RefCell<Vec<String>>,
}

impl ImportRecorder {
    /// First specifier passed to `import()`, if any.
    pub fn first_requested(&self) -> Option<String> {
        self.requested.borrow().first().cloned()
    }
}

impl ModuleLoader for ImportRecorder {
    fn load_imported_module(
        &self,
        _referrer: Referrer,
        specifier: JsString,
        finish_load: Box<dyn FnOnce(JsResult<Module>, &mut Context)>,
        context: &mut Context,
    ) {
        let name = specifier.to_std_string_escaped();
        debug!("Refused module import of '{name}'");
        self.requested.borrow_mut().push(name.clone());
        let error = JsNativeError::typ()
            .with_message(format!("module imports are not available, use require('{name}')"));
        finish_load(Err(error.into()), context);
    }
}

/// Specifier of the first static `import` declaration in `source`.
///
/// A declaration is `import` at the start of a line (after indentation or a
/// `;`) followed by bindings or directly by a quoted specifier. `import(`
/// and `import.meta` are expressions and are skipped.
pub fn static_import(source: &str) -> Option<String> {
    for (pos, _) in source.match_indices("import") {
        let before = source[..pos].rsplit(['\n', ';']).next().unwrap_or_default();
        if !before.trim().is_empty() {
            continue;
        }
        let rest = &source[pos + "import".len()..];
        let declares = rest.starts_with(|c: char| {
            c.is_whitespace() || c == '{' || c == '*' || c == '"' || c == '\''
        });
        if !declares {
            continue;
        }
        let statement = rest.split(';').next().unwrap_or_default();
        let tail = match statement.rfind("from") {
            Some(at) => &statement[at + "from".len()..],
            None => statement,
        };
        if let Some(specifier) = first_quoted(tail) {
            return Some(specifier);
        }
    }
    None
}

fn first_quoted(text: &str) -> Option<String> {
    let start = text.find(['"', '\''])?;
    let quote = text[start..].chars().next()?;
    let body = &text[start + 1..];
    let end = body.find(quote)?;
    Some(body[..end].to_string())
}
