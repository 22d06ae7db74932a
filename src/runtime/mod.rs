//! Restricted script runtime.
//!
//! A `RestrictedRuntime` owns one JavaScript context for one job. Setup
//! wraps every granted output capability in a `ConfinedOutput`, then runs
//! the prelude which builds the script namespace around the import gate.
//! Only after that is the submitted source evaluated.

mod imports;
mod natives;
mod nesting;
pub mod pathops;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

use boa_engine::{js_string, Context, JsError, JsValue, Source};
use tracing::{debug, warn};

use crate::capabilities::CapabilityRegistry;
use crate::policy::{Policy, PolicyViolation};
use crate::sandbox::confiner::{ConfinedOutput, OutputConfiner};
use crate::sandbox::diagnostic::Diagnostic;
use imports::ImportRecorder;
use natives::HostState;

const PRELUDE: &str = include_str!("prelude.js");

/// Maximum JavaScript call depth.
const RECURSION_LIMIT: usize = 400;

/// Deepest bracket nesting accepted in submitted source.
pub const MAX_SOURCE_NESTING: usize = 256;

pub struct RestrictedRuntime {
    context: Context,
    imports: Rc<ImportRecorder>,
    policy: Arc<Policy>,
    confiner: Arc<OutputConfiner>,
    registry: CapabilityRegistry,
    outputs: Option<Rc<BTreeMap<String, ConfinedOutput>>>,
    prepared: bool,
}

impl RestrictedRuntime {
    pub fn new(
        policy: Arc<Policy>,
        job_dir: PathBuf,
        registry: CapabilityRegistry,
    ) -> Result<Self, Diagnostic> {
        let imports = Rc::new(ImportRecorder::default());
        let mut context = Context::builder()
            .module_loader(imports.clone())
            .build()
            .map_err(|e| Diagnostic::new("RuntimeError", &format!("cannot create context: {e}")))?;
        context
            .runtime_limits_mut()
            .set_recursion_limit(RECURSION_LIMIT);
        let confiner = Arc::new(OutputConfiner::new(job_dir, policy.clone()));
        Ok(Self {
            context,
            imports,
            policy,
            confiner,
            registry,
            outputs: None,
            prepared: false,
        })
    }

    /// Wraps each output capability the policy grants in a `ConfinedOutput`.
    ///
    /// Runs at most once; later calls leave the existing wrappers alone and
    /// return `false`.
    pub fn install_output_confinement(&mut self) -> bool {
        if self.outputs.is_some() {
            return false;
        }
        let mut outputs = BTreeMap::new();
        for name in self.policy.output_capabilities() {
            match self.registry.get(name) {
                Some(capability) => {
                    let output = ConfinedOutput::new(capability, self.confiner.clone());
                    let renderable = output.renderable_extensions();
                    let granted = self.policy.extensions_for(name);
                    if renderable.len() < granted.len() {
                        warn!(
                            "Policy grants '{name}' [{}] but it only renders [{}]",
                            granted.join(", "),
                            renderable.join(", ")
                        );
                    }
                    outputs.insert(name.to_string(), output);
                }
                None => debug!(
                    "Policy grants '{name}' but only [{}] exist",
                    self.registry.names().collect::<Vec<_>>().join(", ")
                ),
            }
        }
        debug!(
            "Confined {} of {} output capabilities",
            outputs.len(),
            self.registry.names().count()
        );
        self.outputs = Some(Rc::new(outputs));
        true
    }

    /// Names of the confined output capabilities, once installed.
    pub fn confined_outputs(&self) -> Vec<&str> {
        self.outputs
            .as_ref()
            .map(|outputs| outputs.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Builds the script namespace. Idempotent.
    pub fn prepare(&mut self) -> Result<(), Diagnostic> {
        if self.prepared {
            return Ok(());
        }
        self.install_output_confinement();
        let outputs = self.outputs.clone().unwrap_or_default();
        let state = Rc::new(HostState::new(self.policy.clone(), outputs));

        let setup = self
            .context
            .eval(Source::from_bytes(PRELUDE.as_bytes()))
            .map_err(|e| self.diagnose(&e))?;
        let Some(setup) = setup.as_callable().cloned() else {
            return Err(Diagnostic::new("RuntimeError", "prelude did not evaluate to a function"));
        };
        let host = natives::host_object(state, &mut self.context);
        setup
            .call(&JsValue::undefined(), &[host.into()], &mut self.context)
            .map_err(|e| self.diagnose(&e))?;

        self.prepared = true;
        debug!("Script namespace ready (outputs: {})", self.confined_outputs().join(", "));
        Ok(())
    }

    /// Evaluates `source` as one script. Prepares the namespace first if
    /// that has not happened yet.
    pub fn execute(&mut self, source: &str) -> Result<(), Diagnostic> {
        let depth = nesting::max_depth(source);
        if depth > MAX_SOURCE_NESTING {
            return Err(Diagnostic::new(
                "SyntaxError",
                &format!("source nests brackets {depth} levels deep (limit {MAX_SOURCE_NESTING})"),
            ));
        }
        self.prepare()?;
        let evaluated = self.context.eval(Source::from_bytes(source.as_bytes()));
        if evaluated.is_ok() {
            self.context.run_jobs();
        }
        if let Some(specifier) = self.imports.first_requested() {
            return Err(self.import_diagnostic(&specifier));
        }
        match evaluated {
            Ok(_) => Ok(()),
            Err(e) => {
                let diagnostic = self.diagnose(&e);
                if diagnostic.kind() == "SyntaxError" {
                    if let Some(specifier) = imports::static_import(source) {
                        return Err(self.import_diagnostic(&specifier));
                    }
                }
                Err(diagnostic)
            }
        }
    }

    /// An `import` of a denied module reads like a denied `require`; an
    /// allowed one points at `require`.
    fn import_diagnostic(&self, specifier: &str) -> Diagnostic {
        if self.policy.is_import_allowed(specifier) {
            return Diagnostic::new(
                "ImportError",
                &format!("module imports are not available, use require('{specifier}')"),
            );
        }
        let top = specifier
            .trim()
            .split('.')
            .next()
            .filter(|top| !top.is_empty())
            .unwrap_or(specifier);
        warn!("Denied module import of '{top}'");
        Diagnostic::new("ImportError", &PolicyViolation::ImportDenied(top.to_string()).to_string())
    }

    /// Reduces a script error to kind + message, with the job directory
    /// scrubbed from the text.
    fn diagnose(&mut self, err: &JsError) -> Diagnostic {
        let diagnostic = if let Some(native) = err.as_native() {
            Diagnostic::new(&native.kind.to_string(), native.message())
        } else if let Some(value) = err.as_opaque() {
            match value.as_object() {
                Some(object) => {
                    let name = string_property(object, "name", &mut self.context)
                        .unwrap_or_else(|| "Error".to_string());
                    let message =
                        string_property(object, "message", &mut self.context).unwrap_or_default();
                    Diagnostic::new(&name, &message)
                }
                None => Diagnostic::new("Uncaught", &display_value(value)),
            }
        } else {
            Diagnostic::new("Error", &err.to_string())
        };
        diagnostic.scrub_path(self.confiner.job_dir())
    }
}

fn string_property(
    object: &boa_engine::JsObject,
    key: &str,
    context: &mut Context,
) -> Option<String> {
    object
        .get(js_string!(key), context)
        .ok()
        .and_then(|v| v.as_string().map(|s| s.to_std_string_escaped()))
}

fn display_value(value: &JsValue) -> String {
    match value.as_string() {
        Some(s) => s.to_std_string_escaped(),
        None => value.display().to_string(),
    }
}
