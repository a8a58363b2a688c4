//! Runtime symbol lookup through a child interpreter process.

use std::env;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::app::locate::{ExecutionContext, LocatorKind, SymbolLocator};
use crate::app::modules::ResolvedImport;
use crate::domain::errors::LocateError;
use crate::domain::model::SymbolLocation;

pub const DEFAULT_PROGRAM: &str = "python3";

/// Imports the module, resolves the attribute, and prints one JSON report on the real stdout.
/// Anything the imported code prints is diverted to stderr.
const PROBE_SCRIPT: &str = r#"
import importlib
import inspect
import json
import sys

real_stdout = sys.stdout
sys.stdout = sys.stderr


def emit(payload):
    real_stdout.write(json.dumps(payload))
    real_stdout.flush()


def describe(err):
    return "%s: %s" % (type(err).__name__, err)


def is_missing(err, name):
    missing = getattr(err, "name", None)
    return missing is not None and (name == missing or name.startswith(missing + "."))


def main(module_name, symbol):
    try:
        module = importlib.import_module(module_name)
    except ModuleNotFoundError as err:
        if is_missing(err, module_name):
            emit({"status": "missing", "message": str(err)})
        else:
            emit({"status": "error", "message": describe(err)})
        return
    except BaseException as err:
        emit({"status": "error", "message": describe(err)})
        return

    obj = module
    fallback_name = module_name
    if symbol and symbol != "*":
        fallback_name = module_name + "." + symbol
        try:
            obj = getattr(module, symbol)
        except AttributeError:
            try:
                obj = importlib.import_module(fallback_name)
            except ModuleNotFoundError as err:
                if is_missing(err, fallback_name):
                    message = "module %r has no attribute %r" % (module_name, symbol)
                    emit({"status": "error", "message": message})
                else:
                    emit({"status": "error", "message": describe(err)})
                return
            except BaseException as err:
                emit({"status": "error", "message": describe(err)})
                return

    try:
        source_file = inspect.getsourcefile(obj) or inspect.getfile(obj)
    except TypeError:
        source_file = None

    lines, start_line = None, None
    if symbol != "*":
        try:
            lines, start_line = inspect.getsourcelines(obj)
        except (TypeError, OSError):
            lines, start_line = None, None

    if inspect.ismodule(obj):
        qualified_name = obj.__name__
    elif getattr(obj, "__module__", None) and getattr(obj, "__qualname__", None):
        qualified_name = obj.__module__ + "." + obj.__qualname__
    else:
        qualified_name = fallback_name

    try:
        representation = repr(obj)
    except BaseException as err:
        representation = "<unrepresentable: %s>" % describe(err)

    emit({
        "status": "found",
        "file": source_file,
        "start_line": start_line,
        "lines": lines,
        "representation": representation,
        "qualified_name": qualified_name,
    })


main(sys.argv[1], sys.argv[2])
"#;

/// How to launch the interpreter used for runtime lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterpreterSettings {
    pub program: String,
}

impl Default for InterpreterSettings {
    fn default() -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_owned(),
        }
    }
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
enum ProbeReport {
    Found {
        file: Option<PathBuf>,
        start_line: Option<usize>,
        lines: Option<Vec<String>>,
        representation: String,
        qualified_name: String,
    },
    Missing {
        message: String,
    },
    Error {
        message: String,
    },
}

/// Locator that imports the target in a separate interpreter process per lookup.
///
/// Module-level code of the target runs as a side effect. Each lookup gets its own process and
/// module search path, so concurrent lookups never observe each other's state.
#[derive(Debug, Clone, Default)]
pub struct DynamicLocator {
    settings: InterpreterSettings,
}

impl DynamicLocator {
    pub fn new(settings: InterpreterSettings) -> Self {
        Self { settings }
    }

    fn run_probe(
        &self,
        target: &ResolvedImport,
        context: &ExecutionContext,
    ) -> Result<ProbeReport, LocateError> {
        let program = &self.settings.program;
        let interpreter_error = |message: String| LocateError::Interpreter {
            program: program.clone(),
            message,
        };

        let output = Command::new(program)
            .arg("-c")
            .arg(PROBE_SCRIPT)
            .arg(target.module.to_string())
            .arg(target.symbol.as_deref().unwrap_or_default())
            .env("PYTHONPATH", search_path_env(context)?)
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .stdin(Stdio::null())
            .output()
            .map_err(|err| interpreter_error(format!("failed to spawn: {err}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        match serde_json::from_str::<ProbeReport>(stdout.trim()) {
            Ok(report) => Ok(report),
            Err(err) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let detail = stderr.lines().last().unwrap_or_default().trim().to_owned();
                Err(interpreter_error(format!(
                    "no usable report (exit status {}): {}",
                    output.status,
                    if detail.is_empty() { err.to_string() } else { detail }
                )))
            }
        }
    }
}

impl SymbolLocator for DynamicLocator {
    fn kind(&self) -> LocatorKind {
        LocatorKind::Dynamic
    }

    fn locate(
        &self,
        target: &ResolvedImport,
        context: &ExecutionContext,
    ) -> Result<SymbolLocation, LocateError> {
        debug!(target = %target.target(), program = %self.settings.program, "probing interpreter");
        into_location(self.run_probe(target, context)?, target)
    }
}

fn into_location(
    report: ProbeReport,
    target: &ResolvedImport,
) -> Result<SymbolLocation, LocateError> {
    match report {
        ProbeReport::Found {
            file,
            start_line,
            lines,
            representation,
            qualified_name,
        } => {
            let location = match (file, start_line, lines) {
                (Some(file), Some(start), Some(lines)) if !lines.is_empty() => {
                    SymbolLocation::with_source(file, start, &lines)
                }
                (Some(file), _, _) => SymbolLocation::file_only(file),
                (None, _, _) => SymbolLocation::absent(),
            };
            Ok(location
                .with_representation(representation)
                .with_qualified_name(qualified_name))
        }
        ProbeReport::Missing { message } => {
            debug!(module = %target.module, %message, "module not importable");
            Ok(SymbolLocation::absent())
        }
        ProbeReport::Error { message } => Err(LocateError::Load {
            module: target.module.to_string(),
            message,
        }),
    }
}

fn search_path_env(context: &ExecutionContext) -> Result<OsString, LocateError> {
    let inherited = env::var_os("PYTHONPATH")
        .map(|value| env::split_paths(&value).collect::<Vec<_>>())
        .unwrap_or_default();
    let paths = context.search_path().iter().cloned().chain(inherited);
    env::join_paths(paths).map_err(|err| LocateError::Interpreter {
        program: "PYTHONPATH".to_owned(),
        message: err.to_string(),
    })
}
