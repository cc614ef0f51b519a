//! Custom-script driver and environment-variable expansion.
use std::path::{Path, PathBuf};

use anyhow::Result;

use super::confine::confine;
use super::{ActionOutcome, AppDriver, Detection, driver_error};
use crate::error::DriverError;
use crate::exec::Executor;
use crate::manifest::{CustomSpec, DetectRule};

/// Expand `~`, `%VAR%`, `$VAR`, and `${VAR}` using the process environment.
///
/// Unknown variables are left untouched.
#[must_use]
pub fn expand_env(input: &str) -> String {
    expand_with(input, |name| {
        std::env::var(name).ok().or_else(|| {
            (name == "HOME")
                .then(crate::platform::home_dir)
                .flatten()
                .map(|p| p.to_string_lossy().into_owned())
        })
    })
}

/// Expand variables in `input` using `lookup`.
pub(crate) fn expand_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    if let Some(after) = rest.strip_prefix('~')
        && (after.is_empty() || after.starts_with('/') || after.starts_with('\\'))
        && let Some(home) = lookup("HOME").or_else(|| lookup("USERPROFILE"))
    {
        out.push_str(&home);
        rest = after;
    }

    while let Some(pos) = rest.find(['%', '$']) {
        let (before, tail) = rest.split_at(pos);
        out.push_str(before);
        if let Some((name, len)) = parse_variable(tail) {
            match lookup(name) {
                Some(value) => out.push_str(&value),
                None => out.push_str(tail.get(..len).unwrap_or(tail)),
            }
            rest = tail.get(len..).unwrap_or("");
        } else {
            out.push_str(tail.get(..1).unwrap_or(""));
            rest = tail.get(1..).unwrap_or("");
        }
    }
    out.push_str(rest);
    out
}

/// Parse a variable reference at the start of `tail` (which begins with a
/// sigil), returning the name and the length of the reference.
fn parse_variable(tail: &str) -> Option<(&str, usize)> {
    let is_name = |c: char| c.is_ascii_alphanumeric() || c == '_';
    let body = tail.get(1..)?;
    if tail.starts_with('%') {
        let end = body.find('%')?;
        let name = body.get(..end)?;
        (!name.is_empty() && name.chars().all(is_name)).then_some((name, end + 2))
    } else if let Some(braced) = body.strip_prefix('{') {
        let end = braced.find('}')?;
        let name = braced.get(..end)?;
        (!name.is_empty()).then_some((name, end + 3))
    } else {
        let end = body.find(|c: char| !is_name(c)).unwrap_or(body.len());
        let name = body.get(..end)?;
        (!name.is_empty()).then_some((name, end + 1))
    }
}

/// Check a registry key (and optional value) through `PowerShell`.
///
/// # Errors
///
/// Returns an error if `PowerShell` cannot be started.
pub fn registry_exists(executor: &dyn Executor, key: &str, value: Option<&str>) -> Result<bool> {
    let key = key.replace('\'', "''");
    let script = value.map_or_else(
        || format!("if (Test-Path -Path '{key}') {{ exit 0 }} else {{ exit 1 }}"),
        |name| {
            let name = name.replace('\'', "''");
            format!(
                "$v = Get-ItemProperty -Path '{key}' -Name '{name}' -ErrorAction SilentlyContinue\n\
                 if ($null -ne $v) {{ exit 0 }} else {{ exit 1 }}"
            )
        },
    );
    let result = executor
        .run_unchecked("powershell", &["-NoProfile", "-NonInteractive", "-Command", &script])
        .map_err(|e| driver_error("powershell", e))?;
    Ok(result.success)
}

/// Driver for an app installed by a user script.
#[derive(Debug)]
pub struct CustomDriver<'a> {
    spec: &'a CustomSpec,
    root: &'a Path,
    executor: &'a dyn Executor,
}

impl<'a> CustomDriver<'a> {
    /// Create a driver for `spec`, confined to `root`.
    #[must_use]
    pub const fn new(spec: &'a CustomSpec, root: &'a Path, executor: &'a dyn Executor) -> Self {
        Self {
            spec,
            root,
            executor,
        }
    }

    /// Interpreter and arguments for the script at `path`.
    fn command_line(&self, path: &Path) -> (String, Vec<String>) {
        let script = path.to_string_lossy().into_owned();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        let (program, mut args) = match ext.as_deref() {
            Some("ps1") => (
                "powershell".to_string(),
                vec![
                    "-NoProfile".to_string(),
                    "-NonInteractive".to_string(),
                    "-ExecutionPolicy".to_string(),
                    "Bypass".to_string(),
                    "-File".to_string(),
                    script,
                ],
            ),
            Some("sh") => ("sh".to_string(), vec![script]),
            _ => (script, Vec::new()),
        };
        args.extend(self.spec.args.iter().cloned());
        (program, args)
    }

    fn script_path(&self) -> Result<PathBuf> {
        let path = confine(self.root, &self.spec.script)?;
        if !path.is_file() {
            return Err(DriverError::ScriptMissing(path).into());
        }
        Ok(path)
    }
}

impl AppDriver for CustomDriver<'_> {
    fn describe(&self) -> String {
        format!("{} (custom)", self.spec.script)
    }

    fn detect(&self) -> Result<Detection> {
        let installed = match &self.spec.detect {
            DetectRule::File { path } => Path::new(&expand_env(path)).exists(),
            DetectRule::Registry { key, value } => {
                registry_exists(self.executor, key, value.as_deref())?
            }
        };
        Ok(Detection {
            installed,
            version: None,
        })
    }

    fn install(&self) -> Result<ActionOutcome> {
        let path = self.script_path()?;
        let (program, args) = self.command_line(&path);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.executor
            .run_in(self.root, &program, &args)
            .map_err(|e| driver_error(&program, e))?
            .into_checked(&program)?;
        Ok(ActionOutcome::Done)
    }

    fn upgrade(&self) -> Result<ActionOutcome> {
        Ok(ActionOutcome::ManualInterventionNeeded(format!(
            "custom apps cannot be upgraded automatically; update {} by hand",
            self.spec.script
        )))
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::error::SecurityError;
    use crate::exec::test_helpers::MockExecutor;
    use std::fs;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "HOME" => Some("/home/ada".into()),
            "APPDATA" => Some("C:\\Users\\ada\\AppData".into()),
            "XDG" => Some("/cfg".into()),
            _ => None,
        }
    }

    #[test]
    fn expands_all_forms() {
        assert_eq!(expand_with("~/.gitconfig", lookup), "/home/ada/.gitconfig");
        assert_eq!(expand_with("%APPDATA%\\Code", lookup), "C:\\Users\\ada\\AppData\\Code");
        assert_eq!(expand_with("$XDG/nvim", lookup), "/cfg/nvim");
        assert_eq!(expand_with("${XDG}nvim", lookup), "/cfgnvim");
    }

    #[test]
    fn unknown_and_lone_sigils_are_kept() {
        assert_eq!(expand_with("%NOPE%/x", lookup), "%NOPE%/x");
        assert_eq!(expand_with("$NOPE/x", lookup), "$NOPE/x");
        assert_eq!(expand_with("100% sure $", lookup), "100% sure $");
        assert_eq!(expand_with("~user/x", lookup), "~user/x");
    }

    fn spec(script: &str) -> CustomSpec {
        CustomSpec {
            script: script.into(),
            args: vec!["--quiet".into()],
            detect: DetectRule::File {
                path: "/nonexistent/converge/tool".into(),
            },
        }
    }

    #[test]
    fn escaping_script_is_rejected_before_execution() {
        let tmp = tempfile::tempdir().unwrap();
        let exec = MockExecutor::new();
        let s = spec("../../outside.ps1");
        let driver = CustomDriver::new(&s, tmp.path(), &exec);
        let err = driver.install().unwrap_err();
        assert!(err.downcast_ref::<SecurityError>().is_some());
        assert!(exec.calls().is_empty(), "nothing may run");
    }

    #[test]
    fn missing_script_is_driver_error() {
        let tmp = tempfile::tempdir().unwrap();
        let exec = MockExecutor::new();
        let s = spec("scripts/none.sh");
        let err = CustomDriver::new(&s, tmp.path(), &exec).install().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DriverError>(),
            Some(DriverError::ScriptMissing(_))
        ));
    }

    #[test]
    fn shell_script_runs_with_args() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("setup.sh"), "exit 0").unwrap();
        let exec = MockExecutor::new().respond("sh ", true, "");
        let s = spec("setup.sh");
        let driver = CustomDriver::new(&s, tmp.path(), &exec);
        assert_eq!(driver.install().unwrap(), ActionOutcome::Done);
        let calls = exec.calls();
        assert!(calls[0].starts_with("sh "));
        assert!(calls[0].ends_with("setup.sh --quiet"));
    }

    #[test]
    fn powershell_script_uses_file_flag() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("setup.ps1"), "").unwrap();
        let exec = MockExecutor::new().respond("powershell", false, "boom");
        let s = spec("setup.ps1");
        let err = CustomDriver::new(&s, tmp.path(), &exec).install().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DriverError>(),
            Some(DriverError::NonZeroExit { .. })
        ));
        assert!(exec.calls()[0].contains("-ExecutionPolicy Bypass -File"));
    }

    #[test]
    fn upgrade_needs_manual_intervention() {
        let tmp = tempfile::tempdir().unwrap();
        let exec = MockExecutor::new();
        let s = spec("setup.sh");
        let outcome = CustomDriver::new(&s, tmp.path(), &exec).upgrade().unwrap();
        assert!(matches!(outcome, ActionOutcome::ManualInterventionNeeded(_)));
    }

    #[test]
    fn file_detect() {
        let tmp = tempfile::tempdir().unwrap();
        let marker = tmp.path().join("installed.txt");
        fs::write(&marker, "").unwrap();
        let exec = MockExecutor::new();
        let s = CustomSpec {
            script: "x.sh".into(),
            args: Vec::new(),
            detect: DetectRule::File {
                path: marker.to_string_lossy().into_owned(),
            },
        };
        assert!(CustomDriver::new(&s, tmp.path(), &exec).detect().unwrap().installed);
    }

    #[test]
    fn registry_detect_uses_exit_code() {
        let exec = MockExecutor::new().respond("powershell", true, "");
        assert!(registry_exists(&exec, "HKLM:\\Software\\Tool", Some("Path")).unwrap());
        let exec = MockExecutor::new().respond("powershell", false, "");
        assert!(!registry_exists(&exec, "HKLM:\\Software\\Tool", None).unwrap());
    }
}
