use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use log::{info, warn};
use crate::drivers::instrument::Instrument;
use crate::drivers::MeasurementError;
/// Placeholder values keyed by name, already formatted for the instrument.
pub type ScriptParams = BTreeMap<String, String>;
pub fn load_template(path: &Path) -> Result<String, MeasurementError> {
    fs::read_to_string(path).map_err(|source| MeasurementError::ScriptMissing {
        path: path.to_path_buf(),
        source,
    })
}
/// Replaces every `{{key}}` for which `params` has a value. Other
/// placeholders stay in the text untouched.
pub fn render(template: &str, params: &ScriptParams) -> String {
    params.iter().fold(template.to_string(), |script, (key, value)| {
        script.replace(&format!("{{{{{key}}}}}"), value)
    })
}
/// Names of `{{...}}` placeholders still present in `script`.
pub fn unresolved_placeholders(script: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = script;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                names.push(after[..end].to_string());
                rest = &after[end + 2..];
            }
            None => break,
        }
    }
    names
}
/// Sends the rendered script between `loadscript`/`endscript` and starts it.
pub fn upload_and_run(inst: &mut dyn Instrument, script: &str) -> Result<(), MeasurementError> {
    let missing = unresolved_placeholders(script);
    if !missing.is_empty() {
        warn!("script still contains placeholders: {}", missing.join(", "));
    }
    for command in ["loadscript", script, "endscript", "script.run()"] {
        inst.write(command).map_err(|e| match e {
            MeasurementError::Transport { command, source } => {
                MeasurementError::ScriptUpload { command, source }
            }
            other => other,
        })?;
    }
    info!("script uploaded ({} bytes) and started", script.len());
    Ok(())
}
#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::instrument::ScriptedInstrument;
    fn params(pairs: &[(&str, &str)]) -> ScriptParams {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
    #[test]
    fn render_substitutes_known_and_keeps_unknown_placeholders() {
        let template = "smua.source.levelv = {{Vd}}\nlimit = {{IlimitDrain}}\nx = {{Vd}}";
        let out = render(template, &params(&[("Vd", "1"), ("unused", "9")]));
        assert_eq!(out, "smua.source.levelv = 1\nlimit = {{IlimitDrain}}\nx = 1");
        assert_eq!(unresolved_placeholders(&out), vec!["IlimitDrain".to_string()]);
    }
    #[test]
    fn missing_template_is_a_script_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_template(&dir.path().join("GateSweep.tsp")).unwrap_err();
        assert_eq!(err.kind(), crate::drivers::ErrorKind::ScriptError);
    }
    #[test]
    fn upload_wraps_script_in_load_and_run_commands() {
        let mut inst = ScriptedInstrument::new();
        let transcript = inst.transcript();
        upload_and_run(&mut inst, "print(1)").unwrap();
        assert_eq!(
            *transcript.lock().unwrap(),
            vec!["loadscript", "print(1)", "endscript", "script.run()"]
        );
    }
}
