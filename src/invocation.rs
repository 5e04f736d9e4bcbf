#![allow(clippy::module_name_repetitions)]
//! Raw argument normalization.
//!
//! One left-to-right scan turns heterogeneous command-line tokens into a
//! canonical invocation: launcher-owned flags are extracted by a
//! flags-with-arity table, unrecognized dash-tokens pass through verbatim
//! to the entrypoint, and leftover bare tokens become the prompt. This
//! stage does no I/O and cannot fail; malformed flag values are the
//! entrypoint's problem to report.
//!
//! Resolution rules for ambiguous tokens:
//! - An unrecognized dash-flag claims the immediately following bare token
//!   as its value (both pass through), unless it used the `=` form.
//! - `--` ends flag scanning; everything after it is prompt text.

/// Default resource limits applied when the caller specifies none. Fixed
/// constants, not inferred from host capacity.
pub const DEFAULT_CPUS: &str = "2";
pub const DEFAULT_MEMORY: &str = "4g";

/// Launcher-owned flags, each taking exactly one value.
const OWNED_FLAGS: &[&str] = &["--ssh-key", "--cpus", "--memory"];

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ResourceLimits {
    pub cpus: String,
    pub memory: String,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        ResourceLimits {
            cpus: DEFAULT_CPUS.to_string(),
            memory: DEFAULT_MEMORY.to_string(),
        }
    }
}

/// Immutable result of normalization; consumed exactly once by the
/// launcher.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct InvocationSpec {
    /// Unrecognized flags and their claimed values, order preserved.
    pub passthrough: Vec<String>,
    /// Joined free-text tokens, if any.
    pub prompt: Option<String>,
    pub limits: ResourceLimits,
    pub ssh_key: Option<String>,
}

impl InvocationSpec {
    /// Arguments for the in-container entrypoint: pass-through flags in
    /// their original order, then the synthesized `-p <prompt>` pair last.
    pub fn entry_args(&self) -> Vec<String> {
        let mut out = self.passthrough.clone();
        if let Some(p) = &self.prompt {
            out.push("-p".to_string());
            out.push(p.clone());
        }
        out
    }
}

fn is_flag_token(tok: &str) -> bool {
    tok.len() > 1 && tok.starts_with('-')
}

/// Classify raw tokens into the canonical invocation.
pub fn normalize(raw_args: &[String]) -> InvocationSpec {
    let mut spec = InvocationSpec::default();
    let mut prompt_words: Vec<String> = Vec::new();

    let set_owned = |name: &str, value: String, spec: &mut InvocationSpec| match name {
        "--ssh-key" => spec.ssh_key = Some(value),
        "--cpus" => spec.limits.cpus = value,
        "--memory" => spec.limits.memory = value,
        _ => unreachable!("not in OWNED_FLAGS: {name}"),
    };

    let mut i = 0usize;
    while i < raw_args.len() {
        let tok = &raw_args[i];

        if tok == "--" {
            prompt_words.extend(raw_args[i + 1..].iter().cloned());
            break;
        }

        if let Some((name, value)) = tok.split_once('=') {
            if OWNED_FLAGS.contains(&name) {
                set_owned(name, value.to_string(), &mut spec);
                i += 1;
                continue;
            }
        }

        if OWNED_FLAGS.contains(&tok.as_str()) {
            if let Some(value) = raw_args.get(i + 1) {
                set_owned(tok, value.clone(), &mut spec);
                i += 2;
            } else {
                // Trailing owned flag without a value: let the entrypoint
                // report it rather than guessing one here.
                spec.passthrough.push(tok.clone());
                i += 1;
            }
            continue;
        }

        if is_flag_token(tok) {
            spec.passthrough.push(tok.clone());
            if !tok.contains('=') {
                if let Some(next) = raw_args.get(i + 1) {
                    if !is_flag_token(next) && next != "--" {
                        spec.passthrough.push(next.clone());
                        i += 2;
                        continue;
                    }
                }
            }
            i += 1;
            continue;
        }

        prompt_words.push(tok.clone());
        i += 1;
    }

    if !prompt_words.is_empty() {
        spec.prompt = Some(prompt_words.join(" "));
    }
    spec
}
