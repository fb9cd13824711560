//! Deterministic identities: project tokens, pip semistable hashes, graph fingerprint.
//!
//! Everything here is built on xxHash3 over a length-prefixed canonical
//! encoding, so the results are stable across runs and machines.

use xxhash_rust::xxh3::Xxh3;

use crate::pip::{FileOutput, Pip};
use crate::types::Project;

/// Number of sorted process hashes folded into the graph fingerprint.
pub const FINGERPRINT_SAMPLE_SIZE: usize = 100;

/// Streaming hasher with unambiguous field framing.
struct CanonicalHasher(Xxh3);

impl CanonicalHasher {
    fn new(domain: &str) -> Self {
        let mut hasher = Self(Xxh3::new());
        hasher.str(domain);
        hasher
    }

    fn bytes(&mut self, bytes: &[u8]) {
        self.0.update(&(bytes.len() as u64).to_le_bytes());
        self.0.update(bytes);
    }

    fn str(&mut self, s: &str) {
        self.bytes(s.as_bytes());
    }

    fn u64(&mut self, value: u64) {
        self.0.update(&value.to_le_bytes());
    }

    fn bool(&mut self, value: bool) {
        self.0.update(&[value as u8]);
    }

    fn path(&mut self, path: &std::path::Path) {
        self.str(&path.to_string_lossy());
    }

    fn finish(self) -> u64 {
        self.0.digest()
    }
}

/// Identity token of a project evaluation.
///
/// Depends only on the full path, the sorted target list and the sorted
/// global properties.
pub fn identity_token(project: &Project) -> u64 {
    let mut hasher = CanonicalHasher::new("identity");
    hasher.path(&project.full_path);

    let mut targets: Vec<&str> = project.predicted_targets.iter().map(String::as_str).collect();
    targets.sort_unstable();
    hasher.u64(targets.len() as u64);
    for target in targets {
        hasher.str(target);
    }

    hasher.u64(project.global_properties.len() as u64);
    for (key, value) in &project.global_properties {
        hasher.str(key);
        hasher.str(value);
    }
    hasher.finish()
}

/// Token giving each invocation's helper process a private endpoint.
///
/// Unlike the identity token this keeps the target order and the
/// appended-defaults flag, so two invocations that could run concurrently
/// never share an endpoint.
pub fn helper_endpoint_token(project: &Project) -> u64 {
    let mut hasher = CanonicalHasher::new("endpoint");
    hasher.path(&project.full_path);
    hasher.u64(project.predicted_targets.len() as u64);
    for target in &project.predicted_targets {
        hasher.str(target);
    }
    hasher.bool(project.is_default_target_appended);
    hasher.u64(project.global_properties.len() as u64);
    for (key, value) in &project.global_properties {
        hasher.str(key);
        hasher.str(value);
    }
    hasher.finish()
}

/// Semistable hash of a process pip. Never zero, which is reserved for
/// non-process pips.
///
/// Pass-through environment values are not part of the pip and therefore
/// not hashed; only their names are.
pub fn semistable_hash(pip: &Pip) -> u64 {
    let mut hasher = CanonicalHasher::new("process");
    hasher.path(&pip.executable);
    hasher.path(&pip.working_directory);

    hasher.u64(pip.arguments.len() as u64);
    for argument in &pip.arguments {
        hasher.str(&argument.render());
    }
    if let Some(rsp) = &pip.response_file {
        hasher.path(&rsp.path);
        hasher.str(&rsp.content);
    }

    hasher.u64(pip.environment.len() as u64);
    for var in &pip.environment {
        hasher.str(&var.name);
        hasher.bool(var.is_pass_through);
        if !var.is_pass_through {
            hasher.str(var.value.as_deref().unwrap_or_default());
        }
    }

    hasher.u64(pip.file_inputs.len() as u64);
    for input in &pip.file_inputs {
        hasher.path(&input.path);
        hasher.u64(input.rewrite_count as u64);
    }
    hasher.u64(pip.directory_inputs.len() as u64);
    for input in &pip.directory_inputs {
        hasher.path(&input.path);
    }

    let mut outputs: Vec<&FileOutput> = pip.file_outputs.iter().collect();
    outputs.sort_by(|a, b| a.artifact.path.cmp(&b.artifact.path));
    hasher.u64(outputs.len() as u64);
    for output in outputs {
        hasher.path(&output.artifact.path);
    }
    hasher.u64(pip.directory_outputs.len() as u64);
    for dir in &pip.directory_outputs {
        hasher.path(dir);
    }

    match hasher.finish() {
        0 => 1,
        hash => hash,
    }
}

/// Fingerprint of a whole graph from the first N sorted process hashes.
///
/// Adding or removing a pip whose hash falls outside the sample leaves the
/// fingerprint unchanged.
pub fn graph_fingerprint(process_hashes: impl IntoIterator<Item = u64>) -> u64 {
    let mut hashes: Vec<u64> = process_hashes.into_iter().filter(|h| *h != 0).collect();
    hashes.sort_unstable();
    hashes.truncate(FINGERPRINT_SAMPLE_SIZE);

    let mut hasher = CanonicalHasher::new("graph");
    hasher.u64(hashes.len() as u64);
    for hash in hashes {
        hasher.u64(hash);
    }
    hasher.finish()
}

/// Short hex form of a token used in per-project directory names.
pub fn short_token(token: u64) -> String {
    format!("{:016x}", token)
}
