use std::path::{Path, PathBuf};
use std::process::Command;

use serde::de::IgnoredAny;

use crate::error::GrabError;

pub const DEFAULT_TOOL: &str = "dwarf2json";

pub trait ProfileTool: Send + Sync {
    /// Build a Linux profile from a kernel image and its symbol map,
    /// returning the JSON document only once it has been checked.
    fn generate(&self, elf: &Path, system_map: &Path) -> Result<Vec<u8>, GrabError>;
}

impl<T: ProfileTool + ?Sized> ProfileTool for &T {
    fn generate(&self, elf: &Path, system_map: &Path) -> Result<Vec<u8>, GrabError> {
        (**self).generate(elf, system_map)
    }
}

#[derive(Debug, Clone)]
pub struct SystemDwarf2Json {
    name: String,
    program: Option<PathBuf>,
}

impl SystemDwarf2Json {
    /// `tool` is either a bare program name looked up on `PATH` or a path.
    pub fn new(tool: &str) -> Self {
        let candidate = Path::new(tool);
        let program = if candidate.components().count() > 1 {
            candidate.is_file().then(|| candidate.to_path_buf())
        } else {
            find_in_path(tool)
        };
        Self {
            name: tool.to_string(),
            program,
        }
    }

    pub fn ensure_available(&self) -> Result<(), GrabError> {
        self.require_program().map(|_| ())
    }

    fn require_program(&self) -> Result<&PathBuf, GrabError> {
        self.program
            .as_ref()
            .ok_or_else(|| GrabError::MissingTool(self.name.clone()))
    }
}

impl ProfileTool for SystemDwarf2Json {
    fn generate(&self, elf: &Path, system_map: &Path) -> Result<Vec<u8>, GrabError> {
        let program = self.require_program()?;
        let output = Command::new(program)
            .arg("linux")
            .arg("--elf")
            .arg(elf)
            .arg("--system-map")
            .arg(system_map)
            .output()
            .map_err(|err| GrabError::ToolFailed(format!("{}: {err}", program.display())))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("{} exited with {}", program.display(), output.status)
            } else {
                stderr
            };
            return Err(GrabError::ToolFailed(message));
        }
        validate_profile(&output.stdout)?;
        Ok(output.stdout)
    }
}

/// A profile must be a single JSON object. The document is walked, never
/// materialized.
pub fn validate_profile(bytes: &[u8]) -> Result<(), GrabError> {
    let first = bytes.iter().find(|byte| !byte.is_ascii_whitespace());
    match first {
        None => return Err(GrabError::InvalidProfile("empty output".to_string())),
        Some(b'{') => {}
        Some(_) => {
            return Err(GrabError::InvalidProfile(
                "output is not a JSON object".to_string(),
            ));
        }
    }
    serde_json::from_slice::<IgnoredAny>(bytes)
        .map(|_| ())
        .map_err(|err| GrabError::InvalidProfile(err.to_string()))
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.is_file() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.is_file() {
            return Some(plain);
        }
    }
    None
}
