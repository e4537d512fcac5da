//! Build manifest (Dockerfile) rewriting for emulated builds.

use mbl_core::error::{MblError, Result};

/// Name of the manifest entry at the root of a build context.
pub const MANIFEST_FILE: &str = "Dockerfile";

/// Instruction that executes commands inside the image being built.
const RUN_KEYWORD: &str = "RUN";

/// Instruction appended after the last manifest line to leave emulation.
pub const EMULATION_END: &str = "\nRUN [ \"cross-build-end\" ]\n";

/// Instructions inserted before the first `RUN`: copy the interpreter
/// from the build context into the image and switch to emulated execution.
pub fn emulation_start(interpreter: &str) -> String {
    format!("COPY {interpreter} /usr/bin/qemu-execve\nRUN [ \"cross-build-start\" ]\n")
}

/// Byte offset of the start of the first line whose instruction is `RUN`.
///
/// Instructions are case-insensitive; comment lines never match.
pub fn find_run_instruction(content: &str) -> Option<usize> {
    let mut offset = 0;
    for line in content.split_inclusive('\n') {
        let keyword = line
            .trim_start()
            .split(|c: char| c.is_whitespace() || c == '[')
            .next()
            .unwrap_or("");
        if keyword.eq_ignore_ascii_case(RUN_KEYWORD) {
            return Some(offset);
        }
        offset += line.len();
    }
    None
}

/// Insert the emulation bootstrap before the first `RUN` and the closing
/// instruction at the end.
///
/// A manifest without any `RUN` cannot be emulated and is rejected.
pub fn rewrite_manifest(content: &str, interpreter: &str) -> Result<String> {
    let index = find_run_instruction(content).ok_or_else(|| {
        MblError::ConfigError(format!(
            "{MANIFEST_FILE} has no {RUN_KEYWORD} instruction to emulate; build with emulation disabled"
        ))
    })?;

    let start = emulation_start(interpreter);
    let mut out = String::with_capacity(content.len() + start.len() + EMULATION_END.len());
    out.push_str(&content[..index]);
    out.push_str(&start);
    out.push_str(&content[index..]);
    out.push_str(EMULATION_END);
    Ok(out)
}
