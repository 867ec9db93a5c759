//! Builtin tools available without any MCP server: directory listing and
//! file reading. Both run with the host process's privilege.

use std::sync::Arc;

use async_trait::async_trait;

use super::{Tool, ToolInvocation, ToolParam, ToolRegistry, ToolSpec};
use crate::utils::home::expand_tilde;

pub struct LsTool;

#[async_trait]
impl Tool for LsTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "ls",
            "List the entries of a directory on the local filesystem.",
            vec![ToolParam::string(
                "path",
                "Directory to list. Defaults to the current working directory.",
                false,
            )],
            "One entry per line; directories carry a trailing slash.",
        )
    }

    async fn invoke(&self, invocation: ToolInvocation) -> Result<String, String> {
        let path = invocation
            .args
            .get("path")
            .and_then(|value| value.as_str())
            .unwrap_or(".");
        let path = expand_tilde(path);
        let entries = std::fs::read_dir(&path).map_err(|err| format!("{}: {}", path, err))?;
        let mut lines = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| err.to_string())?;
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                name.push('/');
            }
            lines.push(name);
        }
        lines.sort();
        Ok(lines.join("\n"))
    }
}

pub struct CatTool;

#[async_trait]
impl Tool for CatTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "cat",
            "Read a file from the local filesystem and return its contents.",
            vec![ToolParam::string("path", "Path of the file to read.", true)],
            "The file contents as UTF-8 text.",
        )
    }

    async fn invoke(&self, invocation: ToolInvocation) -> Result<String, String> {
        let path = invocation
            .args
            .get("path")
            .and_then(|value| value.as_str())
            .ok_or_else(|| "missing required argument: path".to_string())?;
        let path = expand_tilde(path);
        std::fs::read_to_string(&path).map_err(|err| format!("{}: {}", path, err))
    }
}

/// Register every builtin tool the configuration names. Unknown names are
/// ignored so configs can reference tools from newer builds.
pub fn register_builtins(registry: &mut ToolRegistry, enabled: &[String]) {
    for name in enabled {
        match name.as_str() {
            "ls" => registry.register(Arc::new(LsTool)),
            "cat" => registry.register(Arc::new(CatTool)),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};
    use tokio_util::sync::CancellationToken;

    fn invocation(args: Map<String, serde_json::Value>) -> ToolInvocation {
        ToolInvocation {
            args,
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn cat_reads_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("note.txt");
        std::fs::write(&file, "hello file").expect("write");

        let mut args = Map::new();
        args.insert("path".to_string(), json!(file.display().to_string()));
        let output = CatTool.invoke(invocation(args)).await.expect("invoke");
        assert_eq!(output, "hello file");
    }

    #[tokio::test]
    async fn cat_requires_path() {
        let err = CatTool.invoke(invocation(Map::new())).await.unwrap_err();
        assert!(err.contains("path"));
    }

    #[tokio::test]
    async fn ls_lists_directories_with_slash() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(dir.path().join("sub")).expect("mkdir");
        std::fs::write(dir.path().join("a.txt"), "").expect("write");

        let mut args = Map::new();
        args.insert("path".to_string(), json!(dir.path().display().to_string()));
        let output = LsTool.invoke(invocation(args)).await.expect("invoke");
        assert_eq!(output, "a.txt\nsub/");
    }

    #[test]
    fn register_builtins_skips_unknown_names() {
        let mut registry = ToolRegistry::new();
        register_builtins(
            &mut registry,
            &["ls".to_string(), "warp_drive".to_string()],
        );
        assert_eq!(registry.names(), vec!["ls".to_string()]);
    }
}
