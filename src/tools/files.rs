use super::{first_tool_string, required_tool_string, tool_usize, ToolDefinition, ToolSet};
use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::process::Command;

const MAX_READ_BYTES: u64 = 256 * 1024;
const MAX_EDIT_SNIPPET_CHARS: usize = 2_000;

/// File access confined to a sandbox root.
pub struct FileTools {
    root: PathBuf,
    canonical_root: PathBuf,
}

impl FileTools {
    pub fn new(root: PathBuf) -> Self {
        let canonical_root = fs::canonicalize(&root).unwrap_or_else(|_| root.clone());
        Self {
            root,
            canonical_root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve_path(&self, path: &str) -> Result<PathBuf> {
        if path.starts_with('/') || path.contains('\\') {
            bail!("absolute or platform-specific path not allowed: {path}");
        }

        let relative_path = Path::new(path);
        if relative_path
            .components()
            .any(|component| matches!(component, Component::ParentDir))
        {
            bail!("path traversal not allowed: {path}");
        }

        let requested = normalize_path(&self.root.join(relative_path));
        self.ensure_inside_root(&requested)?;
        Ok(requested)
    }

    fn ensure_inside_root(&self, path: &Path) -> Result<()> {
        let mut guard = path;
        while !guard.exists() {
            guard = guard
                .parent()
                .context("could not find an existing parent path")?;
        }

        let canonical = fs::canonicalize(guard)
            .with_context(|| format!("failed to canonicalize {}", guard.display()))?;
        if !canonical.starts_with(&self.canonical_root) {
            bail!("path escapes the sandbox: {}", path.display());
        }
        Ok(())
    }

    fn resolve_optional_path(&self, path: Option<&str>) -> Result<PathBuf> {
        match path.map(str::trim).filter(|p| !p.is_empty()) {
            None | Some(".") => Ok(self.root.clone()),
            Some(value) => self.resolve_path(value),
        }
    }

    fn display_relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .map(|relative| relative.to_string_lossy().to_string())
            .unwrap_or_else(|_| path.to_string_lossy().to_string())
    }

    pub fn read_file(&self, path: &str) -> Result<String> {
        let resolved = self.resolve_path(path)?;
        let size = fs::metadata(&resolved)
            .with_context(|| format!("failed to stat {path}"))?
            .len();
        if size > MAX_READ_BYTES {
            bail!("{path} is {size} bytes; files over {MAX_READ_BYTES} bytes are not read");
        }
        fs::read_to_string(resolved).with_context(|| format!("failed to read {path}"))
    }

    pub fn write_file(&self, path: &str, content: &str) -> Result<String> {
        let resolved = self.resolve_path(path)?;
        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent).context("failed to create parent directory")?;
        }
        fs::write(&resolved, content).with_context(|| format!("failed to write {path}"))?;
        Ok(format!(
            "Wrote {path} ({} chars, {} lines).",
            content.chars().count(),
            content.lines().count()
        ))
    }

    pub fn edit_file(&self, path: &str, old_str: &str, new_str: &str) -> Result<String> {
        let resolved = self.resolve_path(path)?;
        let content =
            fs::read_to_string(&resolved).with_context(|| format!("failed to read {path}"))?;

        if old_str.trim().is_empty() {
            bail!("edit_file requires a non-empty old_str");
        }
        if old_str.chars().count() > MAX_EDIT_SNIPPET_CHARS
            || new_str.chars().count() > MAX_EDIT_SNIPPET_CHARS
        {
            bail!("edit_file snippets are limited to {MAX_EDIT_SNIPPET_CHARS} chars each");
        }

        match content.matches(old_str).count() {
            0 => bail!("snippet not found in {path}"),
            1 => {}
            n => bail!("snippet appears {n} times in {path}; it must be unique"),
        }

        fs::write(&resolved, content.replacen(old_str, new_str, 1))
            .with_context(|| format!("failed to write {path}"))?;
        Ok(format!("Updated {path}."))
    }

    pub fn list_files(&self, path: Option<&str>, max_entries: usize) -> Result<String> {
        let root = self.resolve_optional_path(path)?;
        let limit = max_entries.clamp(1, 2000);
        let mut entries = Vec::new();

        if root.is_file() {
            entries.push(self.display_relative(&root));
        } else {
            let mut children: Vec<_> = fs::read_dir(&root)
                .with_context(|| format!("failed to read directory {}", root.display()))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .with_context(|| format!("failed to list entries in {}", root.display()))?;
            children.sort_by_key(|entry| entry.path());

            for child in children {
                let name = child.file_name();
                if name.to_string_lossy().starts_with('.') {
                    continue;
                }
                let child_path = child.path();
                let mut display = self.display_relative(&child_path);
                if child_path.is_dir() {
                    display.push('/');
                }
                entries.push(display);
                if entries.len() >= limit {
                    break;
                }
            }
        }

        if entries.is_empty() {
            Ok("(no files found)".to_string())
        } else {
            Ok(entries.join("\n"))
        }
    }

    pub fn search_files(&self, query: &str, path: Option<&str>, max_results: usize) -> Result<String> {
        let query = query.trim();
        if query.is_empty() {
            bail!("search_files requires a non-empty 'query' field");
        }
        let root = self.resolve_optional_path(path)?;
        let max_results = max_results.clamp(1, 200);

        match self.search_with_rg(query, &root, max_results) {
            Ok(result) => Ok(result),
            Err(error) if error.to_string().contains("failed to execute rg") => {
                self.search_fallback(query, &root, max_results)
            }
            Err(error) => Err(error),
        }
    }

    fn search_with_rg(&self, query: &str, root: &Path, max_results: usize) -> Result<String> {
        let output = Command::new("rg")
            .current_dir(&self.root)
            .args(["--line-number", "--color", "never", "--smart-case"])
            .arg("--max-count")
            .arg(max_results.to_string())
            .arg("--")
            .arg(query)
            .arg(root)
            .output()
            .context("failed to execute rg")?;

        match output.status.code() {
            Some(0) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let root_prefix = format!("{}/", self.root.display());
                let lines: Vec<String> = stdout
                    .lines()
                    .take(max_results)
                    .map(|line| line.strip_prefix(&root_prefix).unwrap_or(line).to_string())
                    .collect();
                if lines.is_empty() {
                    Ok("No matches found.".to_string())
                } else {
                    Ok(lines.join("\n"))
                }
            }
            Some(1) => Ok("No matches found.".to_string()),
            _ => bail!(
                "search_files failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        }
    }

    fn search_fallback(&self, query: &str, root: &Path, max_results: usize) -> Result<String> {
        let mut results = Vec::new();
        let mut stack = vec![root.to_path_buf()];
        let case_sensitive = query.chars().any(char::is_uppercase);
        let lowered_query = query.to_lowercase();

        while let Some(path) = stack.pop() {
            if path.is_dir() {
                let mut children: Vec<_> = fs::read_dir(&path)
                    .with_context(|| format!("failed to read directory {}", path.display()))?
                    .filter_map(|entry| entry.ok().map(|entry| entry.path()))
                    .collect();
                children.sort();
                stack.extend(children.into_iter().rev());
                continue;
            }

            let Ok(content) = fs::read_to_string(&path) else {
                continue;
            };
            for (idx, line) in content.lines().enumerate() {
                let is_match = if case_sensitive {
                    line.contains(query)
                } else {
                    line.to_lowercase().contains(&lowered_query)
                };
                if is_match {
                    results.push(format!("{}:{}:{}", self.display_relative(&path), idx + 1, line));
                    if results.len() >= max_results {
                        return Ok(results.join("\n"));
                    }
                }
            }
        }

        if results.is_empty() {
            Ok("No matches found.".to_string())
        } else {
            Ok(results.join("\n"))
        }
    }
}

fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

impl ToolSet for FileTools {
    fn name(&self) -> &str {
        "files"
    }

    fn description(&self) -> &str {
        "read, write, list and search files inside the sandbox"
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::new(
                "read_file",
                "Read a text file relative to the sandbox root",
                json!({
                    "type": "object",
                    "properties": { "path": { "type": "string" } },
                    "required": ["path"]
                }),
            ),
            ToolDefinition::new(
                "write_file",
                "Create or overwrite a text file",
                json!({
                    "type": "object",
                    "properties": {
                        "path": { "type": "string" },
                        "content": { "type": "string" }
                    },
                    "required": ["path", "content"]
                }),
            ),
            ToolDefinition::new(
                "edit_file",
                "Replace one exact, unique snippet (old_str -> new_str) in a file",
                json!({
                    "type": "object",
                    "properties": {
                        "path": { "type": "string" },
                        "old_str": { "type": "string" },
                        "new_str": { "type": "string" }
                    },
                    "required": ["path", "old_str", "new_str"]
                }),
            ),
            ToolDefinition::new(
                "list_files",
                "List entries of a directory",
                json!({
                    "type": "object",
                    "properties": {
                        "path": { "type": "string" },
                        "max_entries": { "type": "integer" }
                    }
                }),
            ),
            ToolDefinition::new(
                "search_files",
                "Search file contents for a string",
                json!({
                    "type": "object",
                    "properties": {
                        "query": { "type": "string" },
                        "path": { "type": "string" },
                        "max_results": { "type": "integer" }
                    },
                    "required": ["query"]
                }),
            ),
        ]
    }

    fn call(&self, function: &str, args: &Value) -> Result<String> {
        match function {
            "read_file" => self.read_file(required_tool_string(
                args,
                function,
                "path",
                &["path", "file_path", "file"],
            )?),
            "write_file" => {
                let path =
                    required_tool_string(args, function, "path", &["path", "file_path", "file"])?;
                let content = first_tool_string(args, &["content", "text"]).unwrap_or("");
                self.write_file(path, content)
            }
            "edit_file" => {
                let path =
                    required_tool_string(args, function, "path", &["path", "file_path", "file"])?;
                let old_str = first_tool_string(args, &["old_str", "old_string"]).unwrap_or("");
                let new_str = first_tool_string(args, &["new_str", "new_string"]).unwrap_or("");
                self.edit_file(path, old_str, new_str)
            }
            "list_files" => self.list_files(
                args.get("path").and_then(|v| v.as_str()),
                tool_usize(args, "max_entries", 100),
            ),
            "search_files" => self.search_files(
                first_tool_string(args, &["query", "pattern"]).unwrap_or(""),
                args.get("path").and_then(|v| v.as_str()),
                tool_usize(args, "max_results", 30),
            ),
            _ => bail!("unknown files function: {function}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn traversal_and_absolute_paths_are_rejected() {
        let temp = TempDir::new().expect("temp dir");
        let tools = FileTools::new(temp.path().to_path_buf());

        assert!(tools.resolve_path("../../etc/passwd").is_err());
        assert!(tools.resolve_path("/etc/passwd").is_err());
        assert!(tools.resolve_path("..\\windows\\system32").is_err());
        assert!(tools.list_files(Some("../"), 10).is_err());
    }

    #[test]
    fn filenames_with_double_dots_are_allowed() {
        let temp = TempDir::new().expect("temp dir");
        let tools = FileTools::new(temp.path().to_path_buf());

        assert!(tools.resolve_path("my..file.txt").is_ok());
        assert!(tools.resolve_path("v..2.0.md").is_ok());
    }

    #[test]
    fn write_then_edit_through_tool_calls() {
        let temp = TempDir::new().expect("temp dir");
        let tools = FileTools::new(temp.path().to_path_buf());

        tools
            .call("write_file", &json!({"path": "notes/a.txt", "content": "alpha\nbeta\n"}))
            .unwrap();
        tools
            .call(
                "edit_file",
                &json!({"path": "notes/a.txt", "old_str": "beta", "new_str": "gamma"}),
            )
            .unwrap();
        assert_eq!(
            tools.call("read_file", &json!({"path": "notes/a.txt"})).unwrap(),
            "alpha\ngamma\n"
        );
        assert_eq!(tools.call("list_files", &json!({})).unwrap(), "notes/");
    }

    #[test]
    fn fallback_search_is_smart_case() {
        let temp = TempDir::new().expect("temp dir");
        fs::write(temp.path().join("one.txt"), "Needle here\nnothing\n").unwrap();
        let tools = FileTools::new(temp.path().to_path_buf());

        let found = tools.search_fallback("needle", temp.path(), 10).unwrap();
        assert_eq!(found, "one.txt:1:Needle here");
        assert_eq!(
            tools.search_fallback("absent", temp.path(), 10).unwrap(),
            "No matches found."
        );
    }

    #[test]
    fn missing_arguments_are_reported() {
        let temp = TempDir::new().expect("temp dir");
        let tools = FileTools::new(temp.path().to_path_buf());
        let error = tools.call("read_file", &json!({})).unwrap_err();
        assert!(error.to_string().contains("'path'"));
    }
}
