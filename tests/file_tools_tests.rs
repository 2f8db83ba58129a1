use serde_json::json;
use std::fs;
use talkshell::tools::{FileTools, ToolRegistry, ToolSet};
use tempfile::TempDir;

#[test]
fn test_path_traversal_is_rejected() {
    let temp_dir = TempDir::new().expect("temp dir");
    let tools = FileTools::new(temp_dir.path().to_path_buf());

    assert!(tools.read_file("../etc/passwd").is_err());
    assert!(tools.read_file("/etc/passwd").is_err());
    assert!(tools.write_file("nested/../../escape.txt", "x").is_err());
}

#[test]
fn test_write_then_read_inside_sandbox() {
    let temp_dir = TempDir::new().expect("temp dir");
    let tools = FileTools::new(temp_dir.path().to_path_buf());

    let summary = tools
        .write_file("notes/todo.txt", "first\nsecond\n")
        .expect("write should succeed");
    assert!(summary.contains("notes/todo.txt"));
    assert_eq!(
        tools.read_file("notes/todo.txt").expect("read"),
        "first\nsecond\n"
    );
    assert!(temp_dir.path().join("notes/todo.txt").is_file());
}

#[test]
fn test_edit_requires_unique_snippet() {
    let temp_dir = TempDir::new().expect("temp dir");
    fs::write(temp_dir.path().join("a.txt"), "one two one").expect("seed file");
    let tools = FileTools::new(temp_dir.path().to_path_buf());

    let error = tools
        .edit_file("a.txt", "one", "three")
        .expect_err("duplicate snippet must be rejected");
    assert!(error.to_string().contains("2 times"));

    tools
        .edit_file("a.txt", "two", "2")
        .expect("unique snippet edits");
    assert_eq!(tools.read_file("a.txt").expect("read"), "one 2 one");
}

#[test]
fn test_list_files_hides_dotfiles_and_marks_directories() {
    let temp_dir = TempDir::new().expect("temp dir");
    fs::create_dir(temp_dir.path().join("src")).expect("mkdir");
    fs::write(temp_dir.path().join("README.md"), "hi").expect("write");
    fs::write(temp_dir.path().join(".env"), "secret").expect("write");
    let tools = FileTools::new(temp_dir.path().to_path_buf());

    let listing = tools.list_files(None, 50).expect("list");
    let entries: Vec<&str> = listing.lines().collect();
    assert_eq!(entries, vec!["README.md", "src/"]);
}

#[test]
fn test_call_dispatches_by_function_name() {
    let temp_dir = TempDir::new().expect("temp dir");
    let tools = FileTools::new(temp_dir.path().to_path_buf());

    tools
        .call(
            "write_file",
            &json!({"file_path": "x.txt", "content": "hello"}),
        )
        .expect("write via call");
    let text = tools
        .call("read_file", &json!({"path": "x.txt"}))
        .expect("read via call");
    assert_eq!(text, "hello");

    assert!(tools.call("read_file", &json!({})).is_err());
    assert!(tools.call("delete_file", &json!({"path": "x.txt"})).is_err());
}

#[test]
fn test_registry_exposes_only_activated_sets() {
    let temp_dir = TempDir::new().expect("temp dir");
    let mut registry = ToolRegistry::new();
    registry.register(std::sync::Arc::new(FileTools::new(
        temp_dir.path().to_path_buf(),
    )));

    assert!(registry.active_definitions().is_empty());
    assert!(registry.resolve("read_file").is_none());

    registry.activate("files").expect("activate files");
    assert!(registry.is_active("files"));
    assert!(registry.resolve("read_file").is_some());
    assert!(registry
        .active_definitions()
        .iter()
        .any(|definition| definition.name == "list_files"));

    assert!(registry.activate("nope").is_err());
}
