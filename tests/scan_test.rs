//! End-to-end scans over trees built in a temp directory.

use luagraph::config::ScanConfig;
use luagraph::storage::{Action, ScanCache};
use luagraph::{
    CancelToken, FileScanRecord, FileStatus, ScanError, ScanObserver, ScanRequest, Scanner,
    ScopeTag,
};
use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write(root: &Path, relative: &str, body: impl AsRef<[u8]>) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, body).unwrap();
}

fn sample_tree(root: &Path) {
    write(
        root,
        "a.lua",
        "local function foo() bar() end\nfunction M.baz() foo() end\n",
    );
    write(
        root,
        "lib/net.lua",
        "local http = require(\"http\")\nfunction http.fetch(url) os.execute(url) end\nprint('net')\n",
    );
    write(root, "tools/run", "#!/usr/bin/env lua\nio.popen('ls')\n");
    write(root, "README.md", "not lua");
}

fn sequential_config() -> ScanConfig {
    ScanConfig {
        parallel: false,
        ..ScanConfig::default()
    }
}

#[test]
fn test_scan_links_sample_tree() {
    let temp = TempDir::new().unwrap();
    sample_tree(temp.path());

    let outcome = Scanner::new(sequential_config())
        .scan(&ScanRequest::new(temp.path()).parallel(false))
        .unwrap();

    let paths: Vec<&str> = outcome
        .records
        .iter()
        .map(|r| r.relative_path.as_str())
        .collect();
    assert_eq!(paths, vec!["/a.lua", "/lib/net.lua", "/tools/run"]);
    assert!(outcome.failures().next().is_none());

    let network = &outcome.network;
    assert_eq!(network.edge("/a.lua", "foo"), Some(Action::Define));
    assert_eq!(network.edge("foo", "bar"), Some(Action::Call));
    assert_eq!(network.edge("/a.lua", "a.baz"), Some(Action::Export));
    assert_eq!(network.edge("a.baz", "foo"), Some(Action::Call));

    // `http` came from require, so the export keeps its written name
    assert_eq!(network.edge("/lib/net.lua", "http.fetch"), Some(Action::Export));
    assert_eq!(network.edge("http.fetch", "os.execute"), Some(Action::Call));

    let ancestors = network.ancestors("os.execute").unwrap();
    assert!(ancestors.contains("/lib/net.lua"));
    assert!(ancestors.contains("http.fetch"));

    let entry = &outcome.call_graph["/a.lua"];
    assert!(entry.callees(&ScopeTag::exported("M.baz")).unwrap().contains("foo"));
    assert_eq!(outcome.requires["/lib/net.lua"], vec!["http"]);
}

#[test]
fn test_repeated_full_scans_are_identical() {
    let temp = TempDir::new().unwrap();
    sample_tree(temp.path());
    let scanner = Scanner::new(sequential_config());
    let request = ScanRequest::new(temp.path());

    let first = scanner.scan(&request).unwrap();
    let second = scanner.scan(&request).unwrap();

    assert_eq!(first.network, second.network);
    assert_eq!(first.call_graph, second.call_graph);
    assert_eq!(first.records, second.records);
}

#[test]
fn test_partial_failures_keep_successful_files() {
    let temp = TempDir::new().unwrap();
    for i in 0..7 {
        write(
            temp.path(),
            &format!("ok{i}.lua"),
            format!("function M.f{i}() helper{i}() end\n"),
        );
    }
    for i in 0..3 {
        write(
            temp.path(),
            &format!("broken{i}.lua"),
            "function broken(\n  print('x')\n",
        );
    }

    let outcome = Scanner::new(sequential_config())
        .scan(&ScanRequest::new(temp.path()))
        .unwrap();

    assert_eq!(outcome.records.len(), 10);
    assert_eq!(outcome.call_graph.len(), 7);
    assert_eq!(outcome.status_counts()[&FileStatus::Success], 7);
    assert_eq!(outcome.status_counts()[&FileStatus::SyntaxError], 3);
    for i in 0..3 {
        assert!(!outcome.network.contains(&format!("/broken{i}.lua")));
    }
    for i in 0..7 {
        assert_eq!(
            outcome
                .network
                .edge(&format!("ok{i}.f{i}"), &format!("helper{i}")),
            Some(Action::Call)
        );
    }
}

#[test]
fn test_bytecode_is_rejected_without_nodes() {
    let temp = TempDir::new().unwrap();
    write(temp.path(), "chunk.lua", b"\x1bLuaS\x00\x19\x93\r\n\x1a\n");

    let outcome = Scanner::new(sequential_config())
        .scan(&ScanRequest::new(temp.path()))
        .unwrap();

    assert_eq!(outcome.status_of("/chunk.lua"), Some(FileStatus::Bytecode));
    assert!(outcome.network.is_empty());
    assert!(outcome.call_graph.is_empty());
}

#[test]
fn test_lenient_syntax_walks_broken_file() {
    let temp = TempDir::new().unwrap();
    write(temp.path(), "a.lua", "print('ok')\nlocal = = 3\n");

    let config = ScanConfig {
        strict_syntax: false,
        ..sequential_config()
    };
    let outcome = Scanner::new(config)
        .scan(&ScanRequest::new(temp.path()))
        .unwrap();

    assert_eq!(outcome.status_of("/a.lua"), Some(FileStatus::Success));
    assert!(outcome.network.contains("print"));
}

#[test]
fn test_parallel_scan_matches_sequential() {
    let temp = TempDir::new().unwrap();
    for i in 0..40 {
        write(
            temp.path(),
            &format!("pkg{}/mod{i}.lua", i % 4),
            format!(
                "local function helper() shared() end\nfunction M.run{i}() helper() log{}() end\nprint({i})\n",
                i % 5
            ),
        );
    }
    write(temp.path(), "pkg0/bad.lua", "function broken(\n");

    let sequential = Scanner::new(sequential_config())
        .scan(&ScanRequest::new(temp.path()).parallel(false))
        .unwrap();

    let pooled_config = ScanConfig {
        parallel: true,
        parallel_threshold: 0,
        parallel_threads: 4,
        channel_size: 2,
        ..ScanConfig::default()
    };
    let pooled = Scanner::new(pooled_config)
        .scan(&ScanRequest::new(temp.path()).parallel(true))
        .unwrap();

    assert_eq!(sequential.network, pooled.network);
    assert_eq!(sequential.call_graph, pooled.call_graph);
    assert_eq!(sequential.records, pooled.records);
}

#[test]
fn test_artifact_round_trips_through_disk() {
    let temp = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    sample_tree(temp.path());
    write(temp.path(), "chunk.lua", b"\x1bLua");
    let artifact = out.path().join("nested").join("graph.json");

    let outcome = Scanner::new(sequential_config())
        .scan(&ScanRequest::new(temp.path()).artifact(&artifact))
        .unwrap();

    let cache = ScanCache::load(&artifact).unwrap().unwrap();
    assert_eq!(cache.call_network, outcome.network);
    assert_eq!(cache.call_graph, outcome.call_graph);
    assert_eq!(cache.file_status["/chunk.lua"], FileStatus::Bytecode);
    assert_eq!(cache.file_hashes.len(), outcome.records.len());
    assert!(cache.scanned_at > 0);
}

#[test]
fn test_persist_failure_keeps_outcome() {
    let temp = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    sample_tree(temp.path());
    let blocker = out.path().join("blocker");
    fs::write(&blocker, "a file, not a directory").unwrap();

    let err = Scanner::new(sequential_config())
        .scan(&ScanRequest::new(temp.path()).artifact(blocker.join("graph.json")))
        .unwrap_err();

    assert!(matches!(err, ScanError::PersistFailure { .. }));
    let outcome = err.into_outcome().unwrap();
    assert_eq!(outcome.records.len(), 3);
    assert!(outcome.network.contains("/a.lua"));
}

#[test]
fn test_extension_filters_select_files() {
    let temp = TempDir::new().unwrap();
    write(temp.path(), "a.lua", "x()");
    write(temp.path(), "b.luax", "y()");

    let config = ScanConfig {
        include_shebang_scripts: false,
        ..sequential_config()
    };
    let outcome = Scanner::new(config)
        .scan(&ScanRequest::new(temp.path()).with_extensions([".luax"]))
        .unwrap();

    assert_eq!(outcome.records.len(), 1);
    assert_eq!(outcome.records[0].relative_path, "/b.luax");
    assert!(outcome.network.contains("y"));
}

#[test]
fn test_deeply_nested_syntax_error_does_not_abort_scan() {
    let temp = TempDir::new().unwrap();
    let depth = 50_000;
    write(
        temp.path(),
        "deep.lua",
        format!("x = {}1 +{}\n", "(".repeat(depth), ")".repeat(depth)),
    );
    write(temp.path(), "ok.lua", "function M.run() helper() end\n");

    let outcome = Scanner::new(sequential_config())
        .scan(&ScanRequest::new(temp.path()))
        .unwrap();

    assert_eq!(outcome.status_of("/deep.lua"), Some(FileStatus::SyntaxError));
    assert_eq!(outcome.status_of("/ok.lua"), Some(FileStatus::Success));
    assert_eq!(outcome.network.edge("ok.run", "helper"), Some(Action::Call));
}

/// Cancels the scan as soon as the first file is reported.
struct CancelOnFirstFile(CancelToken);

impl ScanObserver for CancelOnFirstFile {
    fn on_file(&self, _record: &FileScanRecord) {
        self.0.cancel();
    }
}

#[test]
fn test_cancel_during_dispatch_keeps_partial_outcome() {
    let temp = TempDir::new().unwrap();
    let total = 40;
    for i in 0..total {
        write(
            temp.path(),
            &format!("mod{i}.lua"),
            format!("function M.f{i}() helper{i}() end\n"),
        );
    }

    for parallel in [false, true] {
        let out = TempDir::new().unwrap();
        let artifact = out.path().join("graph.json");
        let config = ScanConfig {
            parallel,
            parallel_threshold: 0,
            parallel_threads: 4,
            channel_size: 2,
            ..ScanConfig::default()
        };
        let cancel = CancelToken::new();

        let outcome = Scanner::new(config)
            .scan_with(
                &ScanRequest::new(temp.path())
                    .parallel(parallel)
                    .artifact(&artifact),
                &CancelOnFirstFile(cancel.clone()),
                &cancel,
            )
            .unwrap();

        assert!(outcome.cancelled, "parallel: {parallel}");
        assert!(!outcome.records.is_empty(), "parallel: {parallel}");
        assert!(outcome.records.len() < total, "parallel: {parallel}");
        assert!(!artifact.exists(), "parallel: {parallel}");
    }
}
