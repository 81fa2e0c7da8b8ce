//! Commit reconciliation: shadow state, out-of-band changes, and conflict
//! degradation.

use std::fs;
use std::path::Path;

use walkdir::WalkDir;

use fileset_config::testing::TestEnvironment;
use fileset_core::{AddOptions, Environment, Fileset};

fn setup() -> (TestEnvironment, Environment) {
    let test_env = TestEnvironment::new().unwrap();
    let env = Environment::from_config(&test_env.config()).unwrap();
    (test_env, env)
}

fn ingest_assets(test_env: &TestEnvironment, env: &Environment) -> Fileset {
    test_env
        .create_file_stamped("file1.md", b"this is a file", 1_714_000_001_000)
        .unwrap();
    test_env
        .create_file_stamped("dir1/file3.md", b"a nested file", 1_714_000_003_000)
        .unwrap();
    env.new_fileset()
        .add_directory(&test_env.source_root, &AddOptions::new())
        .unwrap()
}

fn list_files(dir: &Path) -> Vec<String> {
    let mut files: Vec<String> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            e.path()
                .strip_prefix(dir)
                .unwrap()
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/")
        })
        .collect();
    files.sort();
    files
}

#[test]
fn test_commit_returns_the_fileset() {
    let (test_env, env) = setup();
    let fileset = ingest_assets(&test_env, &env);
    let target = test_env.new_dir("target").unwrap();

    let committed = fileset.commit(&target).unwrap();
    assert_eq!(committed.checksum(true), fileset.checksum(true));
}

#[test]
fn test_committed_files_are_readonly_hard_links() {
    let (test_env, env) = setup();
    let fileset = ingest_assets(&test_env, &env);
    let target = test_env.new_dir("target").unwrap();
    fileset.commit(&target).unwrap();

    let committed = target.join("file1.md");
    assert!(fs::metadata(&committed).unwrap().permissions().readonly());

    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        let blob = fileset.open_file("file1.md").unwrap().unwrap();
        assert_eq!(
            fs::metadata(&committed).unwrap().ino(),
            fs::metadata(&blob).unwrap().ino()
        );
    }
}

#[test]
fn test_recommit_is_idempotent() {
    let (test_env, env) = setup();
    let fileset = ingest_assets(&test_env, &env);
    let target = test_env.new_dir("target").unwrap();

    fileset.commit(&target).unwrap();
    fileset.commit(&target).unwrap();

    assert_eq!(list_files(&target), vec!["dir1/file3.md", "file1.md"]);
    assert_eq!(
        fs::read(target.join("file1.md")).unwrap(),
        b"this is a file"
    );
}

#[test]
fn test_out_of_band_file_is_reconciled_away() {
    let (test_env, env) = setup();
    let fileset = ingest_assets(&test_env, &env);
    let target = test_env.new_dir("target").unwrap();
    fileset.commit(&target).unwrap();

    // A stray file appears; the directory mtime moves, so the next commit
    // treats the actual contents as the previous state and restores the
    // fileset exactly. The mtime is stamped explicitly so the test does not
    // depend on the filesystem's tick resolution.
    fs::write(target.join("stray.txt"), b"not part of the fileset").unwrap();
    filetime::set_file_mtime(
        &target,
        filetime::FileTime::from_unix_time(2_000_000_000, 0),
    )
    .unwrap();
    fileset.commit(&target).unwrap();

    assert_eq!(list_files(&target), vec!["dir1/file3.md", "file1.md"]);
}

#[test]
fn test_conflicting_entry_is_dropped_and_commit_continues() {
    let (test_env, env) = setup();
    test_env.create_file("plain", b"file where a dir must go").unwrap();
    test_env.create_file("plain2", b"healthy sibling").unwrap();
    let fileset = env
        .new_fileset()
        .add_directory(&test_env.source_root, &AddOptions::new())
        .unwrap();
    // "plain" the file collides with "plain" the parent directory of the
    // renamed entry. Deep paths link first, so the nested entry lands and
    // the flat file is the one dropped.
    let conflicted = fileset
        .rename("plain2", "plain/nested.txt")
        .unwrap();

    let target = test_env.new_dir("target").unwrap();
    let committed = conflicted.commit(&target).unwrap();

    assert_eq!(list_files(&target), vec!["plain/nested.txt"]);
    assert!(committed.contains("plain/nested.txt"));
    assert!(!committed.contains("plain"));
}

#[test]
fn test_directory_in_place_of_file_is_a_conflict() {
    let (test_env, env) = setup();
    test_env.create_file("report", b"flat file").unwrap();
    test_env.create_file("other.md", b"fine").unwrap();
    let fileset = env
        .new_fileset()
        .add_directory(&test_env.source_root, &AddOptions::new())
        .unwrap();

    let target = test_env.new_dir("target").unwrap();
    fs::create_dir_all(target.join("report/contents")).unwrap();
    fs::write(target.join("report/contents/data"), b"occupied").unwrap();

    let committed = fileset.commit(&target).unwrap();
    assert!(committed.contains("other.md"));
    assert!(!committed.contains("report"));
    assert_eq!(fs::read(target.join("other.md")).unwrap(), b"fine");
}

#[test]
fn test_commit_to_nested_fresh_directory() {
    let (test_env, env) = setup();
    let fileset = ingest_assets(&test_env, &env);
    let target = test_env.new_dir("deep").unwrap().join("a/b/target");

    fileset.commit(&target).unwrap();
    assert_eq!(list_files(&target), vec!["dir1/file3.md", "file1.md"]);
}
