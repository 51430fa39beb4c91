use rand::{thread_rng, Rng};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use tempfile::tempdir;
use zip::ZipArchive;
use zipforge::{ArchiveBuilder, BuildError, BuildJob, CompressionMode, ErrorKind, LayoutPolicy, Verdict};

// ---------- helpers ----------
fn write_file(root: &Path, rel: &str, content: &[u8]) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    File::create(&path).unwrap().write_all(content).unwrap();
}

fn create_test_tree(root: &Path) {
    let mut rng = thread_rng();
    for i in 0..24 {
        let size = rng.gen_range(0..20_000);
        let mut buf = vec![0u8; size];
        rng.fill(&mut buf[..]);
        let rel = match i % 3 {
            0 => format!("file_{i}.bin"),
            1 => format!("nested/file_{i}.bin"),
            _ => format!("nested/deeper/file_{i}.txt"),
        };
        write_file(root, &rel, &buf);
    }
}

/// Entry name → decompressed content.
fn read_archive(path: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
    let mut entries = BTreeMap::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).unwrap();
        let mut buf = Vec::new();
        entry.read_to_end(&mut buf).unwrap();
        entries.insert(entry.name().to_string(), buf);
    }
    entries
}

fn names(path: &Path) -> Vec<String> {
    read_archive(path).into_keys().collect()
}

fn build(job: &BuildJob) -> zipforge::BuildReport {
    ArchiveBuilder::new().build(job).unwrap()
}

// ---------- scenarios ----------

#[test]
fn one_entry_per_regular_file_with_forward_slashes() {
    let src = tempdir().unwrap();
    let out = tempdir().unwrap();
    create_test_tree(src.path());
    let zip = out.path().join("tree.zip");

    let report = build(&BuildJob::new(src.path(), &zip).workers(4));

    let entries = names(&zip);
    assert_eq!(report.file_count, 24);
    assert_eq!(entries.len(), 24);
    assert!(entries.iter().all(|n| !n.contains('\\') && !n.starts_with('/')));
    assert!(entries.contains(&"nested/deeper/file_2.txt".to_string()));
    assert!(report.failed_files.is_empty());
}

#[test]
fn round_trip_reproduces_content() {
    let src = tempdir().unwrap();
    let out = tempdir().unwrap();
    create_test_tree(src.path());

    for mode in [CompressionMode::Store, CompressionMode::Fastest, CompressionMode::Default, CompressionMode::Best] {
        let zip = out.path().join(format!("{mode:?}.zip"));
        build(&BuildJob::new(src.path(), &zip).compression(mode).workers(3));
        for (name, content) in read_archive(&zip) {
            let original = fs::read(src.path().join(&name)).unwrap();
            assert_eq!(content, original, "content mismatch for {name} ({mode:?})");
        }
    }
}

#[test]
fn exclusions_scenario() {
    let src = tempdir().unwrap();
    let out = tempdir().unwrap();
    write_file(src.path(), "a.txt", b"alpha");
    write_file(src.path(), "b/log.txt", b"noise");
    write_file(src.path(), "b/keep.txt", b"keep");
    let zip = out.path().join("out.zip");

    let report = build(&BuildJob::new(src.path(), &zip).exclude("**/log.txt"));

    assert_eq!(names(&zip), vec!["a.txt", "b/keep.txt"]);
    assert_eq!(report.file_count, 2);
    assert_eq!(report.verdict(false), Verdict::Success);
}

#[test]
fn no_entry_matches_an_exclusion() {
    let src = tempdir().unwrap();
    let out = tempdir().unwrap();
    create_test_tree(src.path());
    write_file(src.path(), ".git/HEAD", b"ref: refs/heads/main");
    write_file(src.path(), "nested/debug.log", b"log");
    let zip = out.path().join("out.zip");

    build(&BuildJob::new(src.path(), &zip).exclude("**/*.log").exclude(".git/**").exclude("**/*.txt"));

    let entries = names(&zip);
    assert_eq!(entries.len(), 16);
    assert!(entries.iter().all(|n| n.ends_with(".bin")));
}

#[test]
fn single_worker_builds_are_byte_identical() {
    let src = tempdir().unwrap();
    let out = tempdir().unwrap();
    create_test_tree(src.path());
    let first = out.path().join("first.zip");
    let second = out.path().join("second.zip");

    build(&BuildJob::new(src.path(), &first).workers(1));
    build(&BuildJob::new(src.path(), &second).workers(1));

    assert_eq!(fs::read(&first).unwrap(), fs::read(&second).unwrap());
}

#[test]
fn worker_count_does_not_change_content() {
    let src = tempdir().unwrap();
    let out = tempdir().unwrap();
    create_test_tree(src.path());

    let baseline = out.path().join("w1.zip");
    build(&BuildJob::new(src.path(), &baseline).workers(1));
    let expected = read_archive(&baseline);

    for workers in [2, 4, 8] {
        let zip = out.path().join(format!("w{workers}.zip"));
        build(&BuildJob::new(src.path(), &zip).workers(workers));
        assert_eq!(read_archive(&zip), expected, "content differs with {workers} workers");
    }
}

#[test]
fn sorted_layout_is_byte_identical_for_any_worker_count() {
    let src = tempdir().unwrap();
    let out = tempdir().unwrap();
    create_test_tree(src.path());

    let baseline = out.path().join("w1.zip");
    build(&BuildJob::new(src.path(), &baseline).workers(1).layout(LayoutPolicy::Sorted));
    let expected = fs::read(&baseline).unwrap();

    for workers in [2, 5, 16] {
        let zip = out.path().join(format!("w{workers}.zip"));
        build(&BuildJob::new(src.path(), &zip).workers(workers).layout(LayoutPolicy::Sorted));
        assert_eq!(fs::read(&zip).unwrap(), expected, "bytes differ with {workers} workers");
    }

    let mut archive = ZipArchive::new(File::open(&baseline).unwrap()).unwrap();
    let order: Vec<String> = (0..archive.len()).map(|i| archive.by_index_raw(i).unwrap().name().to_string()).collect();
    let mut sorted = order.clone();
    sorted.sort();
    assert_eq!(order, sorted);
}

#[test]
fn single_file_source_uses_base_name() {
    let src = tempdir().unwrap();
    let out = tempdir().unwrap();
    write_file(src.path(), "deep/dir/report.csv", b"a,b,c\n1,2,3\n");
    let zip = out.path().join("single.zip");

    let report = build(&BuildJob::new(src.path().join("deep/dir/report.csv"), &zip).exclude("*.csv"));

    assert_eq!(report.file_count, 1);
    let entries = read_archive(&zip);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries["report.csv"], b"a,b,c\n1,2,3\n");
}

#[test]
fn empty_directory_produces_empty_archive() {
    let src = tempdir().unwrap();
    let out = tempdir().unwrap();
    fs::create_dir_all(src.path().join("only/dirs")).unwrap();
    let zip = out.path().join("empty.zip");

    let report = build(&BuildJob::new(src.path(), &zip));

    assert_eq!(report.file_count, 0);
    assert!(zip.exists());
    assert!(read_archive(&zip).is_empty());
}

#[cfg(unix)]
#[test]
fn unreadable_file_is_skipped_and_reported() {
    use std::os::unix::fs::PermissionsExt;

    let src = tempdir().unwrap();
    let out = tempdir().unwrap();
    for i in 0..100 {
        write_file(src.path(), &format!("f{i:03}.txt"), format!("file {i}").as_bytes());
    }
    let locked = src.path().join("f042.txt");
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
    if File::open(&locked).is_ok() {
        // Running with privileges that bypass file modes.
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o644)).unwrap();
        return;
    }

    let zip = out.path().join("lenient.zip");
    let report = build(&BuildJob::new(src.path(), &zip).workers(4));
    assert_eq!(report.file_count, 99);
    assert_eq!(report.failed_files.len(), 1);
    assert_eq!(report.failed_files[0].relative_path, "f042.txt");
    assert_eq!(report.verdict(false), Verdict::SuccessWithWarnings);
    assert!(!names(&zip).contains(&"f042.txt".to_string()));

    let strict_job = BuildJob::new(src.path(), out.path().join("strict.zip")).workers(4).strict(true);
    let strict = build(&strict_job);
    assert_eq!(strict.verdict(strict_job.strict), Verdict::Failure);

    fs::set_permissions(&locked, fs::Permissions::from_mode(0o644)).unwrap();
}

#[test]
fn configuration_errors_precede_any_output() {
    let src = tempdir().unwrap();
    let out = tempdir().unwrap();
    write_file(src.path(), "a.txt", b"a");
    let zip = out.path().join("out.zip");

    let cases = [
        BuildJob::new(src.path().join("missing"), &zip),
        BuildJob::new(src.path(), &zip).workers(0),
        BuildJob::new(src.path(), &zip).exclude("src/[unclosed"),
    ];
    for job in &cases {
        let err = ArchiveBuilder::new().build(job).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration, "{err}");
    }
    assert!(!zip.exists());
}

#[test]
fn aborted_build_leaves_no_archive() {
    let src = tempdir().unwrap();
    let out = tempdir().unwrap();
    create_test_tree(src.path());
    let zip = out.path().join("aborted.zip");

    let builder = ArchiveBuilder::new();
    builder.abort_handle().abort();
    let err = builder.build(&BuildJob::new(src.path(), &zip).workers(2)).unwrap_err();

    assert!(matches!(err, BuildError::Aborted));
    assert!(!zip.exists());
    assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0, "temporary file left behind");
}

#[test]
fn abort_during_build_stops_workers_and_publishes_nothing() {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    let src = tempdir().unwrap();
    let out = tempdir().unwrap();
    for i in 0..200 {
        write_file(src.path(), &format!("f{i:03}.txt"), format!("file {i}").repeat(50).as_bytes());
    }
    let zip = out.path().join("cancelled.zip");

    let builder = ArchiveBuilder::new().progress_interval(Duration::ZERO);
    let abort = builder.abort_handle();
    let processed = Arc::new(AtomicU64::new(0));
    let seen = processed.clone();
    let builder = builder.with_progress(move |state| {
        seen.fetch_max(state.processed_files, Ordering::SeqCst);
        if state.processed_files >= 3 {
            abort.abort();
        }
    });

    let err = builder.build(&BuildJob::new(src.path(), &zip).workers(2)).unwrap_err();

    assert!(matches!(err, BuildError::Aborted), "{err}");
    assert!(processed.load(Ordering::SeqCst) < 200, "workers drained the whole queue");
    assert!(!zip.exists());
    assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0, "temporary file left behind");
}

#[test]
fn unwritable_output_directory_is_a_configuration_error() {
    let src = tempdir().unwrap();
    let out = tempdir().unwrap();
    write_file(src.path(), "a.txt", b"a");

    let err = ArchiveBuilder::new()
        .build(&BuildJob::new(src.path(), out.path().join("missing/dir/out.zip")))
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Configuration, "{err}");
}

#[test]
fn progress_reaches_completion() {
    use std::sync::{Arc, Mutex};

    let src = tempdir().unwrap();
    let out = tempdir().unwrap();
    create_test_tree(src.path());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();

    ArchiveBuilder::new()
        .with_progress(move |state| sink.lock().unwrap().push(state))
        .build(&BuildJob::new(src.path(), out.path().join("p.zip")).workers(3))
        .unwrap();

    let seen = seen.lock().unwrap();
    let last = seen.last().expect("no progress emitted");
    assert_eq!(last.processed_files, 24);
    assert_eq!(last.total_files, 24);
    assert!(last.progress_percent >= 100.0);
}
