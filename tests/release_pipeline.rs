use std::fs;
use tempfile::tempdir;
use zipforge::release::{
    hash, CopyDistributor, GpgSigner, Hasher, ReleaseOptions, ReleasePipeline, Sha256Hasher, Sha256Verifier, Verifier,
};
use zipforge::{ArchiveBuilder, BuildJob, ReleaseError};

fn built_archive(dir: &std::path::Path) -> std::path::PathBuf {
    let src = dir.join("src");
    fs::create_dir_all(src.join("bin")).unwrap();
    fs::write(src.join("README"), b"read me").unwrap();
    fs::write(src.join("bin/tool"), vec![7u8; 10_000]).unwrap();
    let report = ArchiveBuilder::new().build(&BuildJob::new(&src, dir.join("release.zip"))).unwrap();
    report.archive_path
}

#[test]
fn hash_copy_and_verify_a_built_archive() {
    let work = tempdir().unwrap();
    let share = tempdir().unwrap();
    let archive = built_archive(work.path());

    let options = ReleaseOptions {
        hash: true,
        copy_to: Some(share.path().to_path_buf()),
        verify_target: true,
        ..Default::default()
    };
    let outcome = ReleasePipeline::from_options(&options).run(&archive).unwrap();

    let digest = outcome.digest.unwrap();
    assert_eq!(digest.path, work.path().join("release.zip.sha256"));
    assert_eq!(digest.hex.len(), 64);
    let sidecar = fs::read_to_string(&digest.path).unwrap();
    assert_eq!(sidecar, format!("{}  release.zip\n", digest.hex));

    assert_eq!(outcome.copied, vec![share.path().join("release.zip"), share.path().join("release.zip.sha256")]);
    assert!(outcome.verified);
}

#[test]
fn corrupted_copy_fails_verification() {
    let work = tempdir().unwrap();
    let share = tempdir().unwrap();
    let archive = built_archive(work.path());

    let record = Sha256Hasher.hash(&archive).unwrap();
    fs::copy(&archive, share.path().join("release.zip")).unwrap();
    fs::copy(&record.path, share.path().join("release.zip.sha256")).unwrap();
    fs::write(share.path().join("release.zip"), b"truncated").unwrap();

    let err = Sha256Verifier::new(share.path()).verify("release.zip").unwrap_err();
    match err {
        ReleaseError::HashMismatch { expected, actual } => {
            assert_eq!(expected, record.hex);
            assert_ne!(actual, expected);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn missing_signing_tool_stops_the_pipeline_before_copying() {
    let work = tempdir().unwrap();
    let share = tempdir().unwrap();
    let archive = built_archive(work.path());

    let result = ReleasePipeline::new()
        .hasher(Sha256Hasher)
        .signer(GpgSigner::with_program("zipforge-no-such-gpg"))
        .distributor(CopyDistributor::new(share.path(), None))
        .run(&archive);

    assert!(matches!(result, Err(ReleaseError::Io { .. })));
    assert!(hash::digest_path(&archive).exists());
    assert_eq!(fs::read_dir(share.path()).unwrap().count(), 0);
}

#[test]
fn plan_touches_nothing() {
    let work = tempdir().unwrap();
    let archive = work.path().join("never-built.zip");
    let options = ReleaseOptions { hash: true, sign: true, ..Default::default() };

    let steps = ReleasePipeline::from_options(&options).plan(&archive);

    assert_eq!(steps.len(), 2);
    assert!(!hash::digest_path(&archive).exists());
}
