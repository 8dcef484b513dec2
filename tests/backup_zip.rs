#[path = "../src/backup.rs"]
mod backup;

use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

#[test]
fn zip_export_and_import_roundtrip() {
    let workspace = temp_dir("gradebook-backup-src");
    let workspace2 = temp_dir("gradebook-backup-dst");
    let out_dir = temp_dir("gradebook-backup-out");

    let db_src = workspace.join("gradebook.sqlite3");
    let bytes = b"sqlite-test-payload";
    std::fs::write(&db_src, bytes).expect("write source db");
    std::fs::write(workspace2.join("gradebook.sqlite3-wal"), b"stale").expect("write stale wal");

    let bundle_path = out_dir.join("workspace.gradebook.zip");
    let export = backup::export_workspace_bundle(&workspace, &bundle_path).expect("export bundle");
    assert_eq!(export.bundle_format, backup::BUNDLE_FORMAT_V1);
    assert_eq!(export.entry_count, 2);
    assert_eq!(export.db_sha256.len(), 64);

    let f = File::open(&bundle_path).expect("open bundle");
    let mut archive = zip::ZipArchive::new(f).expect("open zip archive");
    let mut manifest = String::new();
    archive
        .by_name("manifest.json")
        .expect("manifest entry")
        .read_to_string(&mut manifest)
        .expect("read manifest");
    assert!(manifest.contains(backup::BUNDLE_FORMAT_V1));
    assert!(manifest.contains(&export.db_sha256));
    archive
        .by_name("db/gradebook.sqlite3")
        .expect("database entry in bundle");

    let import = backup::import_workspace_bundle(&bundle_path, &workspace2).expect("import bundle");
    assert_eq!(import.bundle_format_detected, backup::BUNDLE_FORMAT_V1);
    assert_eq!(import.db_sha256, export.db_sha256);

    let restored = std::fs::read(workspace2.join("gradebook.sqlite3")).expect("read restored db");
    assert_eq!(restored, bytes);
    assert!(!workspace2.join("gradebook.sqlite3-wal").exists());

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(workspace2);
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn tampered_database_entry_is_rejected() {
    let out_dir = temp_dir("gradebook-backup-tamper");
    let workspace = temp_dir("gradebook-backup-tamper-dst");
    std::fs::write(workspace.join("gradebook.sqlite3"), b"original").expect("write db");

    let bundle_path = out_dir.join("tampered.zip");
    {
        let f = File::create(&bundle_path).expect("create bundle");
        let mut zip = zip::ZipWriter::new(f);
        let opts = zip::write::FileOptions::default();
        zip.start_file("manifest.json", opts).expect("manifest");
        zip.write_all(
            format!(
                "{{\"format\":\"{}\",\"dbSha256\":\"{}\"}}",
                backup::BUNDLE_FORMAT_V1,
                "0".repeat(64)
            )
            .as_bytes(),
        )
        .expect("write manifest");
        zip.start_file("db/gradebook.sqlite3", opts).expect("db entry");
        zip.write_all(b"not the checksummed bytes").expect("write db");
        zip.finish().expect("finish");
    }

    let err = backup::import_workspace_bundle(&bundle_path, &workspace).expect_err("checksum");
    assert!(err.to_string().contains("checksum"));
    let kept = std::fs::read(workspace.join("gradebook.sqlite3")).expect("read db");
    assert_eq!(kept, b"original");

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn foreign_bundle_format_is_rejected() {
    let out_dir = temp_dir("gradebook-backup-format");
    let workspace = temp_dir("gradebook-backup-format-dst");

    let bundle_path = out_dir.join("other.zip");
    {
        let f = File::create(&bundle_path).expect("create bundle");
        let mut zip = zip::ZipWriter::new(f);
        zip.start_file("manifest.json", zip::write::FileOptions::default())
            .expect("manifest");
        zip.write_all(b"{\"format\":\"something-else\"}").expect("write manifest");
        zip.finish().expect("finish");
    }

    let err = backup::import_workspace_bundle(&bundle_path, &workspace).expect_err("format");
    assert!(err.to_string().contains("unsupported bundle format"));

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}
