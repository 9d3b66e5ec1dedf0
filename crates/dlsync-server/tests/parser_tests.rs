//! Datalog parsing against files on disk

use dlsync_common::types::{AgingPhase, FileKind, SystemFamily, TestOutcome};
use dlsync_server::parser::LogParser;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn write_log(prefix: &Path, relative: &str, content: &[u8]) -> PathBuf {
    let path = prefix.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_process_log_with_failing_suite() {
    let temp = TempDir::new().unwrap();
    let file = write_log(
        temp.path(),
        "3051_DATA/202402/JD/20240212_q7_LW/A17.txt",
        b"header\n= Started Testsuite FOO =\nmeasure 1\nresult: failed\n== Ended Testsuite FOO ==\nfooter\n",
    );

    let record = LogParser::new()
        .unwrap()
        .parse(&file, None, temp.path(), SystemFamily::Adv93000, "V93K-01")
        .unwrap();

    assert_eq!(record.aging_phase, AgingPhase::Qualification);
    assert_eq!(record.qualification_group.as_deref(), Some("q7"));
    assert_eq!(record.temperature, None);
    assert_eq!(record.tester_abbr, "LW");
    assert_eq!(record.chip_id, "A17");
    assert_eq!(record.file_kind, FileKind::Process);
    assert_eq!(record.surface_result, TestOutcome::Passed);
    assert_eq!(record.real_result, Some(TestOutcome::Failed));
    assert!(!record.content_error);
    assert_eq!(record.test_suites, Some(BTreeSet::from(["FOO".to_string()])));
    assert!(record.verdict_mismatch());
}

#[test]
fn test_qualification_log_without_a_group_token() {
    let temp = TempDir::new().unwrap();
    let file = write_log(
        temp.path(),
        "3051_DATA/202402/JD/20240212_LW/A18.txt",
        b"header\n= Started Testsuite FOO =\nresult: passed\n== Ended Testsuite FOO ==\n",
    );

    let record = LogParser::new()
        .unwrap()
        .parse(&file, None, temp.path(), SystemFamily::Adv93000, "V93K-01")
        .expect("two-token JD folders are valid datalogs");

    assert_eq!(record.aging_phase, AgingPhase::Qualification);
    assert_eq!(record.qualification_group.as_deref(), Some("LW"));
    assert_eq!(record.tester_abbr, "LW");
    assert_eq!(record.chip_id, "A18");
}

#[test]
fn test_report_log_collects_every_suite() {
    let temp = TempDir::new().unwrap();
    let file = write_log(
        temp.path(),
        "3051_DATA/202402/laolianqian/20240212_LW/17_x.txt",
        b"Test Suite Continuity PASSED\nTest Suite Leakage FAILED\nTest Suite Functional PASSED\n",
    );

    let record = LogParser::new()
        .unwrap()
        .parse(&file, None, temp.path(), SystemFamily::Adv93000, "V93K-01")
        .unwrap();

    assert_eq!(record.file_kind, FileKind::Report);
    assert_eq!(record.real_result, Some(TestOutcome::Failed));
    assert_eq!(record.test_suite_count(), 3);
}

#[test]
fn test_bin_table_single_and_double_header() {
    let temp = TempDir::new().unwrap();
    let parser = LogParser::new().unwrap();
    let table = "   Site   Sort   Bin\n   ----   ----   ---\n     0      1      1\n";

    let single = write_log(
        temp.path(),
        "2910_DATA/202301/laolianhou/20230322/20230323_25C_ZS/1.txt",
        table.as_bytes(),
    );
    let record = parser
        .parse(&single, None, temp.path(), SystemFamily::UltraFlex, "UF-01")
        .unwrap();
    assert_eq!(record.real_result, Some(TestOutcome::Passed));
    assert!(!record.content_error);
    assert_eq!(record.temperature, Some(25));

    let double = write_log(
        temp.path(),
        "2910_DATA/202301/laolianhou/20230322/20230323_25C_ZS/2.txt",
        format!("{table}{table}").as_bytes(),
    );
    let record = parser
        .parse(&double, None, temp.path(), SystemFamily::UltraFlex, "UF-01")
        .unwrap();
    assert!(record.content_error);
    // Path-derived fields survive a content error
    assert_eq!(record.chip_id, "2");
    assert_eq!(record.batch, "202301");
    assert_eq!(record.aging_phase, AgingPhase::PostBurnIn);
}

#[test]
fn test_reparse_is_identical_except_timestamp() {
    let temp = TempDir::new().unwrap();
    let file = write_log(
        temp.path(),
        "2910_DATA/202301/laolianhou/20230322/20230323_-40C_ZS/9_failed.txt",
        b"   Site Sort Bin\n   ---\n   0 3 7\n",
    );
    let parser = LogParser::new().unwrap();

    let first = parser
        .parse(&file, Some("/vol/old/9_failed.txt"), temp.path(), SystemFamily::J750, "J750-01")
        .unwrap();
    let mut second = parser
        .parse(&file, Some("/vol/old/9_failed.txt"), temp.path(), SystemFamily::J750, "J750-01")
        .unwrap();
    second.created_at = first.created_at;

    assert_eq!(first, second);
    assert_eq!(first.temperature, Some(-40));
    assert_eq!(first.real_result, Some(TestOutcome::Failed));
}

#[test]
fn test_paths_outside_layout_yield_nothing() {
    let temp = TempDir::new().unwrap();
    let parser = LogParser::new().unwrap();

    for relative in [
        "notes/readme.txt",
        "2910_DATA/202301/laolianqian/20230110_ZS/88.log",
        "2910_DATA/202301/laolianhou/20230110_25C_ZS/88.txt",
    ] {
        let file = write_log(temp.path(), relative, b"   Site Sort Bin\n---\n 0 1 1\n");
        assert!(
            parser
                .parse(&file, None, temp.path(), SystemFamily::J750, "J750-01")
                .is_none(),
            "{relative} should not parse"
        );
    }
}
