mod common;

use std::fs;

use predicates::prelude::*;
use predicates::str::contains;

use common::{TERMOS_FILE, TestWorkspace, facets, fixture_path};

#[test]
fn probe_reports_kinds_and_roles() {
    facets()
        .args(["probe", "-i"])
        .arg(fixture_path(TERMOS_FILE))
        .assert()
        .success()
        .stdout(contains("MUNICÍPIOS"))
        .stdout(contains("municipality"))
        .stdout(contains("numeric"))
        .stdout(contains("date"))
        .stdout(contains("Unnamed").not());
}

#[test]
fn probe_json_includes_fingerprint_and_overview() {
    let output = facets()
        .args(["probe", "--json", "-i"])
        .arg(fixture_path(TERMOS_FILE))
        .output()
        .expect("run probe");
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(report["overview"]["rows"], 6);
    assert_eq!(report["overview"]["columns"], 5);
    assert_eq!(report["report"]["dropped_columns"][0], "Unnamed: 0");
    assert_eq!(report["fingerprint"].as_str().map(str::len), Some(64));
}

#[test]
fn filter_by_role_renders_matching_rows() {
    facets()
        .args(["filter", "--table", "--filter", "municipality=Natal", "-i"])
        .arg(fixture_path(TERMOS_FILE))
        .assert()
        .success()
        .stdout(contains("Natal"))
        .stdout(contains("Mossoró").not())
        .stdout(contains("2024-05-05"));
}

#[test]
fn filter_exports_with_bom_in_column_order() {
    let workspace = TestWorkspace::new();
    let output = workspace.path().join("natal.csv");
    facets()
        .args(["filter", "--filter", "MUNICÍPIOS=Natal", "-i"])
        .arg(fixture_path(TERMOS_FILE))
        .arg("-o")
        .arg(&output)
        .assert()
        .success();
    let bytes = fs::read(&output).expect("read export");
    assert!(bytes.starts_with(b"\xEF\xBB\xBF"));
    let text = String::from_utf8(bytes[3..].to_vec()).expect("utf8");
    let lines = text.lines().collect::<Vec<_>>();
    assert_eq!(
        lines[0],
        "MUNICÍPIOS,ESFERA,STATUS GERAL RECEBIMENTO,index,DATA DA INSTALAÇÃO"
    );
    assert_eq!(lines[1], "Natal,Estadual,Received,10,2024-01-15");
    assert_eq!(lines[2], "Natal,Municipal,Received,,2024-02-03");
    assert_eq!(lines.len(), 4);
}

#[test]
fn range_filter_excludes_nulls_and_projects_columns() {
    facets()
        .args([
            "filter",
            "--no-bom",
            "--filter",
            "index=..20",
            "-C",
            "municipality,index",
            "-i",
        ])
        .arg(fixture_path(TERMOS_FILE))
        .assert()
        .success()
        .stdout("MUNICÍPIOS,index\nNatal,10\nMossoró,20\n");
}

#[test]
fn empty_match_is_not_an_error() {
    facets()
        .args(["filter", "--no-bom", "--filter", "ESFERA=Distrital", "-i"])
        .arg(fixture_path(TERMOS_FILE))
        .assert()
        .success()
        .stdout("MUNICÍPIOS,ESFERA,STATUS GERAL RECEBIMENTO,index,DATA DA INSTALAÇÃO\n");
}

#[test]
fn controls_list_choices_and_ranges() {
    facets()
        .args(["filter", "--controls", "-i"])
        .arg(fixture_path(TERMOS_FILE))
        .assert()
        .success()
        .stdout(contains("Natal | Mossoró | Caicó | Parnamirim"))
        .stdout(contains("10..50 (+unknown)"))
        .stdout(contains("2024-01 | 2024-02 | 2024-04 | 2024-05"));
}

#[test]
fn frequency_counts_include_unknown_bucket() {
    facets()
        .args(["frequency", "-C", "status", "-i"])
        .arg(fixture_path(TERMOS_FILE))
        .assert()
        .success()
        .stdout(contains("Received"))
        .stdout(contains("50.00%"))
        .stdout(contains("unknown"));
}

#[test]
fn frequency_json_honours_filters_and_top() {
    let output = facets()
        .args([
            "frequency",
            "--json",
            "--top",
            "1",
            "-C",
            "status",
            "--filter",
            "ESFERA=Estadual",
            "-i",
        ])
        .arg(fixture_path(TERMOS_FILE))
        .output()
        .expect("run frequency");
    assert!(output.status.success());
    let views: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(views[0]["total"], 3);
    assert_eq!(views[0]["buckets"].as_array().map(Vec::len), Some(1));
    assert_eq!(views[0]["buckets"][0]["label"], "Received");
}

#[test]
fn stats_summarize_numeric_columns() {
    facets()
        .args(["stats", "-i"])
        .arg(fixture_path(TERMOS_FILE))
        .assert()
        .success()
        .stdout(contains("index"))
        .stdout(contains("std_dev"))
        .stdout(contains("30"));
}

#[test]
fn stats_reject_text_columns() {
    facets()
        .args(["stats", "-C", "ESFERA", "-i"])
        .arg(fixture_path(TERMOS_FILE))
        .assert()
        .failure()
        .stderr(contains("not numeric"));
}

#[test]
fn trend_projects_following_months() {
    facets()
        .args([
            "trend",
            "-d",
            "installation_date",
            "--window",
            "2",
            "--horizon",
            "1",
            "-i",
        ])
        .arg(fixture_path(TERMOS_FILE))
        .assert()
        .success()
        .stdout(contains("2024-04"))
        .stdout(contains("2024-06"))
        .stdout(contains("projected"));
}

#[test]
fn unknown_role_exits_with_column_list() {
    facets()
        .args(["filter", "--filter", "hospital=Santa Casa", "-i"])
        .arg(fixture_path(TERMOS_FILE))
        .assert()
        .code(2)
        .stderr(contains("available columns"))
        .stderr(contains("'ESFERA'"));
}

#[test]
fn named_sources_come_from_config() {
    let workspace = TestWorkspace::new();
    let config = workspace.write_config(&[("termos", &fixture_path(TERMOS_FILE))]);
    facets()
        .arg("--config")
        .arg(&config)
        .arg("sources")
        .assert()
        .success()
        .stdout(contains("termos"))
        .stdout(contains("UTF-8"));
    facets()
        .arg("--config")
        .arg(&config)
        .args(["frequency", "--source", "termos", "-C", "sphere"])
        .assert()
        .success()
        .stdout(contains("Estadual"));
}

#[test]
fn missing_source_name_is_reported() {
    let workspace = TestWorkspace::new();
    let config = workspace.write_config(&[]);
    facets()
        .arg("--config")
        .arg(&config)
        .args(["probe", "--source", "nope"])
        .assert()
        .failure()
        .stderr(contains("nope"));
}

#[test]
fn reads_legacy_encoded_semicolon_input_from_stdin() {
    let (encoded, _, _) =
        encoding_rs::WINDOWS_1252.encode("SITUAÇÃO;CIDADE\nAtivo;Açu\nInativo;Assú\n");
    facets()
        .args([
            "filter",
            "--table",
            "--delimiter",
            ";",
            "--input-encoding",
            "windows-1252",
            "--filter",
            "situation=Ativo",
            "-i",
            "-",
        ])
        .write_stdin(encoded.into_owned())
        .assert()
        .success()
        .stdout(contains("Açu"))
        .stdout(contains("Assú").not());
}

#[test]
fn numeric_value_filter_ignores_spelling() {
    facets()
        .args([
            "filter",
            "--no-bom",
            "--filter",
            "index=10.0",
            "-C",
            "municipality,index",
            "-i",
        ])
        .arg(fixture_path(TERMOS_FILE))
        .assert()
        .success()
        .stdout("MUNICÍPIOS,index\nNatal,10\n");
}
