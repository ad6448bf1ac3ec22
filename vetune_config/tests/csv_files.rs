use std::fs::File;
use std::io::Write;

use rstest::rstest;
use tempfile::tempdir;
use vetune_config::{
    TableCsv, load_table_csv, load_telemetry_csv, parse_table_csv, parse_telemetry_csv,
    write_table_csv,
};

#[rstest]
fn table_csv_parses_axes_and_values() {
    let text = "y\\x,800,1500,3000\n100,80,85,90\n60,60,65,70\n";
    let t = parse_table_csv(text.as_bytes()).unwrap();
    assert_eq!(t.x_bins, vec![800.0, 1500.0, 3000.0]);
    assert_eq!(t.y_bins, vec![100.0, 60.0]);
    assert_eq!(t.values[1], vec![60.0, 65.0, 70.0]);
}

#[rstest]
#[case("rpm,800,1500\n100,1,2\n", "must start with header")]
#[case("y\\x,800,1500\n100,1\n", "has 2 columns, expected 3")]
#[case("y\\x,800,1500\n100,1,abc\n", "invalid value")]
#[case("y\\x,800,1500\n", "no rows")]
#[case("y\\x,800,1500\n100,1,NaN\n", "must be finite")]
fn table_csv_rejects_malformed(#[case] text: &str, #[case] needle: &str) {
    let err = parse_table_csv(text.as_bytes()).expect_err("should reject");
    assert!(format!("{err:#}").contains(needle), "{err:#}");
}

#[rstest]
fn table_csv_round_trips_through_disk() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ve.csv");
    let table = TableCsv {
        x_bins: vec![1000.0, 2000.0],
        y_bins: vec![30.0, 90.0],
        values: vec![vec![40.5, 50.0], vec![70.0, 82.25]],
    };
    write_table_csv(&path, &table).unwrap();
    assert_eq!(load_table_csv(&path).unwrap(), table);
}

#[rstest]
fn telemetry_csv_reads_required_and_extra_channels() {
    let text = "timestamp_ms,rpm,load,afr,clt,tps,tps_rate,maf\n\
                0,2500,60,14.9,85,22,,31.5\n\
                50,2550,61,15.0,85,23,4.0,\n";
    let log = parse_telemetry_csv(text.as_bytes()).unwrap();
    assert_eq!(log.channels, vec!["maf".to_string()]);
    assert_eq!(log.skipped_rows, 0);
    let samples = &log.samples;
    assert_eq!(samples.len(), 2);
    assert_eq!(samples[0].rpm, 2500.0);
    assert_eq!(samples[0].tps_rate, None);
    assert_eq!(samples[0].channels.get("maf"), Some(&31.5));
    assert_eq!(samples[1].timestamp_ms, 50);
    assert_eq!(samples[1].tps_rate, Some(4.0));
    assert!(samples[1].channels.is_empty());
}

#[rstest]
fn telemetry_csv_requires_headers() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("log.csv");
    let mut f = File::create(&path).unwrap();
    writeln!(f, "timestamp_ms,rpm,load,afr,clt").unwrap();
    writeln!(f, "0,2500,60,14.9,85").unwrap();
    let err = load_telemetry_csv(&path).expect_err("missing tps column");
    assert!(format!("{err:#}").contains("missing 'tps'"));
}

#[rstest]
fn telemetry_csv_skips_bad_rows_and_keeps_the_rest() {
    let text = "timestamp_ms,rpm,load,afr,clt,tps\n\
                0,2000,60,15.5,85,25\n\
                50,2000,60,rich,85,25\n\
                100,2000,60,nan,85,25\n\
                150,2000\n\
                200,2000,60,15.4,85,25\n";
    let log = parse_telemetry_csv(text.as_bytes()).unwrap();
    assert_eq!(log.skipped_rows, 2);
    let ts: Vec<u64> = log.samples.iter().map(|s| s.timestamp_ms).collect();
    assert_eq!(ts, vec![0, 100, 200]);
    // non-finite readings are left for the tuner to drop and count
    assert!(log.samples[1].afr.is_nan());
}

#[rstest]
fn telemetry_csv_reports_header_channels_even_when_first_row_is_blank() {
    let text = "timestamp_ms,rpm,load,afr,clt,tps,iat,maf\n\
                0,2500,60,14.9,85,22,30,\n\
                50,2500,60,14.9,85,22,30,41.0\n";
    let log = parse_telemetry_csv(text.as_bytes()).unwrap();
    assert!(!log.samples[0].channels.contains_key("maf"));
    assert_eq!(log.channels, vec!["iat".to_string(), "maf".to_string()]);
}
