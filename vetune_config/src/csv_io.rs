//! CSV layouts for calibration tables and recorded telemetry.
//!
//! Table layout (row 0 = x axis, column 0 = y axis):
//! ```text
//! y\x,800,1500,3000
//! 100,80,85,90
//! 60,60,65,70
//! ```
//!
//! Telemetry layout: the required columns in any order, plus any extra
//! numeric channels. An empty cell in an extra column means "not reported".
//! Rows that fail to parse are skipped and counted rather than failing the
//! whole log.
//! ```text
//! timestamp_ms,rpm,load,afr,clt,tps,maf
//! 0,2500,60,14.9,85,22,31.5
//! ```
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::Path;

use vetune_traits::TelemetrySample;

/// Expected first header cell of a table CSV.
pub const TABLE_CORNER_HEADER: &str = "y\\x";

/// Columns every telemetry CSV must carry.
pub const TELEMETRY_REQUIRED_HEADERS: [&str; 6] =
    ["timestamp_ms", "rpm", "load", "afr", "clt", "tps"];

/// Raw table contents as read from disk; geometry is validated by the core.
#[derive(Debug, Clone, PartialEq)]
pub struct TableCsv {
    pub x_bins: Vec<f64>,
    pub y_bins: Vec<f64>,
    pub values: Vec<Vec<f64>>,
}

fn parse_f64(field: &str, what: &str, line: usize) -> eyre::Result<f64> {
    let v: f64 = field
        .trim()
        .parse()
        .map_err(|e| eyre::eyre!("line {line}: invalid {what} {field:?}: {e}"))?;
    if !v.is_finite() {
        eyre::bail!("line {line}: {what} must be finite, got {field:?}");
    }
    Ok(v)
}

pub fn parse_table_csv<R: Read>(reader: R) -> eyre::Result<TableCsv> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read table CSV headers: {e}"))?
        .clone();
    let mut cells = headers.iter();
    match cells.next() {
        Some(corner) if corner == TABLE_CORNER_HEADER => {}
        other => eyre::bail!(
            "table CSV must start with header '{TABLE_CORNER_HEADER}', got: {}",
            other.unwrap_or("<empty>")
        ),
    }
    let x_bins = cells
        .map(|c| parse_f64(c, "x bin", 1))
        .collect::<eyre::Result<Vec<_>>>()?;
    if x_bins.is_empty() {
        eyre::bail!("table CSV has no x bins");
    }

    let mut y_bins = Vec::new();
    let mut values = Vec::new();
    for (idx, rec) in rdr.records().enumerate() {
        let line = idx + 2;
        let rec = rec.map_err(|e| eyre::eyre!("invalid table CSV row {line}: {e}"))?;
        if rec.len() != x_bins.len() + 1 {
            eyre::bail!(
                "table CSV row {line} has {} columns, expected {}",
                rec.len(),
                x_bins.len() + 1
            );
        }
        let mut fields = rec.iter();
        let y = parse_f64(fields.next().unwrap_or_default(), "y bin", line)?;
        let row = fields
            .map(|c| parse_f64(c, "value", line))
            .collect::<eyre::Result<Vec<_>>>()?;
        y_bins.push(y);
        values.push(row);
    }
    if y_bins.is_empty() {
        eyre::bail!("table CSV has no rows");
    }

    Ok(TableCsv {
        x_bins,
        y_bins,
        values,
    })
}

pub fn load_table_csv(path: &Path) -> eyre::Result<TableCsv> {
    let f = std::fs::File::open(path)
        .map_err(|e| eyre::eyre!("open table CSV {:?}: {}", path, e))?;
    parse_table_csv(f).map_err(|e| e.wrap_err(format!("table CSV {}", path.display())))
}

pub fn write_table_csv(path: &Path, table: &TableCsv) -> eyre::Result<()> {
    let f = std::fs::File::create(path)
        .map_err(|e| eyre::eyre!("create table CSV {:?}: {}", path, e))?;
    write_table_csv_to(f, table)
}

/// Same layout as `write_table_csv`, to any writer (stdout, buffers).
pub fn write_table_csv_to<W: Write>(writer: W, table: &TableCsv) -> eyre::Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    let mut header = vec![TABLE_CORNER_HEADER.to_string()];
    header.extend(table.x_bins.iter().map(|x| x.to_string()));
    wtr.write_record(&header)?;
    for (y, row) in table.y_bins.iter().zip(&table.values) {
        let mut rec = vec![y.to_string()];
        rec.extend(row.iter().map(|v| v.to_string()));
        wtr.write_record(&rec)?;
    }
    wtr.flush()?;
    Ok(())
}

/// A parsed telemetry log.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetryLog {
    pub samples: Vec<TelemetrySample>,
    /// Extra channel columns named in the header, in file order.
    pub channels: Vec<String>,
    /// Rows dropped because a field could not be parsed.
    pub skipped_rows: usize,
}

/// Unparseable rows logged individually before the rest are only counted.
const SKIPPED_ROW_WARNINGS: usize = 5;

/// Numeric telemetry field. NaN and infinities pass through; the tuner
/// drops non-finite samples itself.
fn parse_reading(field: &str, what: &str) -> eyre::Result<f64> {
    field
        .trim()
        .parse()
        .map_err(|e| eyre::eyre!("invalid {what} {field:?}: {e}"))
}

fn parse_row(
    rec: &csv::StringRecord,
    required: &[usize; 6],
    tps_rate_col: Option<usize>,
    extra: &[(usize, &str)],
) -> eyre::Result<TelemetrySample> {
    let field = |i: usize| rec.get(i).unwrap_or("");
    let ts = field(required[0]);
    let timestamp_ms: u64 = ts
        .parse()
        .map_err(|e| eyre::eyre!("invalid timestamp_ms {ts:?}: {e}"))?;
    let tps_rate = match tps_rate_col.map(field) {
        Some(s) if !s.is_empty() => Some(parse_reading(s, "tps_rate")?),
        _ => None,
    };
    let mut channels = BTreeMap::new();
    for (i, name) in extra {
        let s = field(*i);
        if !s.is_empty() {
            channels.insert((*name).to_string(), parse_reading(s, name)?);
        }
    }
    Ok(TelemetrySample {
        timestamp_ms,
        rpm: parse_reading(field(required[1]), "rpm")?,
        load: parse_reading(field(required[2]), "load")?,
        afr: parse_reading(field(required[3]), "afr")?,
        clt: parse_reading(field(required[4]), "clt")?,
        tps: parse_reading(field(required[5]), "tps")?,
        tps_rate,
        channels,
    })
}

/// Parse a telemetry log. Header problems are fatal; a row that does not
/// parse is skipped and counted so one corrupt line cannot sink a session.
pub fn parse_telemetry_csv<R: Read>(reader: R) -> eyre::Result<TelemetryLog> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers: Vec<String> = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read telemetry CSV headers: {e}"))?
        .iter()
        .map(str::to_string)
        .collect();

    let position = |name: &str| headers.iter().position(|h| h == name);
    let mut required = [0usize; 6];
    for (slot, name) in required.iter_mut().zip(TELEMETRY_REQUIRED_HEADERS) {
        *slot = position(name).ok_or_else(|| {
            eyre::eyre!(
                "telemetry CSV must have headers {}, missing '{name}'",
                TELEMETRY_REQUIRED_HEADERS.join(",")
            )
        })?;
    }
    let tps_rate_col = position("tps_rate");
    let extra: Vec<(usize, &str)> = headers
        .iter()
        .enumerate()
        .filter(|(i, h)| !required.contains(i) && Some(*i) != tps_rate_col && !h.is_empty())
        .map(|(i, h)| (i, h.as_str()))
        .collect();

    let mut log = TelemetryLog {
        channels: extra.iter().map(|(_, name)| (*name).to_string()).collect(),
        ..TelemetryLog::default()
    };
    for (idx, rec) in rdr.records().enumerate() {
        let line = idx + 2;
        let parsed = rec
            .map_err(eyre::Report::from)
            .and_then(|rec| parse_row(&rec, &required, tps_rate_col, &extra));
        match parsed {
            Ok(sample) => log.samples.push(sample),
            Err(e) => {
                log.skipped_rows += 1;
                if log.skipped_rows <= SKIPPED_ROW_WARNINGS {
                    tracing::warn!(line, error = %e, "skipping unparseable telemetry row");
                } else if log.skipped_rows == SKIPPED_ROW_WARNINGS + 1 {
                    tracing::warn!(line, "further unparseable telemetry rows are skipped silently");
                }
            }
        }
    }
    if log.skipped_rows > 0 {
        tracing::info!(
            skipped = log.skipped_rows,
            kept = log.samples.len(),
            "telemetry log loaded with skipped rows"
        );
    }
    Ok(log)
}

pub fn load_telemetry_csv(path: &Path) -> eyre::Result<TelemetryLog> {
    let f = std::fs::File::open(path)
        .map_err(|e| eyre::eyre!("open telemetry CSV {:?}: {}", path, e))?;
    parse_telemetry_csv(f).map_err(|e| e.wrap_err(format!("telemetry CSV {}", path.display())))
}
