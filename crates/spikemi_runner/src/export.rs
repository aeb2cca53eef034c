use anyhow::Context;
use csv::Writer;
use spikemi_core::{AnalysisResults, CurveKind};
use std::io;
use std::path::Path;

const HEADER: [&str; 4] = [
    "alphabet_size",
    "direct_plugin",
    "decoded_plugin",
    "decoded_qe",
];

/// Writes the three MI curves side by side, one row per alphabet size.
///
/// Sizes a curve does not cover are left empty.
pub fn write_curves<W: io::Write>(results: &AnalysisResults, out: W) -> anyhow::Result<()> {
    let mut wtr = Writer::from_writer(out);
    wtr.write_record(HEADER)?;
    let max_size = CurveKind::ALL
        .iter()
        .map(|&k| results.curve(k).max_alphabet_size())
        .max()
        .unwrap_or(0);
    for size in 1..=max_size {
        let mut row = vec![size.to_string()];
        row.extend(CurveKind::ALL.iter().map(|&k| {
            results
                .curve(k)
                .at(size)
                .map(|mi| format!("{mi:.6}"))
                .unwrap_or_default()
        }));
        wtr.write_record(&row)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn export_csv(results: &AnalysisResults, path: &Path) -> anyhow::Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("creating {}", path.display()))?;
    write_curves(results, file)
}
