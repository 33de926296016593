//! Result files written by the procedures.
//!
//! Scalar results are merged into one TOML document per procedure, so repeated analyses of the
//! same kind keep the keys they do not overwrite. Derived series go to CSV files, one column per
//! series.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::procedure::PlotSink;
use crate::{Error, Result};

#[derive(Clone, Debug)]
pub struct ResultsStore {
    directory: PathBuf,
}

impl ResultsStore {
    /// Open a store rooted at `directory`, creating it if needed
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created.
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.directory.join(format!("{name}.toml"))
    }

    /// Merge the fields of `record` into `<name>.toml`
    ///
    /// Keys already present in the file are replaced, others are kept.
    ///
    /// # Errors
    /// Returns an error if `record` does not serialize to a table or the file cannot be
    /// read or written.
    pub fn write_record<T: Serialize>(&self, name: &str, record: &T) -> Result<()> {
        let toml::Value::Table(update) = toml::Value::try_from(record)? else {
            return Err(Error::invalid(format!(
                "record `{name}` does not serialize to a table"
            )));
        };
        let mut table = self.read_record(name)?;
        table.extend(update);
        fs::write(self.record_path(name), toml::to_string(&table)?)?;
        Ok(())
    }

    /// Contents of `<name>.toml`, empty if the record was never written
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn read_record(&self, name: &str) -> Result<toml::Table> {
        let path = self.record_path(name);
        if !path.exists() {
            return Ok(toml::Table::new());
        }
        let contents = fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Write `columns` side by side to `<name>.csv`, replacing any earlier file
    ///
    /// Shorter columns are padded with empty cells.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn write_series(&self, name: &str, columns: &[(&str, &[f64])]) -> Result<()> {
        let mut writer = csv::Writer::from_path(self.directory.join(format!("{name}.csv")))?;
        writer.write_record(columns.iter().map(|(header, _)| *header))?;
        let rows = columns.iter().map(|(_, values)| values.len()).max().unwrap_or(0);
        for row in 0..rows {
            writer.write_record(
                columns
                    .iter()
                    .map(|(_, values)| values.get(row).map_or_else(String::new, f64::to_string)),
            )?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Plot sink writing every figure to `<plot>.csv` in long format
///
/// Each row holds the series label and one `(x, y)` pair, which is all a plotting front end
/// needs to redraw the figure.
#[derive(Clone, Debug)]
pub struct CsvPlotSink {
    directory: PathBuf,
}

impl CsvPlotSink {
    /// # Errors
    /// Returns an error if the directory cannot be created.
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;
        Ok(Self { directory })
    }
}

impl PlotSink for CsvPlotSink {
    fn draw(&mut self, plot: &str, series: &str, x: &[f64], y: &[f64]) -> Result<()> {
        if x.len() != y.len() {
            return Err(Error::invalid(format!(
                "series `{series}` of plot `{plot}` has {} x and {} y values",
                x.len(),
                y.len()
            )));
        }
        let path = self.directory.join(format!("{plot}.csv"));
        let fresh = !path.exists();
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if fresh {
            writer.write_record(["series", "x", "y"])?;
        }
        for (xx, yy) in x.iter().zip(y) {
            writer.write_record([series.to_owned(), xx.to_string(), yy.to_string()])?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde::Serialize;
    use tempdir::TempDir;

    use super::{CsvPlotSink, ResultsStore};
    use crate::procedure::PlotSink;
    use crate::Result;

    #[derive(Serialize)]
    struct First {
        slope: f64,
        label: String,
    }

    #[derive(Serialize)]
    struct Second {
        slope: f64,
        r_squared: f64,
    }

    #[test]
    fn records_are_merged() -> Result<()> {
        let dir = TempDir::new("records_are_merged")?;
        let store = ResultsStore::new(dir.path())?;

        store.write_record(
            "fit",
            &First {
                slope: 1.0,
                label: "first".into(),
            },
        )?;
        store.write_record(
            "fit",
            &Second {
                slope: 2.0,
                r_squared: 0.5,
            },
        )?;

        let table = store.read_record("fit")?;
        assert_eq!(table["slope"].as_float(), Some(2.0));
        assert_eq!(table["r_squared"].as_float(), Some(0.5));
        assert_eq!(table["label"].as_str(), Some("first"));
        Ok(())
    }

    #[test]
    fn missing_records_read_empty() -> Result<()> {
        let dir = TempDir::new("missing_records_read_empty")?;
        let store = ResultsStore::new(dir.path())?;
        assert!(store.read_record("nothing")?.is_empty());
        Ok(())
    }

    #[test]
    fn ragged_series_are_padded() -> Result<()> {
        let dir = TempDir::new("ragged_series_are_padded")?;
        let store = ResultsStore::new(dir.path())?;
        store.write_series("series", &[("a", &[1.0, 2.0, 3.0]), ("b", &[4.0])])?;

        let contents = std::fs::read_to_string(dir.path().join("series.csv"))?;
        let lines = contents.lines().collect::<Vec<_>>();
        assert_eq!(lines, vec!["a,b", "1,4", "2,", "3,"]);
        Ok(())
    }

    #[test]
    fn plot_series_are_appended() -> Result<()> {
        let dir = TempDir::new("plot_series_are_appended")?;
        let mut sink = CsvPlotSink::new(dir.path())?;
        sink.draw("nyquist", "measured", &[1.0, 2.0], &[-1.0, -2.0])?;
        sink.draw("nyquist", "fitted", &[1.5], &[-1.5])?;

        let contents = std::fs::read_to_string(dir.path().join("nyquist.csv"))?;
        let lines = contents.lines().collect::<Vec<_>>();
        assert_eq!(
            lines,
            vec![
                "series,x,y",
                "measured,1,-1",
                "measured,2,-2",
                "fitted,1.5,-1.5"
            ]
        );
        assert!(sink.draw("nyquist", "broken", &[1.0], &[]).is_err());
        Ok(())
    }
}
