//! Measurement tables.
//!
//! Instruments export one column per measured quantity. Tables are read from comma separated
//! `.csv`, tab separated `.txt` or `.json` files holding an object of equal-length arrays, and
//! columns are looked up by quantity through a list of common header spellings.

use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::Path;

use crate::spectrum::ImpedanceSpectrum;
use crate::{Error, Result};

/// Physical quantities a procedure may ask a table for
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Quantity {
    Frequency,
    RealImpedance,
    ImaginaryImpedance,
    PhaseShift,
    Temperature,
    Conductivity,
    Current,
    Voltage,
    Time,
    ScanRate,
}

impl Quantity {
    /// Accepted headers, lower case with punctuation and units removed
    const fn aliases(self) -> &'static [&'static str] {
        match self {
            Self::Frequency => &["frequency", "freq", "frequencyhz", "freqhz", "f", "fhz"],
            Self::RealImpedance => &[
                "realimpedance",
                "zreal",
                "zre",
                "zr",
                "real",
                "re",
                "zrealohm",
            ],
            Self::ImaginaryImpedance => &[
                "imaginaryimpedance",
                "zimag",
                "zim",
                "zi",
                "imag",
                "imaginary",
                "im",
                "zimagohm",
            ],
            Self::PhaseShift => &["phaseshift", "phase", "phasedeg", "phi"],
            Self::Temperature => &["temperature", "temp", "temperaturec", "tempc"],
            Self::Conductivity => &["conductivity", "sigma", "conductivityscm", "sigmascm"],
            Self::Current => &["current", "i", "currenta", "ia"],
            Self::Voltage => &[
                "voltage",
                "potential",
                "v",
                "e",
                "ewe",
                "voltagev",
                "potentialv",
                "ev",
            ],
            Self::Time => &["time", "t", "times", "ts"],
            Self::ScanRate => &["scanrate", "rate", "scanratevs"],
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Frequency => "frequency",
            Self::RealImpedance => "real impedance",
            Self::ImaginaryImpedance => "imaginary impedance",
            Self::PhaseShift => "phase shift",
            Self::Temperature => "temperature",
            Self::Conductivity => "conductivity",
            Self::Current => "current",
            Self::Voltage => "voltage",
            Self::Time => "time",
            Self::ScanRate => "scan rate",
        }
    }
}

fn normalise(header: &str) -> String {
    header
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Named numeric columns of equal length; missing cells are NaN
#[derive(Clone, Debug, PartialEq)]
pub struct MeasurementTable {
    headers: Vec<String>,
    columns: Vec<Vec<f64>>,
}

impl MeasurementTable {
    /// Read a table, picking the reader from the file extension
    ///
    /// # Errors
    /// Returns [`Error::UnsupportedFormat`] for extensions other than `csv`, `txt` and `json`,
    /// otherwise any read or parse error.
    pub fn from_file(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .ok_or_else(|| {
                Error::UnsupportedFormat(format!("{} has no extension", path.display()))
            })?;
        match extension.as_str() {
            "csv" => Self::from_delimited(fs::File::open(path)?, b','),
            "txt" => Self::from_delimited(fs::File::open(path)?, b'\t'),
            "json" => Self::from_json(&fs::read_to_string(path)?),
            other => Err(Error::UnsupportedFormat(format!(
                "cannot read .{other} files"
            ))),
        }
    }

    /// Read delimited text with a header row
    ///
    /// # Errors
    /// Returns an error if a cell is neither empty nor a number.
    pub fn from_delimited<R: Read>(reader: R, delimiter: u8) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .delimiter(delimiter)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = rdr
            .headers()?
            .iter()
            .map(str::to_owned)
            .collect::<Vec<_>>();
        let mut columns = vec![vec![]; headers.len()];
        for (row, record) in rdr.records().enumerate() {
            let record = record?;
            for (column, cell) in columns.iter_mut().zip(record.iter()) {
                let value = if cell.is_empty() {
                    f64::NAN
                } else {
                    cell.parse::<f64>().map_err(|_| {
                        Error::invalid(format!("row {}: `{cell}` is not a number", row + 1))
                    })?
                };
                column.push(value);
            }
        }
        Ok(Self { headers, columns })
    }

    /// Read a JSON object of numeric arrays, `null` standing for a missing value
    ///
    /// # Errors
    /// Returns an error if the document has another shape or the arrays differ in length.
    pub fn from_json(contents: &str) -> Result<Self> {
        let parsed: BTreeMap<String, Vec<Option<f64>>> = serde_json::from_str(contents)?;
        let (headers, columns): (Vec<_>, Vec<_>) = parsed
            .into_iter()
            .map(|(header, values)| {
                let values = values
                    .into_iter()
                    .map(|v| v.unwrap_or(f64::NAN))
                    .collect::<Vec<_>>();
                (header, values)
            })
            .unzip();
        if let Some(first) = columns.first() {
            if columns.iter().any(|column| column.len() != first.len()) {
                return Err(Error::invalid("JSON columns differ in length"));
            }
        }
        Ok(Self { headers, columns })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.columns.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Column with the header `name`, ignoring case and punctuation
    pub fn column(&self, name: &str) -> Option<&[f64]> {
        let wanted = normalise(name);
        self.headers
            .iter()
            .position(|header| normalise(header) == wanted)
            .map(|idx| self.columns[idx].as_slice())
    }

    pub fn find(&self, quantity: Quantity) -> Option<&[f64]> {
        quantity
            .aliases()
            .iter()
            .find_map(|alias| self.column(alias))
    }

    /// # Errors
    /// Returns an error naming the quantity if no column matches it.
    pub fn require(&self, quantity: Quantity) -> Result<&[f64]> {
        self.find(quantity).ok_or_else(|| {
            Error::invalid(format!(
                "no {} column among {:?}",
                quantity.as_str(),
                self.headers
            ))
        })
    }

    /// The impedance spectrum held by the table
    ///
    /// The phase shift column is optional. A column with blank cells is ignored and the phase is
    /// derived from the impedance instead.
    ///
    /// # Errors
    /// Returns an error if a required column is missing or the spectrum is invalid.
    pub fn impedance_spectrum(&self) -> Result<ImpedanceSpectrum> {
        ImpedanceSpectrum::new(
            self.require(Quantity::Frequency)?.to_vec(),
            self.require(Quantity::RealImpedance)?.to_vec(),
            self.require(Quantity::ImaginaryImpedance)?.to_vec(),
            self.find(Quantity::PhaseShift)
                .filter(|phase| phase.iter().all(|p| p.is_finite()))
                .map(<[f64]>::to_vec),
        )
    }
}
