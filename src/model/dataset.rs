use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use bitvec::prelude::*;
use phylodm::tree::Taxon;

use crate::model::error::{SensiError, SensiResult};

/// Tokens read as a missing value.
const MISSING: [&str; 3] = ["", "NA", "NaN"];

#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Continuous(Vec<Option<f64>>),
    Categorical(Vec<Option<String>>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Continuous(v) => v.len(),
            Column::Categorical(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_missing(&self, row: usize) -> bool {
        match self {
            Column::Continuous(v) => v[row].map_or(true, |x| x.is_nan()),
            Column::Categorical(v) => v[row].is_none(),
        }
    }

    fn select(&self, rows: &[usize]) -> Column {
        match self {
            Column::Continuous(v) => Column::Continuous(rows.iter().map(|&i| v[i]).collect()),
            Column::Categorical(v) => Column::Categorical(rows.iter().map(|&i| v[i].clone()).collect()),
        }
    }
}

/// A table of named columns indexed by taxon.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub taxa: Vec<Taxon>,
    pub taxon_to_idx: HashMap<Taxon, usize>,
    pub columns: BTreeMap<String, Column>,
}

impl Dataset {
    pub fn new(taxa: Vec<Taxon>, columns: BTreeMap<String, Column>) -> SensiResult<Self> {
        let mut taxon_to_idx = HashMap::with_capacity(taxa.len());
        for (i, taxon) in taxa.iter().enumerate() {
            if taxon_to_idx.insert(taxon.clone(), i).is_some() {
                return Err(SensiError::DuplicateTaxon(taxon.0.clone()));
            }
        }
        for (name, column) in &columns {
            if column.len() != taxa.len() {
                return Err(SensiError::Error(format!(
                    "Column '{}' has {} values but there are {} taxa.",
                    name,
                    column.len(),
                    taxa.len()
                )));
            }
        }
        Ok(Dataset { taxa, taxon_to_idx, columns })
    }

    /// Read a delimited file whose first column holds the taxon names. A column is
    /// continuous when every present value parses as a number, categorical otherwise.
    pub fn read(path: &Path, delimiter: u8) -> SensiResult<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .from_path(path)
            .map_err(SensiError::CsvError)?;

        let names: Vec<String> = reader
            .headers()
            .map_err(SensiError::CsvError)?
            .iter()
            .skip(1)
            .map(|h| h.to_string())
            .collect();

        let mut taxa: Vec<Taxon> = Vec::new();
        let mut raw: Vec<Vec<Option<String>>> = vec![Vec::new(); names.len()];
        for (line_no, result) in reader.records().enumerate() {
            let record = result.map_err(SensiError::CsvError)?;
            let taxon = record
                .get(0)
                .ok_or_else(|| SensiError::Error(format!("No taxon present at line {line_no}.")))?;
            taxa.push(Taxon(taxon.to_string()));
            for (j, values) in raw.iter_mut().enumerate() {
                let value = record.get(j + 1).map(str::trim).unwrap_or("");
                values.push(if MISSING.contains(&value) { None } else { Some(value.to_string()) });
            }
        }

        let mut columns = BTreeMap::new();
        for (name, values) in names.into_iter().zip(raw) {
            let parsed: Option<Vec<Option<f64>>> = values
                .iter()
                .map(|v| match v {
                    None => Some(None),
                    Some(s) => s.parse::<f64>().ok().map(Some),
                })
                .collect();
            let column = match parsed {
                Some(numbers) => Column::Continuous(numbers),
                None => Column::Categorical(values),
            };
            columns.insert(name, column);
        }
        Dataset::new(taxa, columns)
    }

    pub fn len(&self) -> usize {
        self.taxa.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taxa.is_empty()
    }

    pub fn column(&self, name: &str) -> SensiResult<&Column> {
        self.columns.get(name).ok_or_else(|| SensiError::MissingColumn(name.to_string()))
    }

    pub fn continuous(&self, name: &str) -> SensiResult<&[Option<f64>]> {
        match self.column(name)? {
            Column::Continuous(v) => Ok(v),
            Column::Categorical(_) => Err(SensiError::Error(format!("Column '{}' is not numeric.", name))),
        }
    }

    pub fn categorical(&self, name: &str) -> SensiResult<&[Option<String>]> {
        match self.column(name)? {
            Column::Categorical(v) => Ok(v),
            Column::Continuous(_) => Err(SensiError::Error(format!("Column '{}' is not categorical.", name))),
        }
    }

    /// Replace the values of a continuous column, keeping the row order.
    pub fn set_continuous(&mut self, name: &str, values: Vec<Option<f64>>) -> SensiResult<()> {
        if values.len() != self.taxa.len() {
            return Err(SensiError::Error(format!("Column '{}' must have {} values.", name, self.taxa.len())));
        }
        self.columns.insert(name.to_string(), Column::Continuous(values));
        Ok(())
    }

    /// Rows in which any of the named columns is missing.
    pub fn missing_mask(&self, names: &[&str]) -> SensiResult<BitVec> {
        let mut mask = bitvec![0; self.len()];
        for name in names {
            let column = self.column(name)?;
            for row in 0..self.len() {
                if column.is_missing(row) {
                    mask.set(row, true);
                }
            }
        }
        Ok(mask)
    }

    /// A new dataset made of the given rows, in the given order.
    pub fn select(&self, rows: &[usize]) -> SensiResult<Self> {
        let taxa = rows.iter().map(|&i| self.taxa[i].clone()).collect();
        let columns = self.columns.iter().map(|(k, c)| (k.clone(), c.select(rows))).collect();
        Dataset::new(taxa, columns)
    }

    /// Rows for the given taxa, in the given order.
    pub fn select_taxa<'a>(&self, taxa: impl IntoIterator<Item = &'a Taxon>) -> SensiResult<Self> {
        let rows: Vec<usize> = taxa
            .into_iter()
            .map(|t| {
                self.taxon_to_idx
                    .get(t)
                    .copied()
                    .ok_or_else(|| SensiError::OrderingMismatch(t.0.clone()))
            })
            .collect::<SensiResult<_>>()?;
        self.select(&rows)
    }

    /// A copy without the given taxa, original order preserved.
    pub fn without(&self, taxa: &[Taxon]) -> SensiResult<Self> {
        let mut drop = bitvec![0; self.len()];
        for taxon in taxa {
            let idx = self
                .taxon_to_idx
                .get(taxon)
                .ok_or_else(|| SensiError::Error(format!("Taxon '{}' is not in the data.", taxon.0)))?;
            drop.set(*idx, true);
        }
        let rows: Vec<usize> = drop.iter_zeros().collect();
        self.select(&rows)
    }
}

#[cfg(test)]
pub fn dataset_from_rows(names: &[&str], rows: &[(&str, Vec<Option<f64>>)]) -> Dataset {
    let taxa = rows.iter().map(|(t, _)| Taxon(t.to_string())).collect();
    let columns = names
        .iter()
        .enumerate()
        .map(|(j, name)| (name.to_string(), Column::Continuous(rows.iter().map(|(_, v)| v[j]).collect())))
        .collect();
    Dataset::new(taxa, columns).unwrap()
}

#[test]
fn test_read_detects_column_types() {
    use std::io::Write;
    use tempfile::tempdir;

    let dir = tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("data.csv");
    let mut file = std::fs::File::create(&path).expect("Unable to create file");
    writeln!(file, "taxon,mass,family").unwrap();
    writeln!(file, "A,1.5,Felidae").unwrap();
    writeln!(file, "B,NA,Canidae").unwrap();
    writeln!(file, "C,3,").unwrap();
    drop(file);

    let data = Dataset::read(&path, b',').unwrap();
    assert_eq!(data.len(), 3);
    assert_eq!(data.continuous("mass").unwrap(), &[Some(1.5), None, Some(3.0)]);
    assert_eq!(
        data.categorical("family").unwrap(),
        &[Some("Felidae".to_string()), Some("Canidae".to_string()), None]
    );
}

#[test]
fn test_duplicate_taxa_rejected() {
    let taxa = vec![Taxon("A".to_string()), Taxon("A".to_string())];
    let result = Dataset::new(taxa, BTreeMap::new());
    assert!(matches!(result, Err(SensiError::DuplicateTaxon(t)) if t == "A"));
}

#[test]
fn test_without_keeps_order() {
    let data = dataset_from_rows(
        &["x"],
        &[("A", vec![Some(1.0)]), ("B", vec![Some(2.0)]), ("C", vec![Some(3.0)])],
    );
    let out = data.without(&[Taxon("B".to_string())]).unwrap();
    assert_eq!(out.taxa, vec![Taxon("A".to_string()), Taxon("C".to_string())]);
    assert_eq!(out.continuous("x").unwrap(), &[Some(1.0), Some(3.0)]);
    assert_eq!(out.taxon_to_idx[&Taxon("C".to_string())], 1);
}
