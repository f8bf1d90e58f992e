use crate::error::SyncError;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Variable (or column) names of the five parallel arrays in a table.
pub const TRIAL_COLUMN: &str = "totNumTrials";
pub const CAMERA_COLUMN: &str = "totCamNum";
pub const VIDEO_COLUMN: &str = "totVidNum";
pub const START_COLUMN: &str = "totStartTimes";
pub const END_COLUMN: &str = "totEndTimes";

/// One recording epoch: five equal-length arrays, one entry per camera clip.
/// Missing frame bounds are stored as NaN.
#[derive(Debug, Clone)]
pub struct MetadataTable {
    pub path: PathBuf,
    pub trials: Vec<f64>,
    pub cameras: Vec<f64>,
    pub videos: Vec<f64>,
    pub frame_starts: Vec<f64>,
    pub frame_ends: Vec<f64>,
}

/// A validated table row. Frame bounds keep NaN for "missing".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetadataRecord {
    pub trial: u32,
    pub camera: u32,
    /// 1-based index into the camera's sorted clip list.
    pub video: usize,
    pub frame_start: f64,
    pub frame_end: f64,
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(rename = "totNumTrials")]
    trial: f64,
    #[serde(rename = "totCamNum")]
    camera: f64,
    #[serde(rename = "totVidNum")]
    video: f64,
    #[serde(rename = "totStartTimes")]
    frame_start: Option<f64>,
    #[serde(rename = "totEndTimes")]
    frame_end: Option<f64>,
}

impl MetadataTable {
    /// Builds a table from its five arrays, rejecting mismatched lengths.
    pub fn from_columns(
        path: &Path,
        trials: Vec<f64>,
        cameras: Vec<f64>,
        videos: Vec<f64>,
        frame_starts: Vec<f64>,
        frame_ends: Vec<f64>,
    ) -> Result<Self, SyncError> {
        let lengths = [
            trials.len(),
            cameras.len(),
            videos.len(),
            frame_starts.len(),
            frame_ends.len(),
        ];
        if lengths.iter().any(|&len| len != lengths[0]) {
            return Err(malformed(path, format!("parallel arrays differ in length: {:?}", lengths)));
        }

        Ok(Self {
            path: path.to_path_buf(),
            trials,
            cameras,
            videos,
            frame_starts,
            frame_ends,
        })
    }

    /// Loads a `.csv` or `.mat` table, picked by extension.
    pub fn load(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_lowercase());
        let table = match extension.as_deref() {
            Some("csv") => Self::load_csv(path)?,
            Some("mat") => Self::load_mat(path)?,
            _ => return Err(malformed(path, "unsupported table format".to_string()).into()),
        };
        tracing::info!("Loaded metadata table {:?} ({} records)", path, table.len());
        Ok(table)
    }

    fn load_csv(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)
            .with_context(|| format!("Failed to open metadata table {:?}", path))?;

        let mut columns: [Vec<f64>; 5] = Default::default();
        for (line, row) in reader.deserialize::<CsvRow>().enumerate() {
            let row = row.map_err(|e| malformed(path, format!("row {}: {}", line + 1, e)))?;
            columns[0].push(row.trial);
            columns[1].push(row.camera);
            columns[2].push(row.video);
            columns[3].push(row.frame_start.unwrap_or(f64::NAN));
            columns[4].push(row.frame_end.unwrap_or(f64::NAN));
        }

        let [trials, cameras, videos, starts, ends] = columns;
        Ok(Self::from_columns(path, trials, cameras, videos, starts, ends)?)
    }

    fn load_mat(path: &Path) -> Result<Self> {
        let file = fs::File::open(path)
            .with_context(|| format!("Failed to open metadata table {:?}", path))?;
        let mat = matfile::MatFile::parse(file)
            .map_err(|e| malformed(path, format!("not a MAT-file: {:?}", e)))?;

        let column = |name: &str| -> Result<Vec<f64>, SyncError> {
            let array = mat
                .find_by_name(name)
                .ok_or_else(|| malformed(path, format!("variable {} is missing", name)))?;
            numeric_values(array.data())
                .ok_or_else(|| malformed(path, format!("variable {} is not a real numeric array", name)))
        };

        Ok(Self::from_columns(
            path,
            column(TRIAL_COLUMN)?,
            column(CAMERA_COLUMN)?,
            column(VIDEO_COLUMN)?,
            column(START_COLUMN)?,
            column(END_COLUMN)?,
        )?)
    }

    pub fn len(&self) -> usize {
        self.trials.len()
    }

    /// Validates and returns every row, in array order.
    pub fn records(&self) -> Result<Vec<MetadataRecord>, SyncError> {
        (0..self.len())
            .map(|j| {
                Ok(MetadataRecord {
                    trial: self.index_value(TRIAL_COLUMN, j, self.trials[j])?,
                    camera: self.index_value(CAMERA_COLUMN, j, self.cameras[j])?,
                    video: self.index_value(VIDEO_COLUMN, j, self.videos[j])? as usize,
                    frame_start: self.frame_starts[j],
                    frame_end: self.frame_ends[j],
                })
            })
            .collect()
    }

    /// Identifiers must be whole numbers >= 1.
    fn index_value(&self, column: &str, row: usize, value: f64) -> Result<u32, SyncError> {
        if value.is_finite() && value.fract() == 0.0 && value >= 1.0 && value <= u32::MAX as f64 {
            Ok(value as u32)
        } else {
            Err(malformed(
                &self.path,
                format!("{}[{}] = {} is not a valid identifier", column, row, value),
            ))
        }
    }
}

fn malformed(path: &Path, reason: String) -> SyncError {
    SyncError::MalformedMetadata {
        path: path.to_path_buf(),
        reason,
    }
}

fn numeric_values(data: &matfile::NumericData) -> Option<Vec<f64>> {
    use matfile::NumericData;

    fn widen<T: Copy + Into<f64>>(values: &[T]) -> Vec<f64> {
        values.iter().map(|&v| v.into()).collect()
    }

    match data {
        NumericData::Double { real, .. } => Some(real.clone()),
        NumericData::Single { real, .. } => Some(widen(real)),
        NumericData::Int8 { real, .. } => Some(widen(real)),
        NumericData::UInt8 { real, .. } => Some(widen(real)),
        NumericData::Int16 { real, .. } => Some(widen(real)),
        NumericData::UInt16 { real, .. } => Some(widen(real)),
        NumericData::Int32 { real, .. } => Some(widen(real)),
        NumericData::UInt32 { real, .. } => Some(widen(real)),
        _ => None,
    }
}

/// Numeric suffix of a table's file stem (`meta_12.mat` -> 12).
pub fn table_order(path: &Path) -> Option<u64> {
    let stem = path.file_stem()?.to_str()?;
    let digits = stem.len() - stem.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    stem[stem.len() - digits..].parse().ok()
}

/// Lists the tables of a `Processing_Data` directory in processing order.
pub fn list_tables(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut tables = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to list {:?}", dir))? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let order = table_order(&path)
            .ok_or_else(|| malformed(&path, "file name carries no numeric suffix".to_string()))?;
        tables.push((order, path));
    }
    tables.sort();
    Ok(tables.into_iter().map(|(_, path)| path).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "totNumTrials,totCamNum,totVidNum,totStartTimes,totEndTimes\n";

    #[test]
    fn csv_tables_treat_blank_and_nan_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata_1.csv");
        fs::write(&path, format!("{}1,2,1,,NaN\n1,3,2,20,140\n", HEADER)).unwrap();

        let table = MetadataTable::load(&path).unwrap();
        let records = table.records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!((records[0].trial, records[0].camera, records[0].video), (1, 2, 1));
        assert!(records[0].frame_start.is_nan());
        assert!(records[0].frame_end.is_nan());
        assert_eq!((records[1].frame_start, records[1].frame_end), (20.0, 140.0));
    }

    #[test]
    fn mismatched_lengths_are_malformed() {
        let err = MetadataTable::from_columns(
            Path::new("t.mat"),
            vec![1.0, 1.0],
            vec![1.0, 2.0],
            vec![1.0],
            vec![f64::NAN, f64::NAN],
            vec![f64::NAN, f64::NAN],
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::MalformedMetadata { .. }));
    }

    #[test]
    fn bad_identifiers_are_malformed() {
        for bad in [0.0, 1.5, f64::NAN, -3.0] {
            let table = MetadataTable::from_columns(
                Path::new("t.csv"),
                vec![1.0],
                vec![bad],
                vec![1.0],
                vec![0.0],
                vec![10.0],
            )
            .unwrap();
            assert!(table.records().is_err(), "camera id {} accepted", bad);
        }
    }

    #[test]
    fn unknown_extensions_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata_1.json");
        fs::write(&path, "{}").unwrap();
        assert!(MetadataTable::load(&path).is_err());
    }

    #[test]
    fn garbage_mat_files_are_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata_1.mat");
        fs::write(&path, b"definitely not a MAT-file").unwrap();
        let err = MetadataTable::load(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SyncError>(),
            Some(SyncError::MalformedMetadata { .. })
        ));
    }

    #[test]
    fn tables_sort_by_numeric_suffix() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["meta10.csv", "meta2.csv", "meta1.csv"] {
            fs::write(dir.path().join(name), HEADER).unwrap();
        }

        let names: Vec<String> = list_tables(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["meta1.csv", "meta2.csv", "meta10.csv"]);
    }

    #[test]
    fn tables_without_suffix_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("meta.csv"), HEADER).unwrap();
        assert!(list_tables(dir.path()).is_err());
        assert_eq!(table_order(Path::new("x/run_007.mat")), Some(7));
    }
}
