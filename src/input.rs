use arrow::array::{Array, ArrayRef, AsArray, RecordBatch};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Float32Type, UInt32Type};
use flate2::read::GzDecoder;
use log::{info, warn};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::fs::File;
use std::io::Read;
use std::str::FromStr;

use crate::centroids::CentroidMap;
use crate::error::{Error, Result};
use crate::output::determine_format;
use crate::schemas::OutputFormat;

const CENTROID_COLUMNS: [&str; 4] = ["label", "z", "y", "x"];

/// Read a centroid table with `label`, `z`, `y` and `x` columns, as written by
/// `write_centroids`. Other columns are ignored.
pub fn read_centroids(filename: &str, fmt: OutputFormat) -> Result<CentroidMap> {
    let fmt = determine_format(filename, fmt)?;
    let input = File::open(filename)?;

    let centroids = match fmt {
        OutputFormat::Csv => read_centroids_csv(input)?,
        OutputFormat::CsvGz => read_centroids_csv(GzDecoder::new(input))?,
        OutputFormat::Parquet => read_centroids_parquet(input)?,
        OutputFormat::Infer => unreachable!(),
    };

    info!("Read {} centroids from {}", centroids.len(), filename);
    return Ok(centroids);
}

fn find_column(headers: &csv::StringRecord, column: &str) -> Result<usize> {
    let col = headers.iter().position(|x| x.trim() == column);
    match col {
        Some(col) => Ok(col),
        None => Err(Error::MissingColumn(column.to_string())),
    }
}

fn parse_field<T: FromStr>(row: &csv::StringRecord, col: usize, column: &str) -> Result<T> {
    let value = row.get(col).unwrap_or("");
    return value.trim().parse::<T>().map_err(|_| Error::MalformedValue {
        column: column.to_string(),
        value: value.to_string(),
    });
}

fn insert_centroid(centroids: &mut CentroidMap, label: u32, centroid: [f32; 3]) {
    if centroids.insert(label, centroid).is_some() {
        warn!("Label {} appears more than once, keeping the last row", label);
    }
}

fn read_centroids_csv<R: Read>(input: R) -> Result<CentroidMap> {
    let mut rdr = csv::Reader::from_reader(input);
    let headers = rdr.headers()?.clone();

    let label_col = find_column(&headers, "label")?;
    let z_col = find_column(&headers, "z")?;
    let y_col = find_column(&headers, "y")?;
    let x_col = find_column(&headers, "x")?;

    let mut centroids = CentroidMap::new();
    for row in rdr.records() {
        let row = row?;
        let label = parse_field::<u32>(&row, label_col, "label")?;
        let centroid = [
            parse_field::<f32>(&row, z_col, "z")?,
            parse_field::<f32>(&row, y_col, "y")?,
            parse_field::<f32>(&row, x_col, "x")?,
        ];
        insert_centroid(&mut centroids, label, centroid);
    }

    return Ok(centroids);
}

// Column `name` of the batch converted to `to`.
fn batch_column(batch: &RecordBatch, name: &str, to: &DataType) -> Result<ArrayRef> {
    let col = batch
        .schema()
        .index_of(name)
        .map_err(|_| Error::MissingColumn(name.to_string()))?;
    return Ok(cast(batch.column(col), to)?);
}

fn read_centroids_parquet(input: File) -> Result<CentroidMap> {
    let rdr = ParquetRecordBatchReaderBuilder::try_new(input)?.build()?;

    let mut centroids = CentroidMap::new();
    for batch in rdr {
        let batch = batch?;

        let labels = batch_column(&batch, CENTROID_COLUMNS[0], &DataType::UInt32)?;
        let labels = labels.as_primitive::<UInt32Type>();
        let coords = CENTROID_COLUMNS[1..]
            .iter()
            .map(|name| batch_column(&batch, name, &DataType::Float32))
            .collect::<Result<Vec<ArrayRef>>>()?;
        let coords: Vec<_> = coords.iter().map(|c| c.as_primitive::<Float32Type>()).collect();

        for i in 0..batch.num_rows() {
            if labels.is_null(i) {
                return Err(Error::MalformedValue {
                    column: String::from("label"),
                    value: String::from("null"),
                });
            }

            let mut centroid = [0.0_f32; 3];
            for (k, c) in coords.iter().enumerate() {
                if c.is_null(i) {
                    return Err(Error::MalformedValue {
                        column: CENTROID_COLUMNS[k + 1].to_string(),
                        value: String::from("null"),
                    });
                }
                centroid[k] = c.value(i);
            }
            insert_centroid(&mut centroids, labels.value(i), centroid);
        }
    }

    return Ok(centroids);
}
