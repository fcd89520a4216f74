use arrow::array::{
    Array, BooleanArray, Float32Array, RecordBatch, StringArray, UInt32Array, UInt64Array,
};
use flate2::write::GzEncoder;
use flate2::Compression;
use log::info;
use ndarray::Array3;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression::ZSTD, ZstdLevel};
use parquet::file::properties::WriterProperties;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::Arc;

use crate::centroids::CentroidMap;
use crate::error::{Error, Result};
use crate::matching::ChannelMatch;
use crate::schemas::{
    centroid_schema, instance_schema, match_schema, volume_schema, voxel_schema, OutputFormat,
};
use crate::segment::InstanceRecord;
use crate::BACKGROUND;

pub fn determine_format(filename: &str, fmt: OutputFormat) -> Result<OutputFormat> {
    if fmt != OutputFormat::Infer {
        return Ok(fmt);
    }

    if filename.ends_with(".csv.gz") {
        Ok(OutputFormat::CsvGz)
    } else if filename.ends_with(".csv") {
        Ok(OutputFormat::Csv)
    } else if filename.ends_with(".parquet") {
        Ok(OutputFormat::Parquet)
    } else {
        Err(Error::UnknownFormat(filename.to_string()))
    }
}

pub fn write_table(filename: &str, fmt: OutputFormat, batch: &RecordBatch) -> Result<()> {
    let fmt = determine_format(filename, fmt)?;
    let file = File::create(filename)?;

    match fmt {
        OutputFormat::Csv => {
            let mut output = write_table_csv(BufWriter::new(file), batch)?;
            output.flush()?;
        }
        OutputFormat::CsvGz => {
            let encoder = write_table_csv(GzEncoder::new(file, Compression::default()), batch)?;
            encoder.finish()?;
        }
        OutputFormat::Parquet => {
            write_table_parquet(file, batch)?;
        }
        OutputFormat::Infer => unreachable!(),
    }

    info!("Wrote {} rows to {}", batch.num_rows(), filename);
    return Ok(());
}

fn write_table_csv<W>(output: W, batch: &RecordBatch) -> Result<W>
where
    W: Write,
{
    let mut writer = arrow::csv::WriterBuilder::new()
        .with_header(true)
        .build(output);
    writer.write(batch)?;
    return Ok(writer.into_inner());
}

fn write_table_parquet(output: File, batch: &RecordBatch) -> Result<()> {
    let props = WriterProperties::builder()
        .set_compression(ZSTD(ZstdLevel::try_new(3)?))
        .build();

    let mut writer = ArrowWriter::try_new(output, batch.schema(), Some(props))?;
    writer.write(batch)?;
    writer.close()?;

    return Ok(());
}

pub fn write_centroids(filename: &str, fmt: OutputFormat, centroids: &CentroidMap) -> Result<()> {
    let columns: Vec<Arc<dyn Array>> = vec![
        Arc::new(centroids.keys().cloned().collect::<UInt32Array>()),
        Arc::new(centroids.values().map(|c| c[0]).collect::<Float32Array>()),
        Arc::new(centroids.values().map(|c| c[1]).collect::<Float32Array>()),
        Arc::new(centroids.values().map(|c| c[2]).collect::<Float32Array>()),
    ];

    let batch = RecordBatch::try_new(Arc::new(centroid_schema()), columns)?;
    return write_table(filename, fmt, &batch);
}

pub fn write_volumes(filename: &str, fmt: OutputFormat, volumes: &BTreeMap<u32, u64>) -> Result<()> {
    let columns: Vec<Arc<dyn Array>> = vec![
        Arc::new(volumes.keys().cloned().collect::<UInt32Array>()),
        Arc::new(volumes.values().cloned().collect::<UInt64Array>()),
    ];

    let batch = RecordBatch::try_new(Arc::new(volume_schema()), columns)?;
    return write_table(filename, fmt, &batch);
}

/// One row per labeled voxel, grouped by label.
pub fn write_voxels(filename: &str, fmt: OutputFormat, labels: &Array3<u32>) -> Result<()> {
    let mut voxels: Vec<(u32, u32, u32, u32)> = labels
        .indexed_iter()
        .filter(|(_, &label)| label != BACKGROUND)
        .map(|((z, y, x), &label)| (label, z as u32, y as u32, x as u32))
        .collect();
    voxels.sort_by_key(|v| v.0);

    let columns: Vec<Arc<dyn Array>> = vec![
        Arc::new(voxels.iter().map(|v| v.0).collect::<UInt32Array>()),
        Arc::new(voxels.iter().map(|v| v.1).collect::<UInt32Array>()),
        Arc::new(voxels.iter().map(|v| v.2).collect::<UInt32Array>()),
        Arc::new(voxels.iter().map(|v| v.3).collect::<UInt32Array>()),
    ];

    let batch = RecordBatch::try_new(Arc::new(voxel_schema()), columns)?;
    return write_table(filename, fmt, &batch);
}

pub fn write_instances(filename: &str, fmt: OutputFormat, instances: &[InstanceRecord]) -> Result<()> {
    let columns: Vec<Arc<dyn Array>> = vec![
        Arc::new(instances.iter().map(|r| r.layer as u32).collect::<UInt32Array>()),
        Arc::new(instances.iter().map(|r| r.label).collect::<UInt32Array>()),
        Arc::new(instances.iter().map(|r| r.centroid[0]).collect::<Float32Array>()),
        Arc::new(instances.iter().map(|r| r.centroid[1]).collect::<Float32Array>()),
        Arc::new(instances.iter().map(|r| r.area).collect::<UInt64Array>()),
    ];

    let batch = RecordBatch::try_new(Arc::new(instance_schema()), columns)?;
    return write_table(filename, fmt, &batch);
}

pub fn write_matches(
    filename: &str,
    fmt: OutputFormat,
    channel_names: &[String],
    matches: &[ChannelMatch],
) -> Result<()> {
    let mut columns: Vec<Arc<dyn Array>> = vec![Arc::new(
        matches
            .iter()
            .map(|m| Some(channel_names[m.source].clone()))
            .collect::<StringArray>(),
    )];
    for c in 0..channel_names.len() {
        columns.push(Arc::new(matches.iter().map(|m| m.labels[c]).collect::<UInt32Array>()));
    }
    columns.push(Arc::new(
        matches.iter().map(|m| Some(m.mutual)).collect::<BooleanArray>(),
    ));

    let batch = RecordBatch::try_new(Arc::new(match_schema(channel_names)), columns)?;
    return write_table(filename, fmt, &batch);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_determine_format() {
        assert_eq!(determine_format("a.csv.gz", OutputFormat::Infer).unwrap(), OutputFormat::CsvGz);
        assert_eq!(determine_format("a.csv", OutputFormat::Infer).unwrap(), OutputFormat::Csv);
        assert_eq!(
            determine_format("a.parquet", OutputFormat::Infer).unwrap(),
            OutputFormat::Parquet
        );
        assert_eq!(determine_format("a.txt", OutputFormat::Csv).unwrap(), OutputFormat::Csv);
        assert!(matches!(
            determine_format("a.txt", OutputFormat::Infer),
            Err(Error::UnknownFormat(_))
        ));
    }

    #[test]
    fn test_write_volumes_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("volumes.csv");
        let path = path.to_str().unwrap();

        let volumes: BTreeMap<u32, u64> = [(1, 120), (4, 33)].into_iter().collect();
        write_volumes(path, OutputFormat::Infer, &volumes).unwrap();

        let text = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["label,volume", "1,120", "4,33"]);
    }

    #[test]
    fn test_write_voxels_grouped_by_label() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voxels.csv");
        let path = path.to_str().unwrap();

        let mut labels = Array3::<u32>::zeros((2, 2, 2));
        labels[[0, 0, 1]] = 2;
        labels[[1, 1, 0]] = 1;
        labels[[1, 1, 1]] = 2;
        write_voxels(path, OutputFormat::Csv, &labels).unwrap();

        let text = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["label,z,y,x", "1,1,1,0", "2,0,0,1", "2,1,1,1"]);
    }

    #[test]
    fn test_write_matches_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("matches.csv");
        let path = path.to_str().unwrap();

        let names = vec![String::from("dapi"), String::from("t2"), String::from("t3")];
        let matches = vec![ChannelMatch {
            source: 1,
            labels: [3, 5, 8],
            mutual: true,
        }];
        write_matches(path, OutputFormat::Csv, &names, &matches).unwrap();

        let text = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["source,dapi,t2,t3,mutual", "t2,3,5,8,true"]);
    }
}
