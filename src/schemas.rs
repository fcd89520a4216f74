// Table schemas shared by output.rs and input.rs

use arrow::datatypes::{DataType, Field, Schema};
use clap::ValueEnum;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum OutputFormat {
    Infer,
    Csv,
    CsvGz,
    Parquet,
}

pub fn centroid_schema() -> Schema {
    Schema::new(vec![
        Field::new("label", DataType::UInt32, false),
        Field::new("z", DataType::Float32, false),
        Field::new("y", DataType::Float32, false),
        Field::new("x", DataType::Float32, false),
    ])
}

pub fn volume_schema() -> Schema {
    Schema::new(vec![
        Field::new("label", DataType::UInt32, false),
        Field::new("volume", DataType::UInt64, false),
    ])
}

pub fn voxel_schema() -> Schema {
    Schema::new(vec![
        Field::new("label", DataType::UInt32, false),
        Field::new("z", DataType::UInt32, false),
        Field::new("y", DataType::UInt32, false),
        Field::new("x", DataType::UInt32, false),
    ])
}

pub fn instance_schema() -> Schema {
    Schema::new(vec![
        Field::new("layer", DataType::UInt32, false),
        Field::new("label", DataType::UInt32, false),
        Field::new("y", DataType::Float32, false),
        Field::new("x", DataType::Float32, false),
        Field::new("area", DataType::UInt64, false),
    ])
}

pub fn match_schema(channel_names: &[String]) -> Schema {
    let mut fields = vec![Field::new("source", DataType::Utf8, false)];
    for name in channel_names {
        fields.push(Field::new(name, DataType::UInt32, false));
    }
    fields.push(Field::new("mutual", DataType::Boolean, false));
    Schema::new(fields)
}
