use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Channel tag '{0}' not found in channel metadata")]
    UnknownChannelTag(String),

    #[error("Channel index out of range: {index} (stack has {nchannels} channels)")]
    ChannelIndexOutOfRange { index: usize, nchannels: usize },

    #[error("Invalid axis string '{axes}': {reason}")]
    InvalidAxes { axes: String, reason: String },

    #[error("Shape mismatch: {0}")]
    Shape(String),

    #[error("Unsupported TIFF sample type in '{0}'")]
    UnsupportedSampleType(String),

    #[error("Column '{0}' not found in table")]
    MissingColumn(String),

    #[error("Malformed value '{value}' in column '{column}'")]
    MalformedValue { column: String, value: String },

    #[error("Unknown file format for: {0}")]
    UnknownFormat(String),

    #[error("Segmentation failed on slice {layer}: {reason}")]
    Segmenter { layer: usize, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Tiff(#[from] tiff::TiffError),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Arrow(#[from] arrow::error::ArrowError),

    #[error(transparent)]
    Parquet(#[from] parquet::errors::ParquetError),
}

pub type Result<T> = std::result::Result<T, Error>;
