use log::info;
use ndarray::{Array3, ArrayD, Axis, IxDyn};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::colortype::{self, ColorType};
use tiff::encoder::{TiffEncoder, TiffValue};

use super::channel::RawStack;
use crate::error::{Error, Result};

/// Read a multi-page grayscale TIFF into a `RawStack`.
///
/// `axes` names every dimension and must end in "YX"; pages are laid out in
/// row-major order over the leading axes. All leading axes but at most one
/// need an extent in `extents`, the remaining one is inferred from the page
/// count.
pub fn read_tiff_stack(
    path: &str,
    axes: &str,
    extents: &HashMap<char, usize>,
) -> Result<RawStack> {
    if !axes.ends_with("YX") {
        return Err(Error::InvalidAxes {
            axes: axes.to_string(),
            reason: String::from("the last two axes must be YX"),
        });
    }

    let (pages, height, width) = read_tiff_pages(path, intensity_samples)?;
    let npages = pages.len() / (height * width).max(1);

    let leading: Vec<char> = axes.chars().take(axes.chars().count() - 2).collect();
    let mut shape: Vec<Option<usize>> = leading.iter().map(|c| extents.get(c).cloned()).collect();

    let known: usize = shape.iter().flatten().product();
    let nunknown = shape.iter().filter(|e| e.is_none()).count();
    match nunknown {
        0 => {
            if known != npages {
                return Err(Error::Shape(format!(
                    "{} pages in '{}' but axes {} need {}",
                    npages, path, axes, known
                )));
            }
        }
        1 => {
            if known == 0 || npages % known != 0 {
                return Err(Error::Shape(format!(
                    "{} pages in '{}' can't be split over axes {}",
                    npages, path, axes
                )));
            }
            for e in shape.iter_mut() {
                if e.is_none() {
                    *e = Some(npages / known);
                }
            }
        }
        _ => {
            return Err(Error::InvalidAxes {
                axes: axes.to_string(),
                reason: String::from("at most one leading axis extent can be inferred"),
            });
        }
    }

    let mut full_shape: Vec<usize> = shape.into_iter().flatten().collect();
    full_shape.push(height);
    full_shape.push(width);

    let data = ArrayD::from_shape_vec(IxDyn(&full_shape), pages)
        .map_err(|err| Error::Shape(err.to_string()))?;

    info!("Read {} pages of {}x{} from {}, shape {:?}", npages, height, width, path, full_shape);

    return RawStack::new(data, axes);
}

// Every page of the file concatenated, along with the page height and width.
// `samples` converts one decoded page, or gives None for sample types the
// caller can't take.
fn read_tiff_pages<T, F>(path: &str, samples: F) -> Result<(Vec<T>, usize, usize)>
where
    F: Fn(DecodingResult) -> Option<Vec<T>>,
{
    let file = File::open(path)?;
    let mut decoder = Decoder::new(BufReader::new(file))?.with_limits(Limits::unlimited());

    let (width, height) = decoder.dimensions()?;
    let mut data = Vec::new();

    loop {
        if decoder.dimensions()? != (width, height) {
            return Err(Error::Shape(format!("pages of '{}' differ in size", path)));
        }

        if !matches!(decoder.colortype()?, tiff::ColorType::Gray(_)) {
            return Err(Error::UnsupportedSampleType(path.to_string()));
        }

        match samples(decoder.read_image()?) {
            Some(page) => data.extend(page),
            None => return Err(Error::UnsupportedSampleType(path.to_string())),
        }

        if !decoder.more_images() {
            break;
        }
        decoder.next_image()?;
    }

    return Ok((data, height as usize, width as usize));
}

fn intensity_samples(page: DecodingResult) -> Option<Vec<u16>> {
    match page {
        DecodingResult::U8(buf) => Some(buf.into_iter().map(|v| v as u16).collect()),
        DecodingResult::U16(buf) => Some(buf),
        _ => None,
    }
}

fn label_samples(page: DecodingResult) -> Option<Vec<u32>> {
    match page {
        DecodingResult::U8(buf) => Some(buf.into_iter().map(|v| v as u32).collect()),
        DecodingResult::U16(buf) => Some(buf.into_iter().map(|v| v as u32).collect()),
        DecodingResult::U32(buf) => Some(buf),
        _ => None,
    }
}

/// Read a label volume written one page per slice, as by `write_label_stack`.
pub fn read_label_stack(path: &str) -> Result<Array3<u32>> {
    let (pages, height, width) = read_tiff_pages(path, label_samples)?;
    let nz = pages.len() / (height * width).max(1);
    let labels = Array3::from_shape_vec((nz, height, width), pages)
        .map_err(|err| Error::Shape(err.to_string()))?;
    info!("Read labels of shape {:?} from {}", labels.dim(), path);
    return Ok(labels);
}

fn write_pages<C>(path: &str, volume: &Array3<C::Inner>) -> Result<()>
where
    C: ColorType,
    C::Inner: Copy,
    [C::Inner]: TiffValue,
{
    let file = BufWriter::new(File::create(path)?);
    let mut encoder = TiffEncoder::new(file)?;

    let (_, height, width) = volume.dim();
    for page in volume.axis_iter(Axis(0)) {
        let buf: Vec<C::Inner> = page.iter().cloned().collect();
        encoder.write_image::<C>(width as u32, height as u32, &buf)?;
    }

    return Ok(());
}

/// Write a (Z, Y, X) intensity volume as one 16-bit page per slice.
pub fn write_tiff_stack_u16(path: &str, volume: &Array3<u16>) -> Result<()> {
    write_pages::<colortype::Gray16>(path, volume)?;
    info!("Wrote volume of shape {:?} to {}", volume.dim(), path);
    return Ok(());
}

/// Write a (Z, Y, X) label volume as one 32-bit page per slice.
pub fn write_label_stack(path: &str, labels: &Array3<u32>) -> Result<()> {
    write_pages::<colortype::Gray32>(path, labels)?;
    info!("Wrote labels of shape {:?} to {}", labels.dim(), path);
    return Ok(());
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_read_interleaved_channels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.tif");
        let path = path.to_str().unwrap();

        // 2 channels x 3 slices written as 6 pages, channel-major
        let pages = Array3::from_shape_fn((6, 4, 5), |(p, y, x)| (p * 100 + y * 5 + x) as u16);
        write_tiff_stack_u16(path, &pages).unwrap();

        let mut extents = HashMap::new();
        extents.insert('C', 2);
        let stack = read_tiff_stack(path, "CZYX", &extents).unwrap();

        assert_eq!(stack.data.shape(), &[2, 3, 4, 5]);
        assert_eq!(stack.data[&[1, 0, 2, 3][..]], pages[[3, 2, 3]]);
    }

    #[test]
    fn test_page_count_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.tif");
        let path = path.to_str().unwrap();

        let pages = Array3::<u16>::zeros((5, 2, 2));
        write_tiff_stack_u16(path, &pages).unwrap();

        let mut extents = HashMap::new();
        extents.insert('C', 2);
        assert!(read_tiff_stack(path, "CZYX", &extents).is_err());
    }

    #[test]
    fn test_label_stack_keeps_wide_labels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.tif");
        let path = path.to_str().unwrap();

        let mut labels = Array3::<u32>::zeros((3, 4, 4));
        labels[[0, 1, 1]] = 7;
        labels[[2, 3, 0]] = 70_000;
        write_label_stack(path, &labels).unwrap();

        assert_eq!(read_label_stack(path).unwrap(), labels);
    }

    #[test]
    fn test_axes_must_end_in_yx() {
        let extents = HashMap::new();
        assert!(matches!(
            read_tiff_stack("missing.tif", "ZXY", &extents),
            Err(Error::InvalidAxes { .. })
        ));
    }
}
