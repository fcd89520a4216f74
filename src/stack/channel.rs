use log::info;
use ndarray::{Array3, ArrayD, Axis, Ix3};
use std::collections::HashMap;

use super::metadata::ChannelDirectory;
use crate::error::{Error, Result};

// Axes every isolated channel volume is reduced to, in output order.
const VOLUME_AXES: [char; 3] = ['Z', 'Y', 'X'];

/// A dense multi-axis stack as read from the microscope export, with one axis
/// character per dimension (e.g. "CZYX").
#[derive(Clone, Debug)]
pub struct RawStack {
    pub data: ArrayD<u16>,
    pub axes: String,
}

impl RawStack {
    pub fn new(data: ArrayD<u16>, axes: &str) -> Result<Self> {
        let naxes = axes.chars().count();
        if naxes != data.ndim() {
            return Err(Error::InvalidAxes {
                axes: axes.to_string(),
                reason: format!("{} axes given for a {}-dimensional array", naxes, data.ndim()),
            });
        }

        for (i, c) in axes.chars().enumerate() {
            if axes.chars().skip(i + 1).any(|d| d == c) {
                return Err(Error::InvalidAxes {
                    axes: axes.to_string(),
                    reason: format!("axis '{}' appears more than once", c),
                });
            }
        }

        return Ok(RawStack {
            data,
            axes: axes.to_string(),
        });
    }

    /// Extent of every axis, keyed by axis character.
    pub fn dims(&self) -> HashMap<char, usize> {
        return self
            .axes
            .chars()
            .zip(self.data.shape().iter().cloned())
            .collect();
    }

    pub fn axis_position(&self, axis: char) -> Option<usize> {
        return self.axes.chars().position(|c| c == axis);
    }

    /// Select `index` along `axis`, removing that axis.
    pub fn take_axis(&self, axis: char, index: usize) -> Result<RawStack> {
        let pos = self.axis_position(axis).ok_or_else(|| Error::InvalidAxes {
            axes: self.axes.clone(),
            reason: format!("no '{}' axis", axis),
        })?;

        let extent = self.data.shape()[pos];
        if index >= extent {
            return Err(Error::Shape(format!(
                "index {} out of bounds for axis '{}' of extent {}",
                index, axis, extent
            )));
        }

        let data = self.data.index_axis(Axis(pos), index).to_owned();
        let axes = self
            .axes
            .chars()
            .enumerate()
            .filter(|(i, _)| *i != pos)
            .map(|(_, c)| c)
            .collect();

        return Ok(RawStack { data, axes });
    }

    // Drop singleton axes other than Z, Y, X. A single-slice stack still
    // reduces to a (1, Y, X) volume.
    fn squeeze(self) -> RawStack {
        let mut data = self.data;
        let mut axes: Vec<char> = self.axes.chars().collect();

        let mut i = 0;
        while i < axes.len() {
            if data.shape()[i] == 1 && !VOLUME_AXES.contains(&axes[i]) {
                data = data.index_axis_move(Axis(i), 0);
                axes.remove(i);
            } else {
                i += 1;
            }
        }

        return RawStack {
            data,
            axes: axes.into_iter().collect(),
        };
    }

    fn into_volume(self) -> Result<Array3<u16>> {
        let stack = self.squeeze();

        if stack.axes.len() != 3 {
            return Err(Error::InvalidAxes {
                axes: stack.axes.clone(),
                reason: String::from("expected exactly Z, Y and X to remain after channel selection"),
            });
        }

        let mut order = [0; 3];
        for (i, axis) in VOLUME_AXES.iter().enumerate() {
            order[i] = stack.axis_position(*axis).ok_or_else(|| Error::InvalidAxes {
                axes: stack.axes.clone(),
                reason: format!("missing '{}' axis", axis),
            })?;
        }

        let volume = stack
            .data
            .permuted_axes(order.to_vec())
            .into_dimensionality::<Ix3>()
            .map_err(|err| Error::Shape(err.to_string()))?;

        return Ok(volume.as_standard_layout().into_owned());
    }
}

/// Pull a single fluorescence channel out of `stack` as a (Z, Y, X) volume.
///
/// The tag is resolved to a channel name through `channels`, and the name to
/// a channel index by its position in the directory. Stacks without a `C`
/// axis are treated as single channel.
pub fn isolate_channel(
    stack: &RawStack,
    tag: &str,
    channels: &ChannelDirectory,
) -> Result<Array3<u16>> {
    let name = channels
        .name(tag)
        .ok_or_else(|| Error::UnknownChannelTag(tag.to_string()))?;
    let index = channels
        .index_of_name(name)
        .ok_or_else(|| Error::UnknownChannelTag(tag.to_string()))?;

    let nchannels = stack.dims().get(&'C').cloned().unwrap_or(1);
    if index >= nchannels {
        return Err(Error::ChannelIndexOutOfRange { index, nchannels });
    }

    let reduced = if stack.axis_position('C').is_some() {
        stack.take_axis('C', index)?
    } else {
        stack.clone()
    };

    let volume = reduced.into_volume()?;
    info!(
        "Isolated channel {} ('{}', index {}): volume of shape {:?}",
        tag,
        name,
        index,
        volume.dim()
    );

    return Ok(volume);
}
