//! Merging new layers into a stored stack.
//!
//! A stack is a [`MaskedArray`] whose leading axis is the layer axis, newest layer first.
//! Each write prepends a layer. With gap closing, pixels that are invalid in the new layer keep their stored history instead of being pushed down by an invalid value, and trailing layers left fully invalid are dropped.

use ndarray::Zip;
use thiserror::Error;
use tilestack_codec::Element;

use crate::{Mask, MaskedArray};

/// A stack merge error.
#[derive(Clone, Debug, Error)]
pub enum StackError {
    /// The stored layers do not have the shape of the new layer.
    #[error("stored layers of shape {stored:?} are incompatible with a layer of shape {layer:?}")]
    IncompatibleSliceShape {
        /// The shape of a stored layer.
        stored: Vec<usize>,
        /// The shape of the new layer.
        layer: Vec<usize>,
    },
    /// An array shape error.
    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
}

/// Merge `layer` into the stored stack `existing` as its newest layer.
///
/// Elements of `layer` equal to `nodata` are invalid.
/// An absent stack is treated as a stack with no layers.
/// A fully invalid `layer` leaves the stack unchanged.
///
/// With `close_gaps`, every pixel that is invalid in `layer` keeps its stored history unshifted and trailing fully invalid layers are dropped.
/// The newest valid value of a pixel is always at the top of the stack.
///
/// # Errors
/// Returns [`StackError::IncompatibleSliceShape`] if the layers of `existing` do not have the shape of `layer`.
pub fn merge_layer<T: Element>(
    existing: Option<MaskedArray<T>>,
    layer: MaskedArray<T>,
    nodata: T,
    close_gaps: bool,
) -> Result<MaskedArray<T>, StackError> {
    let layer = layer.mask_nodata(nodata);
    let history = match existing {
        Some(history) => {
            if history.shape().get(1..) != Some(layer.shape()) {
                return Err(StackError::IncompatibleSliceShape {
                    stored: history.shape().get(1..).unwrap_or_default().to_vec(),
                    layer: layer.shape().to_vec(),
                });
            }
            history
        }
        None => empty_stack(layer.shape(), 0, nodata),
    };
    if layer.is_fully_masked() {
        return Ok(history);
    }

    let layer_mask = layer.full_mask();
    let prepended = MaskedArray::concatenate(&[layer.insert_axis(0), history.clone()])?;
    if !close_gaps {
        return Ok(prepended);
    }

    let shifted = MaskedArray::concatenate(&[
        history,
        empty_stack(layer_mask.shape(), 1, nodata),
    ])?;
    let gaps = layer_mask
        .broadcast(prepended.data().raw_dim())
        .ok_or_else(|| StackError::IncompatibleSliceShape {
            stored: prepended.shape().to_vec(),
            layer: layer_mask.shape().to_vec(),
        })?;
    let data = Zip::from(prepended.data())
        .and(shifted.data())
        .and(&gaps)
        .map_collect(|&prepended, &shifted, &gap| if gap { shifted } else { prepended });
    let mask = Zip::from(&prepended.full_mask())
        .and(&shifted.full_mask())
        .and(&gaps)
        .map_collect(|&prepended, &shifted, &gap| if gap { shifted } else { prepended });
    let merged = MaskedArray::new(data, Mask::from_full(mask)).map_err(|_| {
        StackError::IncompatibleSliceShape {
            stored: shifted.shape().to_vec(),
            layer: layer_mask.shape().to_vec(),
        }
    })?;
    Ok(trim_trailing_empty_layers(merged))
}

/// Merge a multi-layer array, newest layer first, into the stored stack `existing`.
///
/// Layers are merged oldest first so that the newest ends on top.
///
/// # Errors
/// Returns [`StackError::IncompatibleSliceShape`] if the layers of `existing` do not have the shape of the layers of `layers`.
pub fn merge_layers<T: Element>(
    existing: Option<MaskedArray<T>>,
    layers: &MaskedArray<T>,
    nodata: T,
    close_gaps: bool,
) -> Result<MaskedArray<T>, StackError> {
    let mut stack = existing;
    for index in (0..layers.num_layers()).rev() {
        stack = Some(merge_layer(stack, layers.layer(index), nodata, close_gaps)?);
    }
    Ok(stack.unwrap_or_else(|| empty_stack(layers.shape().get(1..).unwrap_or_default(), 0, nodata)))
}

/// A fully invalid stack of `layers` layers of shape `layer_shape`.
fn empty_stack<T: Element>(layer_shape: &[usize], layers: usize, nodata: T) -> MaskedArray<T> {
    let mut shape = Vec::with_capacity(layer_shape.len() + 1);
    shape.push(layers);
    shape.extend_from_slice(layer_shape);
    MaskedArray::fully_masked(&shape, nodata)
}

fn trim_trailing_empty_layers<T: Element>(stack: MaskedArray<T>) -> MaskedArray<T> {
    let mut keep = stack.num_layers();
    while keep > 0 && stack.layer(keep - 1).is_fully_masked() {
        keep -= 1;
    }
    if keep == stack.num_layers() {
        stack
    } else {
        stack.truncate_layers(keep)
    }
}
