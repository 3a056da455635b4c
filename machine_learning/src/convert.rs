use comms::Tensor;
use ndarray::{ArrayD, IxDyn};

use crate::{MlErr, Result};

/// Turns a received `f32` tensor into an array.
pub fn to_array(tensor: &Tensor) -> Result<ArrayD<f32>> {
    let values = tensor.to_f32_vec()?;

    ArrayD::from_shape_vec(IxDyn(tensor.shape()), values).map_err(|e| MlErr::ShapeMismatch {
        stage: "input".to_string(),
        got: tensor.shape().to_vec(),
        expected: e.to_string(),
    })
}

/// Turns an array into an `f32` tensor, in row-major order.
pub fn to_tensor(x: &ArrayD<f32>) -> Result<Tensor> {
    let values: Vec<f32> = x.iter().copied().collect();
    Ok(Tensor::from_f32(x.shape().to_vec(), &values)?)
}

#[cfg(test)]
mod tests {
    use ndarray::Array4;

    use super::*;

    #[test]
    fn keeps_shape_and_order() {
        let x = Array4::from_shape_fn((1, 2, 3, 4), |(_, c, i, j)| (c * 12 + i * 4 + j) as f32)
            .into_dyn();
        let t = to_tensor(&x).unwrap();

        assert_eq!(t.shape(), &[1, 2, 3, 4]);
        assert_eq!(to_array(&t).unwrap(), x);
    }

    #[test]
    fn transposed_arrays_are_written_logically() {
        let x = ndarray::array![[1.0, 2.0], [3.0, 4.0]].reversed_axes().into_dyn();
        let t = to_tensor(&x).unwrap();

        assert_eq!(t.to_f32_vec().unwrap(), vec![1.0, 3.0, 2.0, 4.0]);
    }
}
