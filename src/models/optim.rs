//! Trainable parameters and the optimizers stepping them.
use std::fmt;

use candle_core::{DType, Device, Tensor, Var};
use candle_nn::optim::{AdamW, Optimizer as _, ParamsAdamW, SGD};
use ndarray::Array2;
use rand::distributions::{Distribution, Uniform};
use rand::Rng;
use serde::de::{Deserialize, Deserializer, Error as _};
use serde::ser::{Error as _, Serialize, Serializer};

use super::{glorot_bound, ModelError, Optimizer};

/// A two-dimensional trainable tensor.
///
/// Cloning a `Var` shares its storage, so parameters are deliberately not
/// `Clone`.
pub struct Parameter {
    var: Var,
}

/// On-disk form of a parameter.
#[derive(Serialize, Deserialize)]
struct StoredParameter {
    shape: (usize, usize),
    data: Vec<f32>,
}

impl Parameter {
    /// Wrap `values` as a trainable tensor.
    pub fn new(values: Array2<f32>) -> Result<Self, ModelError> {
        let shape = values.dim();
        let data = values.iter().cloned().collect();
        Self::from_vec(data, shape)
    }

    fn from_vec(data: Vec<f32>, shape: (usize, usize)) -> Result<Self, ModelError> {
        let tensor = Tensor::from_vec(data, shape, &Device::Cpu)?;
        Ok(Parameter {
            var: Var::from_tensor(&tensor)?,
        })
    }

    /// A zero-initialised parameter.
    pub fn zeros(rows: usize, cols: usize) -> Result<Self, ModelError> {
        Ok(Parameter {
            var: Var::zeros((rows, cols), DType::F32, &Device::Cpu)?,
        })
    }

    /// Glorot-uniform initialised `rows × cols` parameter with the given fans.
    pub fn glorot<R: Rng>(
        rows: usize,
        cols: usize,
        fan_in: usize,
        fan_out: usize,
        rng: &mut R,
    ) -> Result<Self, ModelError> {
        let bound = glorot_bound(fan_in, fan_out);
        let range = Uniform::new_inclusive(-bound, bound);
        let data = (0..rows * cols).map(|_| range.sample(rng)).collect();

        Self::from_vec(data, (rows, cols))
    }

    /// `(rows, cols)`.
    pub fn shape(&self) -> (usize, usize) {
        match *self.var.dims() {
            [rows, cols] => (rows, cols),
            _ => (0, 0),
        }
    }

    /// The tensor taking part in autodiff.
    pub fn as_tensor(&self) -> &Tensor {
        self.var.as_tensor()
    }

    pub(crate) fn var(&self) -> &Var {
        &self.var
    }

    /// Copy the current values out.
    pub fn to_array(&self) -> Result<Array2<f32>, ModelError> {
        let shape = self.shape();
        let data = self.as_tensor().flatten_all()?.to_vec1::<f32>()?;

        Array2::from_shape_vec(shape, data).map_err(|_| ModelError::ShapeMismatch {
            name: "parameter".to_owned(),
            expected: shape,
            actual: self.shape(),
        })
    }

    /// Overwrite the values in place; the shape must not change.
    pub fn assign(&self, values: &Array2<f32>) -> Result<(), ModelError> {
        if values.dim() != self.shape() {
            return Err(ModelError::ShapeMismatch {
                name: "parameter".to_owned(),
                expected: self.shape(),
                actual: values.dim(),
            });
        }
        let tensor = Tensor::from_vec(values.iter().cloned().collect(), values.dim(), &Device::Cpu)?;
        self.var.set(&tensor)?;
        Ok(())
    }
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Parameter").field("shape", &self.shape()).finish()
    }
}

impl Serialize for Parameter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let data = self
            .as_tensor()
            .flatten_all()
            .and_then(|tensor| tensor.to_vec1::<f32>())
            .map_err(S::Error::custom)?;

        StoredParameter {
            shape: self.shape(),
            data,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Parameter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let stored = StoredParameter::deserialize(deserializer)?;
        let (rows, cols) = stored.shape;
        if stored.data.len() != rows * cols {
            return Err(D::Error::custom(format!(
                "parameter of shape {:?} holds {} values",
                stored.shape,
                stored.data.len()
            )));
        }

        Parameter::from_vec(stored.data, stored.shape).map_err(D::Error::custom)
    }
}

/// Optimizer state over a fixed set of parameters.
pub(crate) enum Trainer {
    Sgd(SGD),
    Adam(AdamW),
}

impl Trainer {
    /// Optimizer state for `vars`.
    pub fn new(optimizer: Optimizer, vars: Vec<Var>, learning_rate: f32) -> Result<Self, ModelError> {
        let learning_rate = f64::from(learning_rate);

        let trainer = match optimizer {
            Optimizer::Sgd => Trainer::Sgd(SGD::new(vars, learning_rate)?),
            Optimizer::Adam => Trainer::Adam(AdamW::new(
                vars,
                ParamsAdamW {
                    lr: learning_rate,
                    weight_decay: 0.0,
                    ..ParamsAdamW::default()
                },
            )?),
        };

        Ok(trainer)
    }

    /// Backpropagate `loss` and update every parameter it depends on.
    pub fn backward_step(&mut self, loss: &Tensor) -> Result<(), ModelError> {
        match *self {
            Trainer::Sgd(ref mut sgd) => sgd.backward_step(loss)?,
            Trainer::Adam(ref mut adam) => adam.backward_step(loss)?,
        }
        Ok(())
    }
}

impl fmt::Debug for Trainer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Trainer::Sgd(_) => f.write_str("Trainer::Sgd"),
            Trainer::Adam(_) => f.write_str("Trainer::Adam"),
        }
    }
}

#[cfg(test)]
mod tests {
    use ndarray::arr2;
    use rand::SeedableRng;
    use rand_xorshift::XorShiftRng;

    use super::*;

    #[test]
    fn parameters_survive_serialization() {
        let parameter = Parameter::new(arr2(&[[1.0, -2.0, 3.0], [0.5, 0.0, -0.25]])).unwrap();

        let json = serde_json::to_string(&parameter).unwrap();
        let restored: Parameter = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.shape(), (2, 3));
        assert_eq!(restored.to_array().unwrap(), parameter.to_array().unwrap());
        assert!(serde_json::from_str::<Parameter>(r#"{"shape":[2,2],"data":[1.0]}"#).is_err());
    }

    #[test]
    fn glorot_respects_its_bound() {
        let mut rng = XorShiftRng::seed_from_u64(3);
        let parameter = Parameter::glorot(30, 6, 30, 6, &mut rng).unwrap();
        let bound = glorot_bound(30, 6);

        assert_eq!(parameter.shape(), (30, 6));
        assert!(parameter.to_array().unwrap().iter().all(|x| x.abs() <= bound));
    }

    #[test]
    fn optimizers_descend_a_quadratic() {
        let target = arr2(&[[1.0_f32, -2.0], [0.5, 3.0]]);

        for &optimizer in &[Optimizer::Sgd, Optimizer::Adam] {
            let parameter = Parameter::zeros(2, 2).unwrap();
            let goal = Tensor::from_vec(target.iter().cloned().collect(), (2, 2), &Device::Cpu).unwrap();
            let mut trainer = Trainer::new(optimizer, vec![parameter.var().clone()], 0.1).unwrap();

            let loss = |parameter: &Parameter| {
                parameter
                    .as_tensor()
                    .sub(&goal)
                    .and_then(|diff| diff.sqr())
                    .and_then(|squares| squares.sum_all())
                    .unwrap()
            };

            let first = loss(&parameter).to_scalar::<f32>().unwrap();
            for _ in 0..200 {
                trainer.backward_step(&loss(&parameter)).unwrap();
            }
            let last = loss(&parameter).to_scalar::<f32>().unwrap();

            assert!(last < 1e-2 * first, "{:?} ended at {}", optimizer, last);
        }
    }

    #[test]
    fn assign_keeps_the_shape() {
        let parameter = Parameter::zeros(2, 1).unwrap();

        parameter.assign(&arr2(&[[4.0], [5.0]])).unwrap();
        assert_eq!(parameter.to_array().unwrap(), arr2(&[[4.0], [5.0]]));
        assert!(parameter.assign(&arr2(&[[1.0, 2.0]])).is_err());
    }
}
