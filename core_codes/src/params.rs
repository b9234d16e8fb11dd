//! Named, trainable parameters backed by a candle [`VarMap`].

use candle_core::{Device, Shape, Tensor, Var};
use candle_nn::VarMap;
use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::error::{CodingError, Result};
use crate::shape::ensure_shape;

/// Registry of every learnable tensor of a model, enumerable for an optimizer.
#[derive(Clone)]
pub struct ParamStore {
    vars: VarMap,
    device: Device,
}

impl ParamStore {
    pub fn new(device: &Device) -> Self {
        Self {
            vars: VarMap::new(),
            device: device.clone(),
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Registers `name` with values drawn from `U(-bound, bound)` and returns its tensor.
    pub fn uniform<S: Into<Shape>>(
        &self,
        name: &str,
        shape: S,
        bound: f64,
        rng: &mut ChaCha8Rng,
    ) -> Result<Tensor> {
        let shape = shape.into();
        let bound = bound as f32;
        let values: Vec<f32> = (0..shape.elem_count())
            .map(|_| rng.gen_range(-bound..=bound))
            .collect();
        let var = Var::from_vec(values, shape, &self.device)?;
        let tensor = var.as_tensor().clone();
        self.vars
            .data()
            .lock()
            .map_err(|_| CodingError::ParamStorePoisoned)?
            .insert(name.to_string(), var);
        Ok(tensor)
    }

    pub fn get(&self, name: &str) -> Result<Var> {
        self.vars
            .data()
            .lock()
            .map_err(|_| CodingError::ParamStorePoisoned)?
            .get(name)
            .cloned()
            .ok_or_else(|| CodingError::MissingParameter(name.to_string()))
    }

    /// Every parameter, in no particular order.
    pub fn all_vars(&self) -> Vec<Var> {
        self.vars.all_vars()
    }

    /// Parameters sorted by name.
    pub fn named_vars(&self) -> Result<Vec<(String, Var)>> {
        let guard = self
            .vars
            .data()
            .lock()
            .map_err(|_| CodingError::ParamStorePoisoned)?;
        let mut named: Vec<_> = guard
            .iter()
            .map(|(name, var)| (name.clone(), var.clone()))
            .collect();
        named.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(named)
    }

    /// Overwrites the value of an existing parameter in place.
    pub fn assign(&self, name: &str, value: &Tensor) -> Result<()> {
        let var = self.get(name)?;
        ensure_shape("parameter assignment", value, var.dims())?;
        var.set(&value.to_device(&self.device)?)?;
        Ok(())
    }
}

impl std::fmt::Debug for ParamStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParamStore")
            .field("params", &self.vars.all_vars().len())
            .field("device", &self.device)
            .finish()
    }
}
