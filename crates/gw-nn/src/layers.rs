use gw_core::{GwError, Result, Tensor};
use ndarray::Array2;
use rand::{rngs::StdRng, Rng};

/// Trainable tensor with a canonical name, readable and writable by an
/// external optimizer between steps.
#[derive(Clone, Debug)]
pub struct Parameter {
    name: String,
    value: Tensor,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: Tensor) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    /// Returns the identifier assigned to the parameter.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Provides an immutable view into the underlying tensor value.
    pub fn value(&self) -> &Tensor {
        &self.value
    }

    /// Provides a mutable view into the underlying tensor value.
    pub fn value_mut(&mut self) -> &mut Tensor {
        &mut self.value
    }
}

/// Fully-connected layer. The bias is stored as a `(1, out)` tensor so it
/// broadcasts over the batch dimension.
#[derive(Clone, Debug)]
pub struct Linear {
    weight: Parameter,
    bias: Parameter,
}

impl Linear {
    /// Creates a new linear layer with uniform `+-1/sqrt(input_dim)` weights.
    pub fn new(
        name: impl Into<String>,
        input_dim: usize,
        output_dim: usize,
        rng: &mut StdRng,
    ) -> Result<Self> {
        if input_dim == 0 || output_dim == 0 {
            return Err(GwError::Shape {
                context: format!("linear layer dims must be > 0, got {input_dim}x{output_dim}"),
            });
        }
        let name = name.into();
        let bound = 1.0 / (input_dim as f32).sqrt();
        let weight = Array2::from_shape_fn((input_dim, output_dim), |_| {
            rng.gen_range(-bound..bound)
        });
        let bias = Array2::zeros((1, output_dim));
        Ok(Self {
            weight: Parameter::new(format!("{name}::weight"), weight),
            bias: Parameter::new(format!("{name}::bias"), bias),
        })
    }

    /// Creates a square layer initialised to the identity map. Used by
    /// round-trip sanity checks.
    pub fn identity(name: impl Into<String>, dim: usize) -> Result<Self> {
        if dim == 0 {
            return Err(GwError::Shape {
                context: "identity layer dim must be > 0".to_string(),
            });
        }
        let name = name.into();
        Ok(Self {
            weight: Parameter::new(format!("{name}::weight"), Array2::eye(dim)),
            bias: Parameter::new(format!("{name}::bias"), Array2::zeros((1, dim))),
        })
    }

    pub fn input_dim(&self) -> usize {
        self.weight.value().nrows()
    }

    pub fn output_dim(&self) -> usize {
        self.weight.value().ncols()
    }

    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        if input.ncols() != self.input_dim() {
            return Err(GwError::Shape {
                context: format!(
                    "linear input has {} features, layer expects {}",
                    input.ncols(),
                    self.input_dim()
                ),
            });
        }
        Ok(input.dot(self.weight.value()) + self.bias.value())
    }

    pub fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> Result<()>,
    ) -> Result<()> {
        visitor(&self.weight)?;
        visitor(&self.bias)?;
        Ok(())
    }

    pub fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> Result<()>,
    ) -> Result<()> {
        visitor(&mut self.weight)?;
        visitor(&mut self.bias)?;
        Ok(())
    }
}

fn relu(mut x: Tensor) -> Tensor {
    x.mapv_inplace(|v| v.max(0.0));
    x
}

/// MLP used to project per-domain latents into and out of the workspace:
/// `n_layers` hidden blocks with ReLU activations followed by a linear head.
#[derive(Clone, Debug)]
pub struct Projector {
    layers: Vec<Linear>,
}

impl Projector {
    pub fn new(
        name: impl Into<String>,
        input_dim: usize,
        hidden_dim: usize,
        output_dim: usize,
        n_layers: usize,
        rng: &mut StdRng,
    ) -> Result<Self> {
        let name = name.into();
        let mut layers = Vec::with_capacity(n_layers + 1);
        let mut in_dim = input_dim;
        for idx in 0..n_layers {
            layers.push(Linear::new(format!("{name}::hidden{idx}"), in_dim, hidden_dim, rng)?);
            in_dim = hidden_dim;
        }
        layers.push(Linear::new(format!("{name}::head"), in_dim, output_dim, rng)?);
        Ok(Self { layers })
    }

    /// Single identity layer; requires `input_dim == output_dim`.
    pub fn identity(name: impl Into<String>, dim: usize) -> Result<Self> {
        Ok(Self {
            layers: vec![Linear::identity(name, dim)?],
        })
    }

    pub fn input_dim(&self) -> usize {
        self.layers[0].input_dim()
    }

    pub fn output_dim(&self) -> usize {
        self.layers[self.layers.len() - 1].output_dim()
    }

    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let last = self.layers.len() - 1;
        let mut out = input.clone();
        for (idx, layer) in self.layers.iter().enumerate() {
            out = layer.forward(&out)?;
            if idx < last {
                out = relu(out);
            }
        }
        Ok(out)
    }

    pub fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> Result<()>,
    ) -> Result<()> {
        for layer in &self.layers {
            layer.visit_parameters(visitor)?;
        }
        Ok(())
    }

    pub fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> Result<()>,
    ) -> Result<()> {
        for layer in &mut self.layers {
            layer.visit_parameters_mut(visitor)?;
        }
        Ok(())
    }
}
