//! SymbolicAdamW - AdamW with inspectable, persistable state
//!
//! `candle_nn::AdamW` keeps its moments private, so a resumed run could not
//! restore them. This optimizer stores every moment as a named `Var` so the
//! whole state can be written to and read from safetensors.

use std::collections::HashMap;

use candle_core::backprop::GradStore;
use candle_core::{DType, Result, Tensor, Var};
use candle_nn::{Optimizer, VarMap};

/// Name of the step counter inside [`SymbolicAdamW::state_vars`].
pub const STEP_KEY: &str = "adamw.step";

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AdamWParams {
    pub lr: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
    pub weight_decay: f64,
}

impl Default for AdamWParams {
    fn default() -> Self {
        Self {
            lr: 1e-3,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay: 0.01,
        }
    }
}

struct ParamState {
    name: String,
    var: Var,
    first_moment: Var,
    second_moment: Var,
}

pub struct SymbolicAdamW {
    params: Vec<ParamState>,
    step: Var,
    pub config: AdamWParams,
}

impl SymbolicAdamW {
    /// Builds the optimizer over every float variable of `varmap`, naming
    /// the state after the variable names so it survives a restart.
    pub fn from_varmap(varmap: &VarMap, config: AdamWParams) -> Result<Self> {
        let data = varmap
            .data()
            .lock()
            .map_err(|e| candle_core::Error::Msg(format!("VarMap lock poisoned: {e}")))?;
        let mut named: Vec<(String, Var)> = data
            .iter()
            .map(|(name, var)| (name.clone(), var.clone()))
            .collect();
        drop(data);
        named.sort_by(|a, b| a.0.cmp(&b.0));
        Self::from_named(named, config)
    }

    pub fn from_named(vars: Vec<(String, Var)>, config: AdamWParams) -> Result<Self> {
        let mut device = candle_core::Device::Cpu;
        let mut params = Vec::with_capacity(vars.len());
        for (name, var) in vars {
            if !var.dtype().is_float() {
                continue;
            }
            device = var.device().clone();
            let first_moment = Var::zeros(var.shape(), var.dtype(), var.device())?;
            let second_moment = Var::zeros(var.shape(), var.dtype(), var.device())?;
            params.push(ParamState {
                name,
                var,
                first_moment,
                second_moment,
            });
        }
        let step = Var::from_tensor(&Tensor::zeros((), DType::F64, &device)?)?;
        Ok(Self {
            params,
            step,
            config,
        })
    }

    /// Number of optimizer steps taken so far.
    pub fn step_count(&self) -> Result<u64> {
        Ok(self.step.as_tensor().to_scalar::<f64>()? as u64)
    }

    /// All optimizer state by name: `<param>.exp_avg`, `<param>.exp_avg_sq`
    /// and the step counter under [`STEP_KEY`].
    pub fn state_vars(&self) -> HashMap<String, Var> {
        let mut state = HashMap::with_capacity(self.params.len() * 2 + 1);
        for p in &self.params {
            state.insert(format!("{}.exp_avg", p.name), p.first_moment.clone());
            state.insert(format!("{}.exp_avg_sq", p.name), p.second_moment.clone());
        }
        state.insert(STEP_KEY.to_string(), self.step.clone());
        state
    }

    /// Snapshot of [`state_vars`](Self::state_vars) as plain tensors.
    pub fn state_tensors(&self) -> HashMap<String, Tensor> {
        self.state_vars()
            .into_iter()
            .map(|(name, var)| (name, var.as_tensor().clone()))
            .collect()
    }
}

impl Optimizer for SymbolicAdamW {
    type Config = AdamWParams;

    fn new(vars: Vec<Var>, config: AdamWParams) -> Result<Self> {
        let named = vars
            .into_iter()
            .enumerate()
            .map(|(i, var)| (format!("param.{i}"), var))
            .collect();
        Self::from_named(named, config)
    }

    fn step(&mut self, grads: &GradStore) -> Result<()> {
        let t = self.step.as_tensor().to_scalar::<f64>()? + 1.0;
        self.step.set(&Tensor::new(t, self.step.device())?)?;

        let AdamWParams {
            lr,
            beta1,
            beta2,
            eps,
            weight_decay,
        } = self.config;
        let scale_m = 1.0 / (1.0 - beta1.powf(t));
        let scale_v = 1.0 / (1.0 - beta2.powf(t));

        for p in &self.params {
            let theta = p.var.as_tensor();
            let Some(g) = grads.get(theta) else {
                continue;
            };
            let m = p.first_moment.as_tensor();
            let v = p.second_moment.as_tensor();

            let next_m = ((m * beta1)? + (g * (1.0 - beta1))?)?;
            let next_v = ((v * beta2)? + (g.sqr()? * (1.0 - beta2))?)?;
            let m_hat = (&next_m * scale_m)?;
            let v_hat = (&next_v * scale_v)?;
            let decayed = (theta * (1.0 - lr * weight_decay))?;
            let update = (m_hat / v_hat.sqrt()?.affine(1.0, eps)?)?;
            let next_theta = (decayed - (update * lr)?)?;

            p.first_moment.set(&next_m)?;
            p.second_moment.set(&next_v)?;
            p.var.set(&next_theta)?;
        }
        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.config.lr
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.config.lr = lr;
    }
}
