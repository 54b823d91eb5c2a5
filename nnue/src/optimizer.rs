use candle_core::backprop::GradStore;
use candle_core::{Result, Tensor, Var};

/// One trainable tensor and the range it must stay inside after every step.
#[derive(Clone, Debug)]
pub struct ParamGroup {
    pub name: String,
    pub var: Var,
    pub clamp: Option<(f32, f32)>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParamsAdam {
    pub lr: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
    pub weight_decay: f64,
}

impl Default for ParamsAdam {
    fn default() -> Self {
        Self {
            lr: 0.001,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay: 0.0,
        }
    }
}

/// Learning rate as a function of the 1-based superbatch.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LrSchedule {
    /// `initial * decay^(superbatch - 1)`.
    StepDecay { decay: f64 },
    /// Half cosine from the initial rate at superbatch 1 down to `final_lr`
    /// at `final_superbatch`, constant afterwards.
    CosineDecay {
        final_lr: f64,
        final_superbatch: usize,
    },
}

impl LrSchedule {
    pub fn rate(&self, initial_lr: f64, superbatch: usize) -> f64 {
        let done = superbatch.saturating_sub(1);
        match *self {
            LrSchedule::StepDecay { decay } => initial_lr * decay.powi(done as i32),
            LrSchedule::CosineDecay {
                final_lr,
                final_superbatch,
            } => {
                let span = final_superbatch.saturating_sub(1).max(1);
                let progress = done.min(span) as f64 / span as f64;
                let cosine = 0.5 * (1.0 + (std::f64::consts::PI * progress).cos());
                final_lr + (initial_lr - final_lr) * cosine
            }
        }
    }
}

struct Slot {
    group: ParamGroup,
    first_moment: Var,
    second_moment: Var,
}

/// Adam with decoupled weight decay, followed by clamping each group into
/// its quantizable range.
pub struct ClampedAdam {
    slots: Vec<Slot>,
    params: ParamsAdam,
    step_t: usize,
}

impl ClampedAdam {
    pub fn new(groups: Vec<ParamGroup>, params: ParamsAdam) -> Result<Self> {
        let slots = groups
            .into_iter()
            .map(|group| {
                let var = &group.var;
                let first_moment = Var::zeros(var.shape(), var.dtype(), var.device())?;
                let second_moment = Var::zeros(var.shape(), var.dtype(), var.device())?;
                Ok(Slot {
                    group,
                    first_moment,
                    second_moment,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            slots,
            params,
            step_t: 0,
        })
    }

    pub fn backward_step(&mut self, loss: &Tensor) -> Result<()> {
        let grads = loss.backward()?;
        self.step(&grads)
    }

    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        self.step_t += 1;

        let ParamsAdam {
            lr,
            beta1,
            beta2,
            eps,
            weight_decay,
        } = self.params;
        let scale_m = 1.0 / (1.0 - beta1.powi(self.step_t as i32));
        let scale_v = 1.0 / (1.0 - beta2.powi(self.step_t as i32));

        for slot in &self.slots {
            let theta = &slot.group.var;
            let Some(g) = grads.get(theta) else {
                continue;
            };

            let m = &slot.first_moment;
            let v = &slot.second_moment;

            let next_m = ((m.as_tensor() * beta1)? + (g * (1.0 - beta1))?)?;
            let next_v = ((v.as_tensor() * beta2)? + (g.sqr()? * (1.0 - beta2))?)?;
            let m_hat = (&next_m * scale_m)?;
            let v_hat = (&next_v * scale_v)?;

            let decayed = (theta.as_tensor() * (1.0 - lr * weight_decay))?;
            let update = (m_hat / (v_hat.sqrt()? + eps)?)?;
            let next_theta = (decayed - (update * lr)?)?;

            m.set(&next_m)?;
            v.set(&next_v)?;
            theta.set(&next_theta)?;
        }

        self.clamp_parameters()
    }

    /// Applies every group's clamp range in place.
    pub fn clamp_parameters(&self) -> Result<()> {
        for slot in &self.slots {
            if let Some((min, max)) = slot.group.clamp {
                let var = &slot.group.var;
                var.set(&var.as_tensor().clamp(min, max)?)?;
            }
        }
        Ok(())
    }

    pub fn learning_rate(&self) -> f64 {
        self.params.lr
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        self.params.lr = lr;
    }

    /// Sets the rate `schedule` gives `superbatch` and returns it.
    pub fn apply_schedule(
        &mut self,
        schedule: &LrSchedule,
        initial_lr: f64,
        superbatch: usize,
    ) -> f64 {
        let lr = schedule.rate(initial_lr, superbatch);
        self.set_learning_rate(lr);
        lr
    }

    pub fn step_count(&self) -> usize {
        self.step_t
    }

    pub fn set_step_count(&mut self, step: usize) {
        self.step_t = step;
    }

    pub fn groups(&self) -> impl Iterator<Item = &ParamGroup> {
        self.slots.iter().map(|s| &s.group)
    }

    /// `(group name, first moment, second moment)` for checkpointing.
    pub fn moments(&self) -> impl Iterator<Item = (&str, &Var, &Var)> {
        self.slots
            .iter()
            .map(|s| (s.group.name.as_str(), &s.first_moment, &s.second_moment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn group(name: &str, values: &[f32], clamp: Option<(f32, f32)>) -> ParamGroup {
        ParamGroup {
            name: name.to_string(),
            var: Var::new(values, &Device::Cpu).unwrap(),
            clamp,
        }
    }

    fn values(group: &ParamGroup) -> Vec<f32> {
        group.var.as_tensor().to_vec1().unwrap()
    }

    #[test]
    fn test_first_step_moves_by_learning_rate() {
        let g = group("w", &[0.0, 0.0], None);
        let mut opt = ClampedAdam::new(
            vec![g.clone()],
            ParamsAdam {
                lr: 0.1,
                ..Default::default()
            },
        )
        .unwrap();

        let loss = (g.var.as_tensor() * 3.0).unwrap().sum_all().unwrap();
        opt.backward_step(&loss).unwrap();

        for v in values(&g) {
            assert!((v + 0.1).abs() < 1e-5, "{}", v);
        }
        assert_eq!(opt.step_count(), 1);
    }

    #[test]
    fn test_clamp_holds_after_step() {
        let clamped = group("out.weight", &[1.9, -1.9, 0.0], Some((-2.0, 1.984375)));
        let free = group("ft.weight", &[1.9, -1.9, 0.0], None);
        let mut opt = ClampedAdam::new(
            vec![clamped.clone(), free.clone()],
            ParamsAdam {
                lr: 1.0,
                ..Default::default()
            },
        )
        .unwrap();

        // Push the first two elements outward
        let direction = Tensor::new(&[-1f32, 1.0, 0.0], &Device::Cpu).unwrap();
        let loss = (clamped.var.as_tensor().mul(&direction).unwrap().sum_all().unwrap()
            + free.var.as_tensor().mul(&direction).unwrap().sum_all().unwrap())
        .unwrap();
        opt.backward_step(&loss).unwrap();

        let c = values(&clamped);
        assert_eq!(c[0], 1.984375);
        assert_eq!(c[1], -2.0);
        assert!(c.iter().all(|&v| (-2.0..=1.984375).contains(&v)));

        let f = values(&free);
        assert!(f[0] > 2.5 && f[1] < -2.5);
    }

    #[test]
    fn test_learning_rate_is_adjustable() {
        let mut opt =
            ClampedAdam::new(vec![group("w", &[1.0], None)], ParamsAdam::default()).unwrap();
        assert_eq!(opt.learning_rate(), 0.001);

        opt.set_learning_rate(0.0005);
        assert_eq!(opt.learning_rate(), 0.0005);
    }

    #[test]
    fn test_step_decay_compounds_per_superbatch() {
        let schedule = LrSchedule::StepDecay { decay: 0.5 };

        assert_eq!(schedule.rate(0.1, 1), 0.1);
        assert_eq!(schedule.rate(0.1, 2), 0.05);
        assert_eq!(schedule.rate(0.1, 4), 0.0125);
    }

    #[test]
    fn test_cosine_decay_reaches_final_rate() {
        let schedule = LrSchedule::CosineDecay {
            final_lr: 0.0001,
            final_superbatch: 101,
        };
        let rate = |sb| schedule.rate(0.001, sb);

        assert!((rate(1) - 0.001).abs() < 1e-12);
        assert!((rate(51) - 0.00055).abs() < 1e-12);
        assert!((rate(101) - 0.0001).abs() < 1e-12);
        assert!((rate(500) - 0.0001).abs() < 1e-12);

        let rates: Vec<f64> = (1..=101).map(rate).collect();
        assert!(rates.windows(2).all(|w| w[1] <= w[0]));
    }

    #[test]
    fn test_schedule_drives_optimizer_rate() {
        let mut opt =
            ClampedAdam::new(vec![group("w", &[1.0], None)], ParamsAdam::default()).unwrap();
        let schedule = LrSchedule::CosineDecay {
            final_lr: 0.0,
            final_superbatch: 3,
        };

        let lr = opt.apply_schedule(&schedule, 0.002, 2);
        assert!((lr - 0.001).abs() < 1e-12);
        assert_eq!(opt.learning_rate(), lr);

        opt.apply_schedule(&schedule, 0.002, 3);
        assert_eq!(opt.learning_rate(), 0.0);
    }

    #[test]
    fn test_moments_follow_group_order() {
        let opt = ClampedAdam::new(
            vec![group("a", &[1.0], None), group("b", &[1.0, 2.0], None)],
            ParamsAdam::default(),
        )
        .unwrap();

        let names: Vec<&str> = opt.moments().map(|(name, _, _)| name).collect();
        assert_eq!(names, ["a", "b"]);
    }
}
