//! Trainable dense head: dropout → dense+ReLU → dropout → dense+softmax.

use ndarray::{Array, Array1, Array2, Axis, Dimension, Zip};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

/// Weights of the classification head. Inference never applies dropout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierHead {
    pub(crate) w1: Array2<f32>,
    pub(crate) b1: Array1<f32>,
    pub(crate) w2: Array2<f32>,
    pub(crate) b2: Array1<f32>,
}

/// Gradients of one mini-batch, shaped like [`ClassifierHead`].
pub(crate) struct Gradients {
    pub w1: Array2<f32>,
    pub b1: Array1<f32>,
    pub w2: Array2<f32>,
    pub b2: Array1<f32>,
}

fn he_init(rows: usize, cols: usize, rng: &mut StdRng) -> Array2<f32> {
    let scale = (2.0 / rows as f32).sqrt();
    Array2::from_shape_fn((rows, cols), |_| {
        let z: f32 = StandardNormal.sample(&mut *rng);
        z * scale
    })
}

fn softmax_rows(logits: &mut Array2<f32>) {
    for mut row in logits.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        if sum > 0.0 {
            row /= sum;
        }
    }
}

/// Inverted dropout mask: kept units are scaled by `1 / (1 - rate)`.
fn dropout_mask(shape: (usize, usize), rate: f32, rng: &mut StdRng) -> Array2<f32> {
    if rate <= 0.0 {
        return Array2::ones(shape);
    }
    let keep = 1.0 - rate;
    Array2::from_shape_fn(shape, |_| if rng.gen::<f32>() < keep { 1.0 / keep } else { 0.0 })
}

impl ClassifierHead {
    pub fn new(input_dim: usize, hidden_dim: usize, num_classes: usize, rng: &mut StdRng) -> Self {
        Self {
            w1: he_init(input_dim, hidden_dim, rng),
            b1: Array1::zeros(hidden_dim),
            w2: he_init(hidden_dim, num_classes, rng),
            b2: Array1::zeros(num_classes),
        }
    }

    pub fn input_dim(&self) -> usize {
        self.w1.nrows()
    }

    pub fn num_classes(&self) -> usize {
        self.w2.ncols()
    }

    /// Whether the weight shapes chain together.
    pub fn is_consistent(&self) -> bool {
        self.w1.ncols() == self.b1.len() && self.w1.ncols() == self.w2.nrows() && self.w2.ncols() == self.b2.len()
    }

    /// Class probabilities for a batch of pooled feature rows.
    pub fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        let hidden = (x.dot(&self.w1) + &self.b1).mapv(|v| v.max(0.0));
        let mut logits = hidden.dot(&self.w2) + &self.b2;
        softmax_rows(&mut logits);
        logits
    }

    /// Class probabilities for a single feature vector.
    pub fn predict(&self, features: &Array1<f32>) -> Array1<f32> {
        let x = features.view().insert_axis(Axis(0)).to_owned();
        self.forward(&x).row(0).to_owned()
    }

    /// Forward and backward pass with dropout. Returns mean cross-entropy and gradients.
    pub(crate) fn backprop(
        &self,
        x: &Array2<f32>,
        targets: &Array2<f32>,
        dropout: (f32, f32),
        rng: &mut StdRng,
    ) -> (f32, Gradients) {
        let batch = x.nrows() as f32;

        let x0 = x * &dropout_mask(x.dim(), dropout.0, rng);
        let z1 = x0.dot(&self.w1) + &self.b1;
        let a1 = z1.mapv(|v| v.max(0.0));
        let mask1 = dropout_mask(a1.dim(), dropout.1, rng);
        let a1d = &a1 * &mask1;
        let mut probs = a1d.dot(&self.w2) + &self.b2;
        softmax_rows(&mut probs);

        let loss = -(targets * &probs.mapv(|p| (p + 1e-7).ln())).sum() / batch;

        let dz2 = (&probs - targets) / batch;
        let w2 = a1d.t().dot(&dz2);
        let b2 = dz2.sum_axis(Axis(0));
        let da1 = dz2.dot(&self.w2.t()) * &mask1;
        let relu_grad = z1.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 });
        let dz1 = da1 * &relu_grad;
        let w1 = x0.t().dot(&dz1);
        let b1 = dz1.sum_axis(Axis(0));

        (loss, Gradients { w1, b1, w2, b2 })
    }
}

struct AdamParams {
    b1: f32,
    b2: f32,
    eps: f32,
    lr_t: f32,
}

impl AdamParams {
    fn update<D: Dimension>(&self, param: &mut Array<f32, D>, m: &mut Array<f32, D>, v: &mut Array<f32, D>, g: &Array<f32, D>) {
        Zip::from(param).and(m).and(v).and(g).for_each(|p, m, v, &g| {
            *m = self.b1 * *m + (1.0 - self.b1) * g;
            *v = self.b2 * *v + (1.0 - self.b2) * g * g;
            *p -= self.lr_t * *m / (v.sqrt() + self.eps);
        });
    }
}

/// Adam optimizer state for a [`ClassifierHead`].
pub(crate) struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    t: i32,
    m: Gradients,
    v: Gradients,
}

impl Adam {
    pub fn new(head: &ClassifierHead, learning_rate: f32) -> Self {
        let zeros = || Gradients {
            w1: Array2::zeros(head.w1.dim()),
            b1: Array1::zeros(head.b1.len()),
            w2: Array2::zeros(head.w2.dim()),
            b2: Array1::zeros(head.b2.len()),
        };
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
            t: 0,
            m: zeros(),
            v: zeros(),
        }
    }

    pub fn step(&mut self, head: &mut ClassifierHead, grads: &Gradients) {
        self.t += 1;
        let (b1, b2, eps) = (self.beta1, self.beta2, self.epsilon);
        let lr_t = self.learning_rate * (1.0 - b2.powi(self.t)).sqrt() / (1.0 - b1.powi(self.t));

        let hp = AdamParams { b1, b2, eps, lr_t };
        hp.update(&mut head.w1, &mut self.m.w1, &mut self.v.w1, &grads.w1);
        hp.update(&mut head.b1, &mut self.m.b1, &mut self.v.b1, &grads.b1);
        hp.update(&mut head.w2, &mut self.m.w2, &mut self.v.w2, &grads.w2);
        hp.update(&mut head.b2, &mut self.m.b2, &mut self.v.b2, &grads.b2);
    }
}
