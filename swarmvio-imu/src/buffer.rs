use std::collections::VecDeque;

use nalgebra::{Matrix3, UnitQuaternion, Vector3};
use swarmvio_types::{Covariance15, ImuSample, PreintegrationBlock};

use crate::noise::{skew, ImuNoiseModel};

/// A time-sorted deque of IMU samples with interval pre-integration
/// (spec §4.1).
#[derive(Debug, Clone)]
pub struct PreintegrationBuffer {
    samples: VecDeque<ImuSample>,
    noise: ImuNoiseModel,
}

impl PreintegrationBuffer {
    pub fn new(noise: ImuNoiseModel) -> Self {
        PreintegrationBuffer {
            samples: VecDeque::new(),
            noise,
        }
    }

    /// Appends `sample`; rejects (returns `false`, no mutation) if it is not
    /// strictly newer than the most recent sample already buffered.
    pub fn add(&mut self, sample: ImuSample) -> bool {
        if let Some(back) = self.samples.back() {
            if sample.t <= back.t {
                tracing::debug!(t = sample.t, back_t = back.t, "rejecting non-monotonic IMU sample");
                return false;
            }
        }
        self.samples.push_back(sample);
        true
    }

    /// True iff the buffer's newest sample is at or past `t`.
    pub fn available(&self, t: f64) -> bool {
        self.samples.back().map(|s| s.t >= t).unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns the samples spanning `[t0, t1]`, with the boundary samples
    /// linearly interpolated so the returned sequence starts and ends
    /// exactly at `t0`/`t1`.
    ///
    /// # Panics
    ///
    /// Calling `period` on an unavailable interval is a precondition
    /// violation (spec §4.1 "Failure"): the caller must busy-wait on
    /// [`PreintegrationBuffer::available`] first.
    pub fn period(&self, t0: f64, t1: f64) -> Vec<ImuSample> {
        assert!(self.available(t1), "period called on unavailable interval [{t0}, {t1}]");
        assert!(t0 <= t1, "period requires t0 <= t1, got [{t0}, {t1}]");

        let in_range: Vec<ImuSample> = self
            .samples
            .iter()
            .copied()
            .filter(|s| s.t >= t0 && s.t <= t1)
            .collect();

        let mut out = Vec::with_capacity(in_range.len() + 2);

        if in_range.first().map(|s| s.t > t0).unwrap_or(true) {
            if let Some(before) = self.sample_before(t0) {
                let after = in_range.first().copied().or_else(|| self.sample_after(t0));
                if let Some(after) = after {
                    out.push(before.lerp(&after, t0));
                }
            }
        }
        out.extend(in_range.iter().copied());
        if in_range.last().map(|s| s.t < t1).unwrap_or(true) {
            if let Some(after) = self.sample_after(t1) {
                let before = in_range.last().copied().or_else(|| self.sample_before(t1));
                if let Some(before) = before {
                    out.push(before.lerp(&after, t1));
                }
            }
        }
        out
    }

    fn sample_before(&self, t: f64) -> Option<ImuSample> {
        self.samples.iter().rev().find(|s| s.t <= t).copied()
    }

    fn sample_after(&self, t: f64) -> Option<ImuSample> {
        self.samples.iter().find(|s| s.t >= t).copied()
    }

    /// Discards samples strictly before `t`, bounding buffer memory.
    pub fn pop(&mut self, t: f64) {
        while self.samples.front().map(|s| s.t < t).unwrap_or(false) {
            self.samples.pop_front();
        }
    }

    pub fn mean_acc(&self) -> Vector3<f64> {
        mean_of(self.samples.iter().map(|s| s.acc))
    }

    pub fn mean_gyro(&self) -> Vector3<f64> {
        mean_of(self.samples.iter().map(|s| s.gyro))
    }

    /// Pre-integrates `[t0, t1]` starting from biases `(ba, bg)`.
    pub fn propagate(&self, ba: Vector3<f64>, bg: Vector3<f64>, t0: f64, t1: f64) -> PreintegrationBlock {
        integrate(ba, bg, &self.period(t0, t1), &self.noise)
    }
}

fn mean_of(values: impl Iterator<Item = Vector3<f64>>) -> Vector3<f64> {
    let mut sum = Vector3::zeros();
    let mut n = 0usize;
    for v in values {
        sum += v;
        n += 1;
    }
    if n == 0 {
        sum
    } else {
        sum / (n as f64)
    }
}

/// Pre-integrates a run of IMU samples via the standard midpoint scheme,
/// propagating the 15x15 error-state covariance alongside the mean
/// `(delta_p, delta_q, delta_v)` estimate.
pub fn integrate(ba: Vector3<f64>, bg: Vector3<f64>, samples: &[ImuSample], noise: &ImuNoiseModel) -> PreintegrationBlock {
    let mut block = PreintegrationBlock::identity(ba, bg);
    if samples.len() < 2 {
        return block;
    }

    let i3 = Matrix3::<f64>::identity();
    let acc_cov = noise.acc_cov();
    let gyro_cov = noise.gyro_cov();
    let acc_bias_cov = noise.acc_bias_cov();
    let gyro_bias_cov = noise.gyro_bias_cov();

    for w in samples.windows(2) {
        let (s0, s1) = (w[0], w[1]);
        let dt = s1.t - s0.t;
        if dt <= 0.0 {
            continue;
        }

        let delta_q = block.delta_q;
        let un_acc_0 = delta_q * (s0.acc - ba);
        let un_gyro = 0.5 * (s0.gyro + s1.gyro) - bg;
        let dq = UnitQuaternion::from_quaternion(nalgebra::Quaternion::new(
            1.0,
            un_gyro.x * dt * 0.5,
            un_gyro.y * dt * 0.5,
            un_gyro.z * dt * 0.5,
        ));
        let result_delta_q = (delta_q * dq).normalize();
        let un_acc_1 = result_delta_q * (s1.acc - ba);
        let un_acc = 0.5 * (un_acc_0 + un_acc_1);

        let delta_p_next = block.delta_p + block.delta_v * dt + 0.5 * un_acc * dt * dt;
        let delta_v_next = block.delta_v + un_acc * dt;

        let r_w_x = skew(un_gyro);
        let r_a0_x = skew(s0.acc - ba);
        let r_a1_x = skew(s1.acc - ba);
        let dq_mat = delta_q.to_rotation_matrix().into_inner();
        let rq_mat = result_delta_q.to_rotation_matrix().into_inner();

        let mut f = nalgebra::SMatrix::<f64, 15, 15>::identity();
        f.fixed_view_mut::<3, 3>(0, 3).copy_from(
            &(-0.25 * dq_mat * r_a0_x * dt * dt
                + -0.25 * rq_mat * r_a1_x * (i3 - r_w_x * dt) * dt * dt),
        );
        f.fixed_view_mut::<3, 3>(0, 6).copy_from(&(i3 * dt));
        f.fixed_view_mut::<3, 3>(0, 9)
            .copy_from(&(-0.25 * (dq_mat + rq_mat) * dt * dt));
        f.fixed_view_mut::<3, 3>(0, 12)
            .copy_from(&(0.25 * rq_mat * r_a1_x * dt * dt * dt));
        f.fixed_view_mut::<3, 3>(3, 3).copy_from(&(i3 - r_w_x * dt));
        f.fixed_view_mut::<3, 3>(3, 12).copy_from(&(-i3 * dt));
        f.fixed_view_mut::<3, 3>(6, 3).copy_from(
            &(-0.5 * dq_mat * r_a0_x * dt + -0.5 * rq_mat * r_a1_x * (i3 - r_w_x * dt) * dt),
        );
        f.fixed_view_mut::<3, 3>(6, 9)
            .copy_from(&(-0.5 * (dq_mat + rq_mat) * dt));
        f.fixed_view_mut::<3, 3>(6, 12)
            .copy_from(&(0.5 * rq_mat * r_a1_x * dt * dt));

        let mut v = nalgebra::SMatrix::<f64, 15, 18>::zeros();
        v.fixed_view_mut::<3, 3>(0, 0).copy_from(&(0.25 * dq_mat * dt * dt));
        v.fixed_view_mut::<3, 3>(0, 3)
            .copy_from(&(-0.125 * rq_mat * r_a1_x * dt * dt * dt));
        v.fixed_view_mut::<3, 3>(0, 6).copy_from(&(0.25 * rq_mat * dt * dt));
        v.fixed_view_mut::<3, 3>(0, 9)
            .copy_from(&(-0.125 * rq_mat * r_a1_x * dt * dt * dt));
        v.fixed_view_mut::<3, 3>(3, 3).copy_from(&(0.5 * i3 * dt));
        v.fixed_view_mut::<3, 3>(3, 9).copy_from(&(0.5 * i3 * dt));
        v.fixed_view_mut::<3, 3>(6, 0).copy_from(&(0.5 * dq_mat * dt));
        v.fixed_view_mut::<3, 3>(6, 3)
            .copy_from(&(-0.25 * rq_mat * r_a1_x * dt * dt));
        v.fixed_view_mut::<3, 3>(6, 6).copy_from(&(0.5 * rq_mat * dt));
        v.fixed_view_mut::<3, 3>(6, 9)
            .copy_from(&(-0.25 * rq_mat * r_a1_x * dt * dt));
        v.fixed_view_mut::<3, 3>(9, 12).copy_from(&(i3 * dt));
        v.fixed_view_mut::<3, 3>(12, 15).copy_from(&(i3 * dt));

        let mut q = nalgebra::SMatrix::<f64, 18, 18>::zeros();
        q.fixed_view_mut::<3, 3>(0, 0).copy_from(&acc_cov);
        q.fixed_view_mut::<3, 3>(3, 3).copy_from(&gyro_cov);
        q.fixed_view_mut::<3, 3>(6, 6).copy_from(&acc_cov);
        q.fixed_view_mut::<3, 3>(9, 9).copy_from(&gyro_cov);
        q.fixed_view_mut::<3, 3>(12, 12).copy_from(&acc_bias_cov);
        q.fixed_view_mut::<3, 3>(15, 15).copy_from(&gyro_bias_cov);

        let next_cov: Covariance15 = f * block.covariance * f.transpose() + v * q * v.transpose();

        block.dt += dt;
        block.delta_p = delta_p_next;
        block.delta_q = result_delta_q;
        block.delta_v = delta_v_next;
        block.covariance = next_cov;
    }

    block
}

/// Concatenates two adjacent pre-integration blocks (`a` spanning `[t0,t1]`,
/// `b` spanning `[t1,t2]`, both linearized at the same biases) into one
/// spanning `[t0,t2]`. Used to check spec §8 invariant 5: a block over an
/// interval equals the composition of two blocks split at any interior time.
pub fn compose(a: &PreintegrationBlock, b: &PreintegrationBlock) -> PreintegrationBlock {
    let delta_q = (a.delta_q * b.delta_q).normalize();
    let delta_v = a.delta_v + a.delta_q * b.delta_v;
    let delta_p = a.delta_p + a.delta_v * b.dt + a.delta_q * b.delta_p;

    let a_mat = a.delta_q.to_rotation_matrix().into_inner();
    let mut jac_a = nalgebra::SMatrix::<f64, 15, 15>::identity();
    jac_a.fixed_view_mut::<3, 3>(0, 6).copy_from(&(Matrix3::identity() * b.dt));

    let mut jac_b = nalgebra::SMatrix::<f64, 15, 15>::zeros();
    jac_b.fixed_view_mut::<3, 3>(0, 0).copy_from(&a_mat);
    jac_b.fixed_view_mut::<3, 3>(3, 3).copy_from(&a_mat);
    jac_b.fixed_view_mut::<3, 3>(6, 6).copy_from(&a_mat);
    jac_b.fixed_view_mut::<3, 3>(9, 9).copy_from(&Matrix3::identity());
    jac_b.fixed_view_mut::<3, 3>(12, 12).copy_from(&Matrix3::identity());

    let covariance = jac_a * a.covariance * jac_a.transpose() + jac_b * b.covariance * jac_b.transpose();

    PreintegrationBlock {
        dt: a.dt + b.dt,
        delta_p,
        delta_q,
        delta_v,
        linearized_ba: a.linearized_ba,
        linearized_bg: a.linearized_bg,
        covariance,
    }
}
