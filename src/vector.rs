use serde::{Deserialize, Serialize};

/// 范数低于此值的向量视为零向量
const NORM_EPSILON: f32 = 1e-12;

/// 定长的特征向量
///
/// 经过 [`FeatureVector::normalized`] 处理后满足 `‖v‖₂ = 1`，或者是全零的“无信号”向量。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureVector(Vec<f32>);

impl FeatureVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    /// 构造并进行 L2 归一化
    pub fn normalized(values: Vec<f32>) -> Self {
        let mut v = Self(values);
        v.normalize();
        v
    }

    pub fn dim(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn norm(&self) -> f32 {
        self.0.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    pub fn is_zero(&self) -> bool {
        self.norm() <= NORM_EPSILON
    }

    /// 原地 L2 归一化，范数接近 0 时保持不变
    pub fn normalize(&mut self) {
        let norm = self.norm();
        if norm > NORM_EPSILON {
            self.0.iter_mut().for_each(|x| *x /= norm);
        }
    }

    /// 归一化后乘以权重
    pub fn weighted(mut self, weight: f32) -> Self {
        self.normalize();
        self.0.iter_mut().for_each(|x| *x *= weight);
        self
    }

    /// 拼接多个子向量并重新归一化
    pub fn concat<I: IntoIterator<Item = FeatureVector>>(parts: I) -> Self {
        Self::normalized(parts.into_iter().flat_map(|p| p.0).collect())
    }

    /// 两个单位向量的点积即余弦相似度
    pub fn dot(&self, other: &Self) -> f32 {
        self.0.iter().zip(&other.0).map(|(a, b)| a * b).sum()
    }
}

impl From<Vec<f32>> for FeatureVector {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

impl AsRef<[f32]> for FeatureVector {
    fn as_ref(&self) -> &[f32] {
        &self.0
    }
}
