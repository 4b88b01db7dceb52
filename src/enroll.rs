use log::{debug, info};
use opencv::core::Mat;

use crate::config::{EnrollOptions, MatchOptions};
use crate::error::{PalmError, Result};
use crate::store::{HandSide, IdentityProfile, IdentityRecord, Sample, TemplateStore};
use crate::vector::FeatureVector;

/// 一次登记会话
///
/// 样本在内存中缓存，采集满规定数量后由 [`commit`](Self::commit) 一次性写入模板库；
/// 中途放弃时直接丢弃，不会在磁盘上留下残缺的身份。
pub struct EnrollmentSession<'a> {
    store: &'a TemplateStore,
    profile: IdentityProfile,
    side: HandSide,
    required: usize,
    match_opts: MatchOptions,
    samples: Vec<Sample>,
}

impl<'a> EnrollmentSession<'a> {
    /// 开始登记，身份键已存在时返回 [`PalmError::DuplicateIdentity`]
    pub fn begin(
        store: &'a TemplateStore,
        profile: IdentityProfile,
        opts: &EnrollOptions,
        match_opts: &MatchOptions,
    ) -> Result<Self> {
        if store.identity_exists(&profile.key)? {
            return Err(PalmError::DuplicateIdentity(profile.key));
        }
        info!("开始登记 {}（{}），需要 {} 个样本", profile.key, profile.name, opts.samples);
        Ok(Self {
            store,
            profile,
            side: opts.side,
            required: opts.samples as usize,
            match_opts: match_opts.clone(),
            samples: Vec::with_capacity(opts.samples as usize),
        })
    }

    pub fn profile(&self) -> &IdentityProfile {
        &self.profile
    }

    pub fn collected(&self) -> usize {
        self.samples.len()
    }

    pub fn required(&self) -> usize {
        self.required
    }

    pub fn is_complete(&self) -> bool {
        self.samples.len() >= self.required
    }

    /// 加入一个已确认的样本，返回已采集数量
    ///
    /// 第一个样本会与整个模板库比对，若同一只手已登记为其他身份则拒绝。
    pub fn add_sample(&mut self, vector: FeatureVector, image: Option<Mat>) -> Result<usize> {
        if self.is_complete() {
            return Err(PalmError::EnrollmentFull);
        }
        if self.samples.is_empty() {
            let decision = self.store.match_query(&vector, &self.match_opts)?;
            if let (true, Some(existing)) = (decision.is_match(), decision.candidate) {
                return Err(PalmError::AlreadyEnrolledUnderDifferentIdentity {
                    existing,
                    score: decision.score,
                });
            }
            debug!("重复检查通过，最高相似度 {:.4}", decision.score);
        }

        self.samples.push(Sample { side: self.side, vector, image });
        debug!("{}: 样本 {}/{}", self.profile.key, self.samples.len(), self.required);
        Ok(self.samples.len())
    }

    /// 丢弃最后一个样本，用于操作员要求重拍
    pub fn discard_last(&mut self) -> bool {
        self.samples.pop().is_some()
    }

    /// 提交登记，样本不足时返回 [`PalmError::EnrollmentIncomplete`]
    pub fn commit(self) -> Result<IdentityRecord> {
        if !self.is_complete() {
            return Err(PalmError::EnrollmentIncomplete {
                collected: self.samples.len(),
                required: self.required,
            });
        }
        self.store.create_identity(self.profile, self.samples)
    }

    /// 放弃登记
    pub fn abort(self) {
        info!("放弃登记 {}，丢弃 {} 个样本", self.profile.key, self.samples.len());
    }
}
