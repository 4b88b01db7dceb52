use std::cmp::Ordering;
use std::fmt;

use log::debug;
use rayon::prelude::*;
use serde::Serialize;

use crate::config::MatchOptions;
use crate::vector::FeatureVector;

/// 一次识别的判定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Matched,
    NotMatched,
}

/// 识别结果，不做持久化
///
/// 未匹配时仍然给出得分最高的候选身份，便于排查阈值。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchDecision {
    pub candidate: Option<String>,
    pub score: f32,
    pub verdict: Verdict,
}

impl MatchDecision {
    /// 匹配成功时返回身份
    pub fn identity(&self) -> Option<&str> {
        match self.verdict {
            Verdict::Matched => self.candidate.as_deref(),
            Verdict::NotMatched => None,
        }
    }

    pub fn is_match(&self) -> bool {
        self.verdict == Verdict::Matched
    }
}

impl fmt::Display for MatchDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.verdict, &self.candidate) {
            (Verdict::Matched, Some(key)) => write!(f, "MATCHED {} ({:.4})", key, self.score),
            (_, Some(key)) => write!(f, "NOT_MATCHED, 最接近 {} ({:.4})", key, self.score),
            (_, None) => write!(f, "NOT_MATCHED ({:.4})", self.score),
        }
    }
}

/// 一个身份的全部模板向量
#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub key: String,
    pub templates: Vec<FeatureVector>,
}

/// 参与匹配的全部身份
///
/// 构建后不再修改，写入方通过替换整个 `Arc<Gallery>` 发布新版本。
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    pub fn new(mut entries: Vec<GalleryEntry>) -> Self {
        entries.retain(|e| !e.templates.is_empty());
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn get(&self, key: &str) -> Option<&GalleryEntry> {
        self.entries.binary_search_by(|e| e.key.as_str().cmp(key)).ok().map(|i| &self.entries[i])
    }

    /// 返回替换或插入一个身份后的新版本
    pub fn with_entry(&self, entry: GalleryEntry) -> Self {
        let mut entries: Vec<_> =
            self.entries.iter().filter(|e| e.key != entry.key).cloned().collect();
        entries.push(entry);
        Self::new(entries)
    }

    /// 返回移除一个身份后的新版本
    pub fn without(&self, key: &str) -> Self {
        Self { entries: self.entries.iter().filter(|e| e.key != key).cloned().collect() }
    }

    /// 对所有身份打分，返回聚合得分最高者
    pub fn match_query(&self, query: &FeatureVector, opts: &MatchOptions) -> MatchDecision {
        let best = self
            .entries
            .par_iter()
            .map(|entry| {
                let scores = entry.templates.iter().map(|t| cosine(query, t)).collect();
                (entry.key.as_str(), aggregate_top_k(scores, opts.top_k))
            })
            .reduce_with(|a, b| if better(&b, &a) { b } else { a });

        let decision = decide(best.map(|(key, score)| (key.to_string(), score)), opts.threshold);
        debug!("匹配 {} 个身份: {}", self.entries.len(), decision);
        decision
    }
}

/// 单位向量的余弦相似度
pub fn cosine(a: &FeatureVector, b: &FeatureVector) -> f32 {
    a.dot(b)
}

/// 取最高的 `k` 个得分求平均，得分不足 `k` 个时对全部求平均
pub fn aggregate_top_k(mut scores: Vec<f32>, k: usize) -> f32 {
    if scores.is_empty() {
        return 0.;
    }
    scores.sort_by(|a, b| b.partial_cmp(a).unwrap_or(Ordering::Equal));
    let top = &scores[..k.clamp(1, scores.len())];
    top.iter().sum::<f32>() / top.len() as f32
}

/// 得分高者优先，同分时取键较小者，保证结果与遍历顺序无关
fn better(a: &(&str, f32), b: &(&str, f32)) -> bool {
    match a.1.partial_cmp(&b.1) {
        Some(Ordering::Greater) => true,
        Some(Ordering::Less) => false,
        _ => a.0 < b.0,
    }
}

/// 根据阈值给出判定，空库返回得分 0 的未匹配
pub fn decide(best: Option<(String, f32)>, threshold: f32) -> MatchDecision {
    match best {
        Some((key, score)) => MatchDecision {
            verdict: if score >= threshold { Verdict::Matched } else { Verdict::NotMatched },
            candidate: Some(key),
            score,
        },
        None => MatchDecision { candidate: None, score: 0., verdict: Verdict::NotMatched },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_top_two() {
        assert!((aggregate_top_k(vec![0.60, 0.95], 2) - 0.775).abs() < 1e-6);
        assert!((aggregate_top_k(vec![0.1, 0.95, 0.60], 2) - 0.775).abs() < 1e-6);
    }

    #[test]
    fn test_aggregate_fewer_than_k() {
        assert_eq!(aggregate_top_k(vec![0.8], 2), 0.8);
        assert_eq!(aggregate_top_k(vec![], 2), 0.);
    }

    #[test]
    fn test_decide_threshold_inclusive() {
        assert!(decide(Some(("A".into(), 0.9)), 0.9).is_match());
        let d = decide(Some(("A".into(), 0.89)), 0.9);
        assert_eq!(d.verdict, Verdict::NotMatched);
        assert_eq!(d.candidate.as_deref(), Some("A"));
        assert_eq!(d.identity(), None);
    }

    #[test]
    fn test_empty_gallery() {
        let query = FeatureVector::normalized(vec![1., 0.]);
        let d = Gallery::default().match_query(&query, &MatchOptions::default());
        assert_eq!(d, MatchDecision { candidate: None, score: 0., verdict: Verdict::NotMatched });
    }

    #[test]
    fn test_tie_prefers_smaller_key() {
        assert!(better(&("A", 0.5), &("B", 0.5)));
        assert!(!better(&("B", 0.5), &("A", 0.5)));
        assert!(better(&("B", 0.6), &("A", 0.5)));
    }

    #[test]
    fn test_gallery_replace_and_remove() {
        let v = FeatureVector::normalized(vec![1., 0.]);
        let g = Gallery::new(vec![GalleryEntry { key: "B".into(), templates: vec![v.clone()] }]);
        let g = g.with_entry(GalleryEntry { key: "A".into(), templates: vec![v.clone()] });
        assert_eq!(g.entries().iter().map(|e| e.key.as_str()).collect::<Vec<_>>(), ["A", "B"]);
        assert!(g.get("A").is_some());
        let g = g.without("A");
        assert!(g.get("A").is_none());
        assert_eq!(g.len(), 1);
    }
}
