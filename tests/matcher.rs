use palmvein::config::MatchOptions;
use palmvein::matcher::{Gallery, GalleryEntry, Verdict};
use palmvein::vector::FeatureVector;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rstest::*;

/// 与 `[1, 0]` 的余弦相似度为 `score` 的单位向量
fn at(score: f32) -> FeatureVector {
    FeatureVector::new(vec![score, (1. - score * score).sqrt()])
}

fn entry(key: &str, scores: &[f32]) -> GalleryEntry {
    GalleryEntry { key: key.to_string(), templates: scores.iter().map(|&s| at(s)).collect() }
}

fn query() -> FeatureVector {
    FeatureVector::new(vec![1., 0.])
}

#[test]
fn top_k_average_decides() {
    let gallery = Gallery::new(vec![entry("A123456789", &[0.95, 0.60])]);

    let strict = MatchOptions { threshold: 0.90, top_k: 2 };
    let decision = gallery.match_query(&query(), &strict);
    assert!((decision.score - 0.775).abs() < 1e-4);
    assert_eq!(decision.verdict, Verdict::NotMatched);
    assert_eq!(decision.candidate.as_deref(), Some("A123456789"));
    assert_eq!(decision.identity(), None);

    let loose = MatchOptions { threshold: 0.70, top_k: 2 };
    assert_eq!(gallery.match_query(&query(), &loose).identity(), Some("A123456789"));
}

#[test]
fn single_template_averages_over_what_exists() {
    let gallery = Gallery::new(vec![entry("A123456789", &[0.92])]);
    let decision = gallery.match_query(&query(), &MatchOptions::default());
    assert!((decision.score - 0.92).abs() < 1e-4);
    assert!(decision.is_match());
}

#[test]
fn empty_gallery_never_matches() {
    let decision = Gallery::default().match_query(&query(), &MatchOptions::default());
    assert_eq!(decision.candidate, None);
    assert_eq!(decision.score, 0.);
    assert_eq!(decision.verdict, Verdict::NotMatched);
}

#[rstest]
#[case(0.5)]
#[case(0.99)]
fn threshold_is_inclusive(#[case] threshold: f32) {
    let gallery = Gallery::new(vec![entry("A123456789", &[1.0])]);
    let decision = gallery.match_query(&query(), &MatchOptions { threshold, top_k: 2 });
    assert!(decision.is_match());

    let exact =
        Gallery::new(vec![GalleryEntry { key: "B000000000".into(), templates: vec![query()] }]);
    assert!(exact.match_query(&query(), &MatchOptions { threshold: 1.0, top_k: 1 }).is_match());
}

#[test]
fn best_identity_wins_and_ties_prefer_smaller_key() {
    let gallery = Gallery::new(vec![
        entry("C000000000", &[0.80, 0.80]),
        entry("B000000000", &[0.97, 0.95]),
        entry("A000000000", &[0.97, 0.95]),
    ]);
    let decision = gallery.match_query(&query(), &MatchOptions::default());
    assert_eq!(decision.identity(), Some("A000000000"));
}

#[test]
fn snapshot_updates_are_copy_on_write() {
    let gallery = Gallery::new(vec![entry("A000000000", &[0.99])]);
    let grown = gallery.with_entry(entry("B000000000", &[0.98]));
    assert_eq!(gallery.len(), 1);
    assert_eq!(grown.len(), 2);

    let shrunk = grown.without("A000000000");
    assert!(shrunk.get("A000000000").is_none());
    let decision = shrunk.match_query(&query(), &MatchOptions::default());
    assert_eq!(decision.identity(), Some("B000000000"));
}

/// 零均值随机单位向量，彼此之间近似正交
fn random_unit(rng: &mut StdRng, dim: usize) -> FeatureVector {
    FeatureVector::normalized((0..dim).map(|_| rng.random_range(-1.0..1.0)).collect())
}

#[rstest]
#[case(1)]
#[case(7)]
#[case(42)]
fn unrelated_vector_is_rejected(#[case] seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let templates = |rng: &mut StdRng| -> Vec<FeatureVector> {
        (0..3).map(|_| random_unit(rng, 258)).collect()
    };
    let gallery = Gallery::new(vec![
        GalleryEntry { key: "A000000000".into(), templates: templates(&mut rng) },
        GalleryEntry { key: "B000000000".into(), templates: templates(&mut rng) },
    ]);

    let opts = MatchOptions::default();
    let decision = gallery.match_query(&random_unit(&mut rng, 258), &opts);
    assert_eq!(decision.verdict, Verdict::NotMatched);
    assert_eq!(decision.identity(), None);
    assert!(decision.score < 0.3);
    assert!(decision.score < opts.threshold);
}
