use std::sync::LazyLock;

use prometheus::*;

static METRIC_ATTEMPT_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "palm_attempt_total",
        "count of capture attempts by mode and outcome",
        &["mode", "outcome"]
    )
    .unwrap()
});

static METRIC_MATCH_SCORE: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "palm_match_score",
        "best aggregated similarity of each match",
        &["mode"],
        (0..=20).map(|x| x as f64 * 0.05).collect()
    )
    .unwrap()
});

static METRIC_PIPELINE_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "palm_pipeline_duration",
        "duration of the feature extraction pipeline in seconds",
        &["layout"]
    )
    .unwrap()
});

/// 记录一次识别或登记尝试的结果
pub fn inc_attempt(mode: &str, outcome: &str) {
    METRIC_ATTEMPT_COUNT.with_label_values(&[mode, outcome]).inc();
}

pub fn observe_match_score(mode: &str, score: f32) {
    METRIC_MATCH_SCORE.with_label_values(&[mode]).observe(score as f64);
}

pub fn observe_pipeline_duration(layout: &str, seconds: f64) {
    METRIC_PIPELINE_DURATION.with_label_values(&[layout]).observe(seconds);
}

/// 以文本格式导出所有指标
pub fn gather_text() -> anyhow::Result<String> {
    let mut buffer = String::new();
    TextEncoder::new().encode_utf8(&prometheus::gather(), &mut buffer)?;
    Ok(buffer)
}
