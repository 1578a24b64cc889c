use indicatif::ProgressStyle;

/// 计算吞吐量时耗时的下限（秒），避免除以 0
pub const MIN_ELAPSED: f64 = 0.01;

pub fn pb_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>9}/{len:9} {per_sec:>12} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-")
}

/// 四舍五入到 `digits` 位小数
pub fn round_to(value: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(0.123456, 5), 0.12346);
        assert_eq!(round_to(12.345, 1), 12.3);
        assert_eq!(round_to(99.999, 2), 100.0);
    }
}
