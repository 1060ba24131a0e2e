// ==========================================
// 屋面估价引擎 - 金额舍入
// ==========================================
// 规则: 舍入到分, 四舍五入远离零 (round-half-away-from-zero)
// ==========================================

/// 舍入到两位小数 (远离零)
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
