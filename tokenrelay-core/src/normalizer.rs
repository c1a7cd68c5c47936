use crate::config::InferenceCfg;
use unicode_normalization::UnicodeNormalization;

fn clean_text(s: &str) -> String {
    // Unicode NFC normalization + BOM strip + CRLF -> LF + trim
    let mut t = s.nfc().collect::<String>();
    if t.starts_with('\u{FEFF}') { // Byte Order Mark
        t.remove(0);
    }
    if t.contains("\r\n") {
        t = t.replace("\r\n", "\n");
    }
    t.trim().to_string()
}

fn clamp_round_f32(x: f32, lo: f32, hi: f32, dp: u32) -> f32 {
    let clamped = x.clamp(lo, hi);
    let p = 10f32.powi(dp as i32);
    (clamped * p).round() / p
}

/// Clean a raw prompt. `None` means nothing is left after trimming and the
/// request must be rejected before any upstream call.
pub fn normalize_prompt(raw: &str) -> Option<String> {
    let cleaned = clean_text(raw);
    if cleaned.is_empty() { None } else { Some(cleaned) }
}

pub fn normalize_inference(mut cfg: InferenceCfg) -> InferenceCfg {
    cfg.temperature = clamp_round_f32(cfg.temperature, 0.0, 1.0, 3);
    cfg.top_p = clamp_round_f32(cfg.top_p, 0.0, 1.0, 4);
    cfg.max_tokens = cfg.max_tokens.clamp(1, 100_000);
    if let Some(stops) = &mut cfg.stop_sequences {
        stops.retain(|s| !s.is_empty());
        stops.sort();
        stops.dedup();
        if stops.is_empty() {
            cfg.stop_sequences = None;
        }
    }
    if cfg
        .system_prompt
        .as_deref()
        .is_some_and(|s| s.trim().is_empty())
    {
        cfg.system_prompt = None;
    }
    cfg
}
