//! Local script template, the fallback of the script stage.

/// Share of the target duration given to each beat.
const BEAT_WEIGHTS: [f64; 5] = [0.08, 0.25, 0.45, 0.12, 0.10];
const MIN_BEAT_SECS: i64 = 2;
/// Beat that absorbs the rounding remainder (the largest weight).
const REMAINDER_BEAT: usize = 2;

/// Seconds per beat. Always five entries summing to `duration_secs` for any
/// duration of at least 10 seconds.
pub fn beat_plan(duration_secs: u32) -> [u32; 5] {
    let total = i64::from(duration_secs);
    let mut beats = BEAT_WEIGHTS.map(|w| ((total as f64 * w).floor() as i64).max(MIN_BEAT_SECS));

    let diff = total - beats.iter().sum::<i64>();
    beats[REMAINDER_BEAT] = (beats[REMAINDER_BEAT] + diff).max(0);

    beats.map(|b| u32::try_from(b).unwrap_or(0))
}

/// Scene-per-paragraph script covering intro, core idea, practical steps,
/// caveats and a call to action.
pub fn render_script(prompt: &str, duration_secs: u32) -> String {
    let topic = prompt.trim().trim_end_matches(['.', '!', '?']);
    let beats = [
        format!("Introduction: a quick look at \"{topic}\"."),
        "The key idea, shown with an example.".to_string(),
        "Three practical steps or tips.".to_string(),
        "Extra tricks and things to watch out for.".to_string(),
        "Wrap-up and call to action: subscribe, like and comment.".to_string(),
    ];

    beat_plan(duration_secs)
        .iter()
        .zip(beats.iter())
        .enumerate()
        .map(|(i, (secs, beat))| format!("Scene {} ({}s): {}", i + 1, secs, beat))
        .collect::<Vec<_>>()
        .join("\n\n")
}
