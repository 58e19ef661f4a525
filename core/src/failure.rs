/// One tick's worth of evidence for the failure detector.
#[derive(Debug, Clone, Copy)]
pub struct FailureCheck {
    pub indoor: f64,
    /// Indoor reading from the previous cycle's memory.
    pub previous_indoor: f64,
    pub target: f64,
    /// How far below target counts as suspicious.
    pub offset: f64,
    pub heating_now: bool,
    pub learn_count_c: u32,
}

/// Hysteresis over the indoor trend: the streak grows only while the room
/// is well below target, still dropping, heat is commanded, and the model
/// is trained enough to be trusted. Any other tick resets the streak to 1.
/// Returns `(is_failed, new_count)`; failure is reported once the updated
/// streak exceeds 2.
pub fn detect(check: &FailureCheck, failure_count: u32) -> (bool, u32) {
    let suspicious = check.indoor < check.target - check.offset
        && check.indoor < check.previous_indoor
        && check.heating_now
        && check.learn_count_c > 25;
    let count = if suspicious { failure_count + 1 } else { 1 };
    (count > 2, count)
}
