//! Base timeout selection.
//!
//! Escalation to the extended profile happens here, before the environmental
//! adjustment in `resilience::timeouts`, so the two compose.

use std::time::Duration;

use crate::config::TimeoutProfiles;

/// Whether `target` names a large model or a provider known to be slow.
pub fn is_large_or_slow(target: &str, profiles: &TimeoutProfiles) -> bool {
    let target = target.to_ascii_lowercase();
    profiles
        .large_model_markers
        .iter()
        .any(|marker| target.contains(&marker.to_ascii_lowercase()))
        || profiles
            .slow_provider_prefixes
            .iter()
            .any(|prefix| target.starts_with(&prefix.to_ascii_lowercase()))
}

/// Base timeout before environmental adjustment.
pub fn base_timeout(target: &str, is_streaming: bool, profiles: &TimeoutProfiles) -> Duration {
    let extended = is_large_or_slow(target, profiles);
    let ms = match (is_streaming, extended) {
        (false, false) => profiles.buffered_ms,
        (true, false) => profiles.streaming_ms,
        (false, true) => profiles.extended_buffered_ms,
        (true, true) => profiles.extended_streaming_ms,
    };
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_selection() {
        let profiles = TimeoutProfiles::default();
        assert_eq!(base_timeout("openai/gpt-4o", false, &profiles), Duration::from_secs(30));
        assert_eq!(base_timeout("openai/gpt-4o", true, &profiles), Duration::from_secs(120));
        assert_eq!(
            base_timeout("meta-llama/Llama-3.3-70B-Instruct", false, &profiles),
            Duration::from_secs(180)
        );
        assert_eq!(
            base_timeout("DeepSeek/deepseek-chat", true, &profiles),
            Duration::from_secs(300)
        );
    }

    #[test]
    fn test_empty_target_is_not_extended() {
        assert!(!is_large_or_slow("", &TimeoutProfiles::default()));
    }
}
